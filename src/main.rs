use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use aoi_resolver::config::ResolverConfig;
use aoi_resolver::game::world::SubscriptionTable;
use aoi_resolver::metrics::{self, Metrics};
use aoi_resolver::net::aoi::SubscriptionResolver;
use aoi_resolver::net::config_updates::ConfigUpdateSender;
use aoi_resolver::net::telemetry::TracingSink;
use aoi_resolver::sim::{DemoConfig, DemoWorld};

/// Simulation ticks per second
const TICK_RATE: u32 = 30;

/// How often the config file is re-read
const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(5);

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Environment variables, with the JSON file (if configured) applied on top
fn load_config(env_config: &ResolverConfig, path: Option<&str>) -> anyhow::Result<ResolverConfig> {
    let mut config = env_config.clone();
    if let Some(path) = path {
        info!("Loading AOI config overrides from {}", path);
        config = config.overlay_json_file(path)?;
    }
    config.validate()?;
    Ok(config)
}

/// Re-read the config file periodically and push changes to the resolver
async fn watch_config_file(
    path: String,
    sender: ConfigUpdateSender,
    base: ResolverConfig,
    mut current: ResolverConfig,
) {
    let mut interval = tokio::time::interval(CONFIG_POLL_INTERVAL);
    // First tick completes immediately; the file was just loaded
    interval.tick().await;

    loop {
        interval.tick().await;

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) => {
                warn!("Failed to read AOI config {}: {}", path, e);
                continue;
            }
        };
        let config = match base.overlay_json_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to parse AOI config {}: {}", path, e);
                continue;
            }
        };
        if config == current {
            continue;
        }

        match sender.try_send(config.clone()) {
            Ok(()) => {
                info!("AOI config change detected in {}", path);
                current = config;
            }
            Err(e) => warn!("Failed to queue AOI config update: {}", e),
        }
    }
}

async fn run(
    mut resolver: SubscriptionResolver,
    mut world: DemoWorld,
    metrics: Arc<Metrics>,
) {
    let mut subscriptions = SubscriptionTable::new();
    let mut ticker = tokio::time::interval(Duration::from_secs(1) / TICK_RATE);
    let mut last_tick = Instant::now();

    loop {
        ticker.tick().await;
        let now = Instant::now();
        let delta = now.duration_since(last_tick);
        last_tick = now;

        resolver.frame_monitor_mut().frame_start();
        world.step(delta.as_secs_f32());
        if let Some(outcome) = resolver.update(delta, &world, &mut subscriptions) {
            metrics.record_pass(&outcome);
        }
        resolver.frame_monitor_mut().frame_end();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("AOI Resolver Server v{}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::var("AOI_CONFIG_PATH").ok();
    let env_config = ResolverConfig::load_or_default();
    let config = load_config(&env_config, config_path.as_deref())?;
    info!(
        "Configuration loaded: axis={:?}, cell_size={}, interval={}s, caps={}/{}/{}",
        config.axis_mode,
        config.cell_size,
        config.update_interval_secs,
        config.cap_healthy,
        config.cap_moderate,
        config.cap_heavy
    );

    // Initialize metrics
    let metrics = Arc::new(Metrics::new());
    let metrics_port: u16 = env_or("METRICS_PORT", 9090);

    let metrics_clone = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_clone, metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    let defaults = DemoConfig::default();
    let demo = DemoConfig {
        entities: env_or("DEMO_ENTITIES", defaults.entities),
        clients: env_or("DEMO_CLIENTS", defaults.clients),
        seed: env_or("DEMO_SEED", defaults.seed),
        ..defaults
    };
    let world = DemoWorld::new(demo);
    info!(
        "Demo world: {} entities, {} clients, seed {}",
        world.entity_count(),
        world.client_count(),
        demo.seed
    );

    let mut resolver = SubscriptionResolver::new(config.clone())?;
    resolver.telemetry_mut().add_sink(TracingSink);
    resolver.telemetry_mut().add_sink(metrics.clone());

    if let Some(path) = config_path {
        tokio::spawn(watch_config_file(path, resolver.config_sender(), env_config, config));
    }

    // Shutdown signal handler
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    tokio::select! {
        _ = run(resolver, world, metrics) => {}
        _ = shutdown => {
            info!("Shutting down...");
        }
    }

    info!("Server stopped");
    Ok(())
}
