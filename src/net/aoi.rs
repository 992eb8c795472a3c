//! Area of Interest (AOI) subscription resolver
//!
//! Once per update interval, decides which entities each ready client's
//! viewpoints should be subscribed to:
//!
//! 1. Rebuild a [`StaticGrid`] from the entity snapshot (skip the pass if the
//!    snapshot has fewer than two distinct positions).
//! 2. Sample the frame budget once; the frame cap is shared by every client.
//! 3. Per viewpoint, cap = min(frame cap, network cap for the client's RTT).
//! 4. Query the grid, filter through the host's visibility rule, keep the
//!    `cap` nearest (ties by ascending id) and hand the set to the sink.
//!
//! The pass is synchronous and runs to completion; the only state it
//! mutates across passes lives in the sink.

use std::cmp::Ordering;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{ConfigError, ResolverConfig};
use crate::game::performance::{FrameBudgetMonitor, LoadBucket};
use crate::game::spatial::{GridEntry, GridStats, StaticGrid};
use crate::game::world::{
    ClientRecord, ConnectionId, EntityId, EntityRecord, InterestSource, SubscriptionSet,
    SubscriptionSink,
};
use crate::net::config_updates::{ConfigUpdateSender, ConfigUpdates};
use crate::net::network_quality::NetworkQualityClassifier;
use crate::net::telemetry::{CapTelemetry, ViewpointSample};
use crate::util::vec2::Vec2;
use crate::util::vec3::Vec3;

/// Initial capacity for per-viewpoint candidate lists
const CANDIDATE_INITIAL_CAPACITY: usize = 256;

/// Entity considered for one viewpoint during truncation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub id: EntityId,
    pub distance: f32,
}

#[inline]
fn nearest_first(a: &Candidate, b: &Candidate) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.id.cmp(&b.id))
}

/// Keep only the `cap` nearest candidates, ties broken by ascending id
///
/// Leaves the list untouched when it already fits. The kept candidates are
/// not sorted among themselves.
pub fn truncate_nearest(candidates: &mut Vec<Candidate>, cap: usize) {
    if candidates.len() <= cap {
        return;
    }
    if cap == 0 {
        candidates.clear();
        return;
    }
    // Total order (distance, id), so selection picks exactly the cap nearest
    candidates.select_nth_unstable_by(cap - 1, nearest_first);
    candidates.truncate(cap);
}

/// Summary of a completed pass
#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    pub entities: usize,
    /// Ready clients processed
    pub clients: usize,
    /// Viewpoints that received a subscription set
    pub viewpoints: usize,
    /// Viewpoints skipped because their position was absent
    pub skipped_viewpoints: usize,
    pub frame_bucket: LoadBucket,
    pub frame_cap: usize,
    pub frame_ms: f32,
    pub total_kept: usize,
    pub total_cap: usize,
    pub total_trimmed: usize,
    pub elapsed: Duration,
    pub grid: GridStats,
}

impl PassReport {
    pub fn avg_kept(&self) -> f32 {
        if self.viewpoints == 0 {
            0.0
        } else {
            self.total_kept as f32 / self.viewpoints as f32
        }
    }

    pub fn avg_cap(&self) -> f32 {
        if self.viewpoints == 0 {
            0.0
        } else {
            self.total_cap as f32 / self.viewpoints as f32
        }
    }
}

/// Result of one resolve pass
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    /// Subscriptions were published
    Completed(PassReport),
    /// Fewer than two distinct entity positions; nothing was published
    Skipped { entities: usize },
}

impl PassOutcome {
    pub fn report(&self) -> Option<&PassReport> {
        match self {
            PassOutcome::Completed(report) => Some(report),
            PassOutcome::Skipped { .. } => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, PassOutcome::Skipped { .. })
    }
}

/// Per-client interest resolver with frame- and network-aware caps
pub struct SubscriptionResolver {
    config: ResolverConfig,
    frame_monitor: FrameBudgetMonitor,
    network: NetworkQualityClassifier,
    telemetry: CapTelemetry,
    config_updates: ConfigUpdates,
    /// Index from the last non-degenerate snapshot
    grid: Option<StaticGrid>,
    update_countdown: Duration,
    entity_buffer: Vec<EntityRecord>,
    client_buffer: Vec<ClientRecord>,
    candidate_buffer: Vec<Candidate>,
    passes: u64,
    skipped_passes: u64,
}

impl SubscriptionResolver {
    pub fn new(config: ResolverConfig) -> Result<Self, ConfigError> {
        Self::new_at(config, Instant::now())
    }

    /// Create a resolver whose frame hysteresis clock starts at `now`
    pub fn new_at(config: ResolverConfig, now: Instant) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_validated(config, now))
    }

    fn from_validated(config: ResolverConfig, now: Instant) -> Self {
        Self {
            frame_monitor: FrameBudgetMonitor::new_at(
                config.target_frame_ms,
                config.cap_hysteresis(),
                now,
            ),
            network: NetworkQualityClassifier::from_config(&config),
            telemetry: CapTelemetry::new(&config),
            config_updates: ConfigUpdates::default(),
            grid: None,
            update_countdown: config.update_interval(),
            entity_buffer: Vec::new(),
            client_buffer: Vec::new(),
            candidate_buffer: Vec::with_capacity(CANDIDATE_INITIAL_CAPACITY),
            passes: 0,
            skipped_passes: 0,
            config,
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Apply a new config immediately
    pub fn set_config(&mut self, config: ResolverConfig) -> Result<(), ConfigError> {
        config.validate()?;

        self.frame_monitor
            .reconfigure(config.target_frame_ms, config.cap_hysteresis());
        self.network = NetworkQualityClassifier::from_config(&config);
        self.telemetry.reconfigure(&config);
        self.update_countdown = self.update_countdown.min(config.update_interval());
        self.config = config;

        info!(
            "AOI config applied: cell_size={}, caps={}/{}/{}, network_caps={}",
            self.config.cell_size,
            self.config.cap_healthy,
            self.config.cap_moderate,
            self.config.cap_heavy,
            self.config.tie_to_network_caps
        );
        Ok(())
    }

    /// Handle for pushing config changes from other tasks
    pub fn config_sender(&self) -> ConfigUpdateSender {
        self.config_updates.sender()
    }

    fn apply_pending_config_updates(&mut self) {
        for config in self.config_updates.drain() {
            if let Err(e) = self.set_config(config) {
                warn!("Rejected AOI config update: {}", e);
            }
        }
    }

    pub fn frame_monitor(&self) -> &FrameBudgetMonitor {
        &self.frame_monitor
    }

    /// Frame costs are recorded here by the host tick loop
    pub fn frame_monitor_mut(&mut self) -> &mut FrameBudgetMonitor {
        &mut self.frame_monitor
    }

    pub fn telemetry(&self) -> &CapTelemetry {
        &self.telemetry
    }

    pub fn telemetry_mut(&mut self) -> &mut CapTelemetry {
        &mut self.telemetry
    }

    /// Index built by the most recent non-degenerate pass
    pub fn grid(&self) -> Option<&StaticGrid> {
        self.grid.as_ref()
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }

    pub fn skipped_passes(&self) -> u64 {
        self.skipped_passes
    }

    /// Return to the freshly constructed state, keeping config and sinks
    pub fn reset(&mut self, now: Instant) {
        self.frame_monitor.reset(now);
        self.grid = None;
        self.update_countdown = self.config.update_interval();
        self.passes = 0;
        self.skipped_passes = 0;
    }

    /// Advance the interval countdown by `delta`; runs a pass when it expires
    pub fn update<S, K>(&mut self, delta: Duration, source: &S, sink: &mut K) -> Option<PassOutcome>
    where
        S: InterestSource + ?Sized,
        K: SubscriptionSink + ?Sized,
    {
        self.update_countdown = self.update_countdown.saturating_sub(delta);
        if !self.update_countdown.is_zero() {
            return None;
        }
        self.update_countdown = self.config.update_interval();
        Some(self.resolve_now(source, sink))
    }

    /// Run a pass immediately
    pub fn resolve_now<S, K>(&mut self, source: &S, sink: &mut K) -> PassOutcome
    where
        S: InterestSource + ?Sized,
        K: SubscriptionSink + ?Sized,
    {
        self.resolve_at(Instant::now(), source, sink)
    }

    /// Run a pass as if the current time were `now`
    pub fn resolve_at<S, K>(&mut self, now: Instant, source: &S, sink: &mut K) -> PassOutcome
    where
        S: InterestSource + ?Sized,
        K: SubscriptionSink + ?Sized,
    {
        let started = Instant::now();
        self.apply_pending_config_updates();

        let axis = self.config.axis_mode;
        self.entity_buffer.clear();
        source.collect_entities(&mut self.entity_buffer);
        let entity_count = self.entity_buffer.len();

        let grid = StaticGrid::build(
            self.entity_buffer.iter().map(|e| GridEntry {
                id: e.id,
                center: axis.project(e.position),
                radius: e.visibility_radius,
            }),
            self.config.cell_size,
        );
        let Some(grid) = grid else {
            self.skipped_passes += 1;
            debug!(
                "AOI pass skipped: {} entities have fewer than 2 distinct positions",
                entity_count
            );
            return PassOutcome::Skipped {
                entities: entity_count,
            };
        };

        let frame_ms = self.frame_monitor.smoothed_frame_ms();
        let frame_bucket = self.frame_monitor.sample_at(frame_ms, now);
        let frame_cap = self.config.frame_caps().cap(frame_bucket);

        self.client_buffer.clear();
        source.collect_clients(&mut self.client_buffer);
        self.telemetry.begin_pass(now);

        let mut report = PassReport {
            entities: entity_count,
            clients: 0,
            viewpoints: 0,
            skipped_viewpoints: 0,
            frame_bucket,
            frame_cap,
            frame_ms,
            total_kept: 0,
            total_cap: 0,
            total_trimmed: 0,
            elapsed: Duration::ZERO,
            grid: grid.stats(),
        };

        for client in &self.client_buffer {
            if !client.ready {
                continue;
            }
            report.clients += 1;
            let cap = self.network.effective_cap(frame_cap, client.rtt_ms);

            for viewpoint in &client.viewpoints {
                if !viewpoint.is_present() {
                    report.skipped_viewpoints += 1;
                    continue;
                }

                let origin = axis.project(viewpoint.position);
                collect_candidates(
                    &grid,
                    origin,
                    |candidate| source.should_subscribe(viewpoint.entity_id, candidate),
                    &mut self.candidate_buffer,
                );
                let found = self.candidate_buffer.len();
                truncate_nearest(&mut self.candidate_buffer, cap);

                let subscriptions: SubscriptionSet =
                    self.candidate_buffer.iter().map(|c| c.id).collect();
                let kept = subscriptions.len();
                let trimmed = found.saturating_sub(self.candidate_buffer.len());

                sink.apply_subscriptions(client.connection_id, viewpoint.entity_id, subscriptions);

                report.viewpoints += 1;
                report.total_kept = report.total_kept.saturating_add(kept);
                report.total_cap = report.total_cap.saturating_add(cap);
                report.total_trimmed = report.total_trimmed.saturating_add(trimmed);
                self.telemetry.record(ViewpointSample {
                    connection_id: client.connection_id,
                    viewpoint: viewpoint.entity_id,
                    kept,
                    cap,
                    trimmed,
                });
            }
        }

        self.telemetry.finish_pass(frame_bucket, frame_ms, now);
        self.grid = Some(grid);
        self.passes += 1;
        report.elapsed = started.elapsed();

        debug!(
            "AOI pass: {} entities, {} clients, {} viewpoints, avg kept {:.1}/{:.1}, bucket {:?}, {:?}",
            report.entities,
            report.clients,
            report.viewpoints,
            report.avg_kept(),
            report.avg_cap(),
            report.frame_bucket,
            report.elapsed
        );

        PassOutcome::Completed(report)
    }

    /// Ready clients with at least one viewpoint within `range` of `position`
    ///
    /// Distance is measured in full 3D against live client data, independent
    /// of the subscription pass. Each client is listed once.
    pub fn clients_in_range<S>(&self, source: &S, position: Vec3, range: f32) -> Vec<ConnectionId>
    where
        S: InterestSource + ?Sized,
    {
        if !self.config.range_query_enabled || !(range >= 0.0) {
            return Vec::new();
        }

        let range_sq = range * range;
        let mut clients = Vec::new();
        source.collect_clients(&mut clients);

        clients
            .iter()
            .filter(|client| client.ready)
            .filter(|client| {
                client.viewpoints.iter().any(|viewpoint| {
                    viewpoint.is_present() && viewpoint.position.distance_sq_to(position) <= range_sq
                })
            })
            .map(|client| client.connection_id)
            .collect()
    }
}

impl Default for SubscriptionResolver {
    fn default() -> Self {
        Self::from_validated(ResolverConfig::default(), Instant::now())
    }
}

/// Fill `out` with visible grid contacts of `origin` and their distances
fn collect_candidates<F>(grid: &StaticGrid, origin: Vec2, mut visible: F, out: &mut Vec<Candidate>)
where
    F: FnMut(EntityId) -> bool,
{
    out.clear();
    out.extend(
        grid.contact(origin)
            .filter(|entry| visible(entry.id))
            .map(|entry| Candidate {
                id: entry.id,
                distance: entry.center.distance_to(origin),
            }),
    );
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AxisMode;
    use crate::game::world::{ClientRecord, SubscriptionTable};
    use hashbrown::HashSet;

    #[derive(Default)]
    struct TestWorld {
        entities: Vec<EntityRecord>,
        clients: Vec<ClientRecord>,
        hidden: HashSet<(EntityId, EntityId)>,
    }

    impl InterestSource for TestWorld {
        fn collect_entities(&self, out: &mut Vec<EntityRecord>) {
            out.extend_from_slice(&self.entities);
        }

        fn collect_clients(&self, out: &mut Vec<ClientRecord>) {
            out.extend(self.clients.iter().cloned());
        }

        fn should_subscribe(&self, viewpoint: EntityId, candidate: EntityId) -> bool {
            !self.hidden.contains(&(viewpoint, candidate))
        }
    }

    /// Config where only the frame caps matter
    fn frame_only_config(cap: usize) -> ResolverConfig {
        ResolverConfig {
            cap_healthy: cap,
            cap_moderate: cap,
            cap_heavy: cap,
            tie_to_network_caps: false,
            ..Default::default()
        }
    }

    /// 10 entities 50 units apart along +X, all visible from 500 units
    fn line_world() -> TestWorld {
        let mut world = TestWorld::default();
        for i in 1..=10u32 {
            world
                .entities
                .push(EntityRecord::new(i, Vec3::new(50.0 * i as f32, 0.0, 0.0), 500.0));
        }
        world
            .clients
            .push(ClientRecord::new(1, true, 0).with_viewpoint(100, Vec3::ZERO));
        world
    }

    fn ids(table: &SubscriptionTable, connection_id: ConnectionId, viewpoint: EntityId) -> Vec<EntityId> {
        let mut ids: Vec<_> = table
            .get(connection_id, viewpoint)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    fn candidate(id: EntityId, distance: f32) -> Candidate {
        Candidate { id, distance }
    }

    // ========================================================================
    // Truncation
    // ========================================================================

    #[test]
    fn test_truncate_keeps_nearest() {
        let mut candidates = vec![
            candidate(1, 50.0),
            candidate(2, 10.0),
            candidate(3, 30.0),
            candidate(4, 20.0),
            candidate(5, 40.0),
        ];
        truncate_nearest(&mut candidates, 3);
        let mut kept: Vec<_> = candidates.iter().map(|c| c.id).collect();
        kept.sort_unstable();
        assert_eq!(kept, vec![2, 3, 4]);
    }

    #[test]
    fn test_truncate_ties_by_id() {
        let mut candidates = vec![
            candidate(9, 10.0),
            candidate(4, 10.0),
            candidate(7, 10.0),
            candidate(1, 10.0),
            candidate(3, 5.0),
        ];
        truncate_nearest(&mut candidates, 3);
        let mut kept: Vec<_> = candidates.iter().map(|c| c.id).collect();
        kept.sort_unstable();
        assert_eq!(kept, vec![1, 3, 4]);
    }

    #[test]
    fn test_truncate_under_cap_untouched() {
        let mut candidates = vec![candidate(2, 30.0), candidate(1, 10.0)];
        truncate_nearest(&mut candidates, 5);
        assert_eq!(candidates, vec![candidate(2, 30.0), candidate(1, 10.0)]);

        let mut empty: Vec<Candidate> = Vec::new();
        truncate_nearest(&mut empty, 0);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_truncate_zero_cap() {
        let mut candidates = vec![candidate(1, 1.0), candidate(2, 2.0)];
        truncate_nearest(&mut candidates, 0);
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_truncate_matches_full_sort() {
        let mut candidates: Vec<_> = (0..500u32)
            .map(|i| candidate(i, ((i * 7919) % 97) as f32))
            .collect();
        let mut sorted = candidates.clone();
        sorted.sort_by(nearest_first);
        let mut expected: Vec<_> = sorted.iter().take(40).map(|c| c.id).collect();
        expected.sort_unstable();

        truncate_nearest(&mut candidates, 40);
        let mut kept: Vec<_> = candidates.iter().map(|c| c.id).collect();
        kept.sort_unstable();
        assert_eq!(kept, expected);
    }

    // ========================================================================
    // Resolve pass
    // ========================================================================

    #[test]
    fn test_line_scenario_keeps_five_nearest() {
        let mut resolver = SubscriptionResolver::new(frame_only_config(5)).unwrap();
        let world = line_world();
        let mut table = SubscriptionTable::new();

        let outcome = resolver.resolve_now(&world, &mut table);
        let report = outcome.report().expect("pass should complete");

        assert_eq!(ids(&table, 1, 100), vec![1, 2, 3, 4, 5]);
        assert_eq!(report.viewpoints, 1);
        assert_eq!(report.total_kept, 5);
        assert_eq!(report.total_trimmed, 5);
        assert_eq!(report.frame_bucket, LoadBucket::Healthy);
    }

    #[test]
    fn test_zero_cap_publishes_empty_set() {
        let mut resolver = SubscriptionResolver::new(frame_only_config(0)).unwrap();
        let world = line_world();
        let mut table = SubscriptionTable::new();

        let outcome = resolver.resolve_now(&world, &mut table);
        assert!(!outcome.is_skipped());
        let set = table.get(1, 100).expect("sink should still be called");
        assert!(set.is_empty());
    }

    #[test]
    fn test_viewpoint_without_candidates() {
        let mut resolver = SubscriptionResolver::new(frame_only_config(5)).unwrap();
        let mut world = line_world();
        world.clients[0].viewpoints[0].position = Vec3::new(10_000.0, 0.0, 10_000.0);
        let mut table = SubscriptionTable::new();

        resolver.resolve_now(&world, &mut table);
        assert!(table.get(1, 100).unwrap().is_empty());
    }

    #[test]
    fn test_ties_broken_by_id() {
        let mut resolver = SubscriptionResolver::new(frame_only_config(2)).unwrap();
        let mut world = TestWorld::default();
        world.entities = vec![
            EntityRecord::new(4, Vec3::new(100.0, 0.0, 0.0), 200.0),
            EntityRecord::new(3, Vec3::new(-100.0, 0.0, 0.0), 200.0),
            EntityRecord::new(2, Vec3::new(0.0, 0.0, 100.0), 200.0),
            EntityRecord::new(1, Vec3::new(0.0, 0.0, -100.0), 200.0),
        ];
        world
            .clients
            .push(ClientRecord::new(1, true, 0).with_viewpoint(50, Vec3::ZERO));
        let mut table = SubscriptionTable::new();

        resolver.resolve_now(&world, &mut table);
        assert_eq!(ids(&table, 1, 50), vec![1, 2]);
    }

    #[test]
    fn test_visibility_predicate_filters_before_truncation() {
        let mut resolver = SubscriptionResolver::new(frame_only_config(3)).unwrap();
        let mut world = line_world();
        world.hidden.insert((100, 1));
        world.hidden.insert((100, 2));
        let mut table = SubscriptionTable::new();

        resolver.resolve_now(&world, &mut table);
        assert_eq!(ids(&table, 1, 100), vec![3, 4, 5]);
    }

    #[test]
    fn test_visibility_radius_is_per_entity() {
        let mut resolver = SubscriptionResolver::new(frame_only_config(100)).unwrap();
        let mut world = line_world();
        // Entity 3 at x=150 can only be seen from 100 units away
        world.entities[2].visibility_radius = 100.0;
        let mut table = SubscriptionTable::new();

        resolver.resolve_now(&world, &mut table);
        assert_eq!(ids(&table, 1, 100), vec![1, 2, 4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_unready_client_and_absent_viewpoint_skipped() {
        let mut resolver = SubscriptionResolver::new(frame_only_config(5)).unwrap();
        let mut world = line_world();
        world.clients.push(ClientRecord::new(2, false, 0).with_viewpoint(200, Vec3::ZERO));
        world.clients[0]
            .viewpoints
            .insert(0, crate::game::world::Viewpoint::new(101, Vec3::new(f32::NAN, 0.0, 0.0)));
        let mut table = SubscriptionTable::new();

        let outcome = resolver.resolve_now(&world, &mut table);
        let report = outcome.report().unwrap();

        assert_eq!(report.clients, 1);
        assert_eq!(report.viewpoints, 1);
        assert_eq!(report.skipped_viewpoints, 1);
        assert!(table.get(2, 200).is_none());
        assert!(table.get(1, 101).is_none());
        assert_eq!(ids(&table, 1, 100), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_each_viewpoint_resolved_independently() {
        let mut resolver = SubscriptionResolver::new(frame_only_config(2)).unwrap();
        let mut world = line_world();
        world.clients[0]
            .viewpoints
            .push(crate::game::world::Viewpoint::new(101, Vec3::new(500.0, 0.0, 0.0)));
        let mut table = SubscriptionTable::new();

        resolver.resolve_now(&world, &mut table);
        assert_eq!(ids(&table, 1, 100), vec![1, 2]);
        assert_eq!(ids(&table, 1, 101), vec![9, 10]);
    }

    #[test]
    fn test_subscriptions_never_exceed_cap() {
        let config = ResolverConfig {
            cap_healthy: 20,
            cap_moderate: 10,
            cap_heavy: 5,
            net_cap_healthy: 15,
            net_cap_moderate: 8,
            net_cap_heavy: 3,
            ..Default::default()
        };
        let mut resolver = SubscriptionResolver::new(config).unwrap();
        let mut world = TestWorld::default();
        for i in 0..400u32 {
            let x = ((i * 37) % 300) as f32;
            let z = ((i * 53) % 300) as f32;
            world.entities.push(EntityRecord::new(i, Vec3::new(x, 0.0, z), 120.0));
        }
        let rtts = [0, 40, 100, 300];
        for c in 0..12i64 {
            let position = Vec3::new((c * 25) as f32, 0.0, (c * 20) as f32);
            world
                .clients
                .push(ClientRecord::new(c, true, rtts[c as usize % 4]).with_viewpoint(1000 + c as u32, position));
        }
        let mut table = SubscriptionTable::new();
        resolver.resolve_now(&world, &mut table);

        let expected_caps = [15, 15, 8, 3];
        for c in 0..12i64 {
            let set = table.get(c, 1000 + c as u32).unwrap();
            let cap = expected_caps[c as usize % 4];
            assert!(set.len() <= cap, "client {} kept {} over cap {}", c, set.len(), cap);
            // Dense world: every viewpoint should be saturated
            assert_eq!(set.len(), cap);
        }
    }

    #[test]
    fn test_network_tie_in_disabled_uses_frame_cap() {
        let config = ResolverConfig {
            cap_healthy: 7,
            cap_moderate: 7,
            cap_heavy: 7,
            net_cap_healthy: 2,
            net_cap_moderate: 2,
            net_cap_heavy: 2,
            tie_to_network_caps: false,
            ..Default::default()
        };
        let mut resolver = SubscriptionResolver::new(config).unwrap();
        let mut world = line_world();
        world.clients[0].rtt_ms = 900;
        let mut table = SubscriptionTable::new();

        resolver.resolve_now(&world, &mut table);
        assert_eq!(table.get(1, 100).unwrap().len(), 7);
    }

    #[test]
    fn test_high_rtt_tightens_cap() {
        let config = ResolverConfig {
            net_cap_heavy: 3,
            ..Default::default()
        };
        let mut resolver = SubscriptionResolver::new(config).unwrap();
        let mut world = line_world();
        world.clients[0].rtt_ms = 400;
        let mut table = SubscriptionTable::new();

        resolver.resolve_now(&world, &mut table);
        assert_eq!(ids(&table, 1, 100), vec![1, 2, 3]);
    }

    #[test]
    fn test_idempotent_on_unchanged_snapshot() {
        let mut resolver = SubscriptionResolver::new(frame_only_config(4)).unwrap();
        let mut world = line_world();
        world
            .clients
            .push(ClientRecord::new(2, true, 120).with_viewpoint(200, Vec3::new(260.0, 0.0, 0.0)));

        let mut first = SubscriptionTable::new();
        let mut second = SubscriptionTable::new();
        resolver.resolve_now(&world, &mut first);
        resolver.resolve_now(&world, &mut second);

        for (key, set) in first.iter() {
            assert_eq!(second.get(key.0, key.1), Some(set));
        }
        assert_eq!(first.len(), second.len());
    }

    #[test]
    fn test_degenerate_snapshot_skips_and_keeps_subscriptions() {
        let mut resolver = SubscriptionResolver::new(frame_only_config(5)).unwrap();
        let mut world = line_world();
        let mut table = SubscriptionTable::new();

        assert!(!resolver.resolve_now(&world, &mut table).is_skipped());
        let before = ids(&table, 1, 100);
        let applied = table.applied_count();
        let grid_entries = resolver.grid().unwrap().entry_count();

        for entity in &mut world.entities {
            entity.position = Vec3::new(7.0, 0.0, 7.0);
        }
        let outcome = resolver.resolve_now(&world, &mut table);

        assert_eq!(outcome, PassOutcome::Skipped { entities: 10 });
        assert_eq!(table.applied_count(), applied);
        assert_eq!(ids(&table, 1, 100), before);
        assert_eq!(resolver.grid().unwrap().entry_count(), grid_entries);
        assert_eq!(resolver.skipped_passes(), 1);
        assert_eq!(resolver.passes(), 1);
    }

    #[test]
    fn test_empty_snapshot_skips() {
        let mut resolver = SubscriptionResolver::default();
        let world = TestWorld::default();
        let mut table = SubscriptionTable::new();
        assert_eq!(
            resolver.resolve_now(&world, &mut table),
            PassOutcome::Skipped { entities: 0 }
        );
        assert!(resolver.grid().is_none());
    }

    #[test]
    fn test_xy_axis_mode() {
        let config = ResolverConfig {
            axis_mode: AxisMode::Xy,
            ..frame_only_config(2)
        };
        let mut resolver = SubscriptionResolver::new(config).unwrap();
        let mut world = TestWorld::default();
        // Far apart in Z but close in XY
        world.entities = vec![
            EntityRecord::new(1, Vec3::new(10.0, 0.0, 9_000.0), 50.0),
            EntityRecord::new(2, Vec3::new(0.0, 20.0, -9_000.0), 50.0),
            EntityRecord::new(3, Vec3::new(400.0, 400.0, 0.0), 50.0),
        ];
        world
            .clients
            .push(ClientRecord::new(1, true, 0).with_viewpoint(9, Vec3::ZERO));
        let mut table = SubscriptionTable::new();

        resolver.resolve_now(&world, &mut table);
        assert_eq!(ids(&table, 1, 9), vec![1, 2]);
    }

    #[test]
    fn test_frame_load_moves_cap_after_hysteresis() {
        let config = ResolverConfig {
            cap_healthy: 8,
            cap_moderate: 6,
            cap_heavy: 3,
            tie_to_network_caps: false,
            ..Default::default()
        };
        let start = Instant::now();
        let mut resolver = SubscriptionResolver::new_at(config, start).unwrap();
        let world = line_world();
        let mut table = SubscriptionTable::new();

        for _ in 0..10 {
            resolver.frame_monitor_mut().record_frame(Duration::from_millis(40));
        }

        let first = resolver.resolve_at(start + Duration::from_secs(1), &world, &mut table);
        assert_eq!(first.report().unwrap().frame_cap, 8);
        assert_eq!(table.get(1, 100).unwrap().len(), 8);

        let second = resolver.resolve_at(start + Duration::from_secs(2), &world, &mut table);
        assert_eq!(second.report().unwrap().frame_bucket, LoadBucket::Healthy);

        let third = resolver.resolve_at(start + Duration::from_secs(3), &world, &mut table);
        assert_eq!(third.report().unwrap().frame_bucket, LoadBucket::Heavy);
        assert_eq!(table.get(1, 100).unwrap().len(), 3);
    }

    #[test]
    fn test_update_respects_interval() {
        let mut resolver = SubscriptionResolver::default();
        let world = line_world();
        let mut table = SubscriptionTable::new();

        assert!(resolver.update(Duration::from_millis(400), &world, &mut table).is_none());
        assert!(resolver.update(Duration::from_millis(400), &world, &mut table).is_none());
        assert!(resolver.update(Duration::from_millis(400), &world, &mut table).is_some());
        // Countdown restarts from the full interval
        assert!(resolver.update(Duration::from_millis(900), &world, &mut table).is_none());
        assert!(resolver.update(Duration::from_millis(100), &world, &mut table).is_some());
        assert_eq!(resolver.passes(), 2);
    }

    #[test]
    fn test_config_channel_applies_on_next_pass() {
        let mut resolver = SubscriptionResolver::new(frame_only_config(5)).unwrap();
        let sender = resolver.config_sender();
        let world = line_world();
        let mut table = SubscriptionTable::new();

        sender.try_send(frame_only_config(2)).unwrap();
        // Invalid update is dropped, the valid one before it stays
        sender
            .try_send(ResolverConfig {
                cell_size: -1.0,
                ..Default::default()
            })
            .unwrap();

        resolver.resolve_now(&world, &mut table);
        assert_eq!(resolver.config().cap_healthy, 2);
        assert_eq!(ids(&table, 1, 100), vec![1, 2]);
    }

    #[test]
    fn test_set_config_rejects_invalid() {
        let mut resolver = SubscriptionResolver::default();
        let bad = ResolverConfig {
            cap_heavy: 1000,
            ..Default::default()
        };
        assert!(resolver.set_config(bad).is_err());
        assert_eq!(resolver.config(), &ResolverConfig::default());
        assert!(SubscriptionResolver::new(ResolverConfig {
            target_frame_ms: 0.0,
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn test_reset() {
        let mut resolver = SubscriptionResolver::default();
        let world = line_world();
        let mut table = SubscriptionTable::new();
        resolver.resolve_now(&world, &mut table);
        assert!(resolver.grid().is_some());

        resolver.reset(Instant::now());
        assert!(resolver.grid().is_none());
        assert_eq!(resolver.passes(), 0);
        assert_eq!(resolver.frame_monitor().bucket(), LoadBucket::Healthy);
    }

    #[test]
    fn test_telemetry_report_from_pass() {
        let mut resolver = SubscriptionResolver::new(frame_only_config(5)).unwrap();
        let world = line_world();
        let mut table = SubscriptionTable::new();

        resolver.resolve_now(&world, &mut table);
        let report = resolver.telemetry().last_report().expect("first pass reports");
        assert_eq!(report.viewpoints, 1);
        assert_eq!(report.hit_count(), 1);
        assert_eq!(report.samples[0].sample.trimmed, 5);
    }

    // ========================================================================
    // Range query
    // ========================================================================

    #[test]
    fn test_clients_in_range() {
        let resolver = SubscriptionResolver::default();
        let mut world = TestWorld::default();
        world.clients = vec![
            ClientRecord::new(1, true, 0).with_viewpoint(1, Vec3::new(10.0, 0.0, 0.0)),
            // Close in XZ but far in Y: the range check is 3D
            ClientRecord::new(2, true, 0).with_viewpoint(2, Vec3::new(0.0, 500.0, 0.0)),
            ClientRecord::new(3, false, 0).with_viewpoint(3, Vec3::ZERO),
            // Two viewpoints in range, listed once
            ClientRecord::new(4, true, 0)
                .with_viewpoint(4, Vec3::new(0.0, 0.0, 5.0))
                .with_viewpoint(5, Vec3::new(0.0, 0.0, -5.0)),
            ClientRecord::new(5, true, 0).with_viewpoint(6, Vec3::new(f32::NAN, 0.0, 0.0)),
        ];

        let found = resolver.clients_in_range(&world, Vec3::ZERO, 20.0);
        assert_eq!(found, vec![1, 4]);
        assert!(resolver.clients_in_range(&world, Vec3::ZERO, -1.0).is_empty());
    }

    #[test]
    fn test_clients_in_range_disabled() {
        let resolver = SubscriptionResolver::new(ResolverConfig {
            range_query_enabled: false,
            ..Default::default()
        })
        .unwrap();
        let world = line_world();
        assert!(resolver.clients_in_range(&world, Vec3::ZERO, 1000.0).is_empty());
    }

    #[test]
    fn test_unbounded_caps_do_not_overflow() {
        let config = ResolverConfig {
            cap_healthy: usize::MAX,
            cap_moderate: usize::MAX,
            cap_heavy: usize::MAX,
            tie_to_network_caps: false,
            cap_debug_sample_players: usize::MAX,
            ..Default::default()
        };
        let mut resolver = SubscriptionResolver::new(config).unwrap();
        let mut world = TestWorld::default();
        world.entities = vec![
            EntityRecord::new(1, Vec3::new(0.0, 0.0, 0.0), 100.0),
            EntityRecord::new(2, Vec3::new(30.0, 0.0, 0.0), 100.0),
        ];
        world.clients.push(
            ClientRecord::new(1, true, 0)
                .with_viewpoint(10, Vec3::new(5.0, 0.0, 0.0))
                .with_viewpoint(11, Vec3::new(25.0, 0.0, 0.0)),
        );
        let mut table = SubscriptionTable::new();

        let outcome = resolver.resolve_now(&world, &mut table);
        let report = outcome.report().unwrap();
        assert_eq!(report.viewpoints, 2);
        assert_eq!(report.total_cap, usize::MAX);
        assert_eq!(report.total_kept, 4);
        assert_eq!(ids(&table, 1, 10), vec![1, 2]);
        assert_eq!(ids(&table, 1, 11), vec![1, 2]);
    }
}
