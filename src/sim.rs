//! Seeded demo world for the standalone server and benchmarks
//!
//! Entities wander on a square arena; each client watches the entity it
//! controls and some also follow a second entity as a spectator camera.
//! A few entities are cloaked and only visible to their own viewpoint.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::game::world::{ClientRecord, ConnectionId, EntityId, EntityRecord, InterestSource};
use crate::util::vec2::Vec2;
use crate::util::vec3::Vec3;

/// Demo world parameters
#[derive(Debug, Clone, Copy)]
pub struct DemoConfig {
    pub entities: usize,
    pub clients: usize,
    pub seed: u64,
    /// Arena spans [-half_extent, half_extent] on both plane axes
    pub half_extent: f32,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            entities: 1000,
            clients: 100,
            seed: 42,
            half_extent: 2000.0,
        }
    }
}

/// Max speed in units per second
const MAX_SPEED: f32 = 120.0;
/// Velocity jitter applied per second
const STEER: f32 = 60.0;
const CLOAK_CHANCE: f64 = 0.05;
const SPECTATOR_CHANCE: f64 = 0.2;
const NOT_READY_CHANCE: f64 = 0.1;

#[derive(Debug, Clone)]
struct DemoEntity {
    position: Vec2,
    /// Height above the plane, used only by range queries
    height: f32,
    velocity: Vec2,
    radius: f32,
    cloaked: bool,
}

#[derive(Debug, Clone)]
struct DemoClient {
    connection_id: ConnectionId,
    ready: bool,
    rtt_ms: i64,
    /// Entity ids this client watches from
    viewpoints: Vec<EntityId>,
}

/// Randomly walking entities and clients
pub struct DemoWorld {
    rng: StdRng,
    half_extent: f32,
    entities: Vec<DemoEntity>,
    clients: Vec<DemoClient>,
}

impl DemoWorld {
    pub fn new(config: DemoConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let half = config.half_extent.max(1.0);

        let entities: Vec<DemoEntity> = (0..config.entities)
            .map(|_| DemoEntity {
                position: Vec2::new(rng.gen_range(-half..half), rng.gen_range(-half..half)),
                height: rng.gen_range(0.0..50.0),
                velocity: Vec2::new(
                    rng.gen_range(-MAX_SPEED..MAX_SPEED),
                    rng.gen_range(-MAX_SPEED..MAX_SPEED),
                ),
                radius: rng.gen_range(150.0..600.0),
                cloaked: rng.gen_bool(CLOAK_CHANCE),
            })
            .collect();

        let entity_count = entities.len();
        let clients = (0..config.clients.min(entity_count))
            .map(|i| {
                let mut viewpoints = vec![i as EntityId];
                if rng.gen_bool(SPECTATOR_CHANCE) {
                    viewpoints.push(rng.gen_range(0..entity_count) as EntityId);
                }
                DemoClient {
                    connection_id: i as ConnectionId + 1,
                    ready: !rng.gen_bool(NOT_READY_CHANCE),
                    rtt_ms: rng.gen_range(0..250),
                    viewpoints,
                }
            })
            .collect();

        Self {
            rng,
            half_extent: half,
            entities,
            clients,
        }
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Advance the random walk by `dt` seconds
    pub fn step(&mut self, dt: f32) {
        let half = self.half_extent;

        for entity in &mut self.entities {
            let jitter = Vec2::new(
                self.rng.gen_range(-STEER..STEER),
                self.rng.gen_range(-STEER..STEER),
            );
            entity.velocity = entity.velocity + jitter * dt;
            let speed = entity.velocity.length();
            if speed > MAX_SPEED {
                entity.velocity = entity.velocity * (MAX_SPEED / speed);
            }

            entity.position = entity.position + entity.velocity * dt;

            // Bounce off the arena edge
            if entity.position.x.abs() > half {
                entity.position.x = entity.position.x.clamp(-half, half);
                entity.velocity.x = -entity.velocity.x;
            }
            if entity.position.y.abs() > half {
                entity.position.y = entity.position.y.clamp(-half, half);
                entity.velocity.y = -entity.velocity.y;
            }
        }

        for client in &mut self.clients {
            client.rtt_ms = (client.rtt_ms + self.rng.gen_range(-5..=5)).clamp(0, 400);
        }
    }

    fn position_of(&self, id: EntityId) -> Vec3 {
        match self.entities.get(id as usize) {
            Some(entity) => Vec3::new(entity.position.x, entity.height, entity.position.y),
            None => Vec3::new(f32::NAN, f32::NAN, f32::NAN),
        }
    }
}

impl InterestSource for DemoWorld {
    fn collect_entities(&self, out: &mut Vec<EntityRecord>) {
        out.extend(self.entities.iter().enumerate().map(|(i, entity)| {
            EntityRecord::new(
                i as EntityId,
                Vec3::new(entity.position.x, entity.height, entity.position.y),
                entity.radius,
            )
        }));
    }

    fn collect_clients(&self, out: &mut Vec<ClientRecord>) {
        out.extend(self.clients.iter().map(|client| {
            client.viewpoints.iter().fold(
                ClientRecord::new(client.connection_id, client.ready, client.rtt_ms),
                |record, &id| record.with_viewpoint(id, self.position_of(id)),
            )
        }));
    }

    fn should_subscribe(&self, viewpoint: EntityId, candidate: EntityId) -> bool {
        viewpoint == candidate
            || self
                .entities
                .get(candidate as usize)
                .is_some_and(|entity| !entity.cloaked)
    }
}
