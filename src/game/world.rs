//! Seams between the interest resolver and the host simulation
//!
//! The resolver never owns entities or connections. It reads them through
//! [`InterestSource`] once per pass and hands its decisions to a
//! [`SubscriptionSink`].

use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;

use crate::util::vec3::Vec3;

/// Opaque entity identifier assigned by the host
pub type EntityId = u32;

/// Connection identifier assigned by the transport
pub type ConnectionId = i64;

/// Set of entity ids a viewpoint is subscribed to
pub type SubscriptionSet = HashSet<EntityId>;

/// One live entity as seen by the resolver
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityRecord {
    pub id: EntityId,
    pub position: Vec3,
    /// How far away clients may see this entity
    pub visibility_radius: f32,
}

impl EntityRecord {
    pub fn new(id: EntityId, position: Vec3, visibility_radius: f32) -> Self {
        Self {
            id,
            position,
            visibility_radius,
        }
    }
}

/// A position a client observes the world from (usually an entity it controls)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewpoint {
    pub entity_id: EntityId,
    pub position: Vec3,
}

impl Viewpoint {
    pub fn new(entity_id: EntityId, position: Vec3) -> Self {
        Self {
            entity_id,
            position,
        }
    }

    /// A viewpoint whose entity has despawned reports a non-finite position
    #[inline]
    pub fn is_present(&self) -> bool {
        self.position.is_finite()
    }
}

/// One connected client as seen by the resolver
#[derive(Debug, Clone, PartialEq)]
pub struct ClientRecord {
    pub connection_id: ConnectionId,
    /// Whether the client should receive any subscriptions
    pub ready: bool,
    /// Round-trip time in ms; zero or negative means not measured yet
    pub rtt_ms: i64,
    pub viewpoints: SmallVec<[Viewpoint; 2]>,
}

impl ClientRecord {
    pub fn new(connection_id: ConnectionId, ready: bool, rtt_ms: i64) -> Self {
        Self {
            connection_id,
            ready,
            rtt_ms,
            viewpoints: SmallVec::new(),
        }
    }

    pub fn with_viewpoint(mut self, entity_id: EntityId, position: Vec3) -> Self {
        self.viewpoints.push(Viewpoint::new(entity_id, position));
        self
    }
}

/// Read-only view of the host simulation
pub trait InterestSource {
    /// Append every live entity to `out`
    fn collect_entities(&self, out: &mut Vec<EntityRecord>);

    /// Append every connected client to `out`
    fn collect_clients(&self, out: &mut Vec<ClientRecord>);

    /// Game-rule filter applied after spatial containment (teams, stealth, dead entities)
    fn should_subscribe(&self, _viewpoint: EntityId, _candidate: EntityId) -> bool {
        true
    }
}

/// Receiver of per-viewpoint subscription decisions
pub trait SubscriptionSink {
    /// Replace the subscription set of `viewpoint` owned by `connection_id`
    fn apply_subscriptions(
        &mut self,
        connection_id: ConnectionId,
        viewpoint: EntityId,
        subscriptions: SubscriptionSet,
    );
}

/// Subscription sink that keeps the latest set per viewpoint
///
/// Hosts without their own session storage can use this directly and read
/// the sets back when serializing updates.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    sets: HashMap<(ConnectionId, EntityId), SubscriptionSet>,
    applied: u64,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, connection_id: ConnectionId, viewpoint: EntityId) -> Option<&SubscriptionSet> {
        self.sets.get(&(connection_id, viewpoint))
    }

    /// Drop every set belonging to a disconnected client
    pub fn remove_connection(&mut self, connection_id: ConnectionId) {
        self.sets.retain(|(conn, _), _| *conn != connection_id);
    }

    /// Number of viewpoints with a stored set
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Total number of `apply_subscriptions` calls received
    pub fn applied_count(&self) -> u64 {
        self.applied
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(ConnectionId, EntityId), &SubscriptionSet)> {
        self.sets.iter()
    }
}

impl SubscriptionSink for SubscriptionTable {
    fn apply_subscriptions(
        &mut self,
        connection_id: ConnectionId,
        viewpoint: EntityId,
        subscriptions: SubscriptionSet,
    ) {
        self.applied += 1;
        self.sets.insert((connection_id, viewpoint), subscriptions);
    }
}
