//! Lock-free channel for runtime config changes
//!
//! Admin tasks push new configs without touching the resolver; the resolver
//! drains the channel at the start of each pass and applies the newest
//! valid config.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use thiserror::Error;

use crate::config::ResolverConfig;

/// Default number of queued updates before senders see backpressure
const DEFAULT_CAPACITY: usize = 16;

/// Config channel errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigUpdateError {
    #[error("config update queue is full")]
    Full,
    #[error("resolver has been dropped")]
    Disconnected,
}

/// Receiving side, owned by the resolver
pub struct ConfigUpdates {
    sender: Sender<ResolverConfig>,
    receiver: Receiver<ResolverConfig>,
}

impl ConfigUpdates {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self { sender, receiver }
    }

    /// Create a new sender handle
    pub fn sender(&self) -> ConfigUpdateSender {
        ConfigUpdateSender {
            sender: self.sender.clone(),
        }
    }

    /// Drain every pending update in arrival order
    pub fn drain(&self) -> Vec<ResolverConfig> {
        self.receiver.try_iter().collect()
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }
}

impl Default for ConfigUpdates {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Clonable sender handle for admin tasks
#[derive(Clone)]
pub struct ConfigUpdateSender {
    sender: Sender<ResolverConfig>,
}

impl ConfigUpdateSender {
    /// Queue a config (non-blocking)
    pub fn try_send(&self, config: ResolverConfig) -> Result<(), ConfigUpdateError> {
        self.sender.try_send(config).map_err(|e| match e {
            TrySendError::Full(_) => ConfigUpdateError::Full,
            TrySendError::Disconnected(_) => ConfigUpdateError::Disconnected,
        })
    }
}
