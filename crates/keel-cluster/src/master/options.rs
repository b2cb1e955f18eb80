use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::allocator::{Allocator, SimpleAllocator};

pub struct MasterOptions {
    /// Prefix baked into every minted id, unique per master session.
    pub id_prefix: String,
    /// How often the allocator is consulted without another trigger.
    pub allocation_interval: Duration,
    /// Grace period before a disconnected framework is unregistered.
    pub framework_failover_timeout: Duration,
    /// A slave silent for this long is declared lost.
    pub slave_heartbeat_timeout: Duration,
    /// Reject a whole offer reply when any task in it is invalid, instead
    /// of the default per-task rejection.
    pub atomic_offer_replies: bool,
    pub allocator: Box<dyn Allocator>,
}

impl Default for MasterOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl MasterOptions {
    pub fn new() -> Self {
        let session = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            id_prefix: format!("{session:x}"),
            allocation_interval: Duration::from_secs(1),
            framework_failover_timeout: Duration::from_secs(60),
            slave_heartbeat_timeout: Duration::from_secs(40),
            atomic_offer_replies: false,
            allocator: Box::new(SimpleAllocator::new()),
        }
    }

    pub fn with_allocator(mut self, allocator: Box<dyn Allocator>) -> Self {
        self.allocator = allocator;
        self
    }
}
