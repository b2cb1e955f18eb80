use keel_server::address::Address;
use keel_server::http::HttpResponse;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::id::{FrameworkId, OfferId, SlaveId};
use crate::protocol::{MasterMessage, Task};
use crate::resources::Resources;

pub enum MasterEvent {
    /// A protocol message from a scheduler or a slave.
    Message {
        from: Address,
        message: MasterMessage,
    },
    /// A linked peer stopped or its connection died.
    Exited { address: Address },
    /// The failover window of a disconnected framework ran out. Ignored
    /// if the framework reconnected in the meantime (the epoch moved on).
    FrameworkFailoverTimeout {
        framework_id: FrameworkId,
        epoch: u64,
    },
    /// Check that the slave has sent a heartbeat since `instant`.
    ProbeSlaveHeartbeat {
        slave_id: SlaveId,
        instant: Instant,
    },
    /// Periodic allocator consultation.
    AllocationTick,
    HttpQuery {
        endpoint: MasterEndpoint,
        reply: oneshot::Sender<HttpResponse>,
    },
    /// A consistent view of the registries, for tests and tooling.
    Inspect {
        reply: oneshot::Sender<MasterSnapshot>,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
pub enum MasterEndpoint {
    Info,
    Frameworks,
    Tasks,
    Stats,
    Vars,
}

#[derive(Debug, Clone)]
pub struct MasterSnapshot {
    pub frameworks: Vec<FrameworkSnapshot>,
    pub slaves: Vec<SlaveSnapshot>,
    pub offers: Vec<OfferSnapshot>,
}

impl MasterSnapshot {
    pub fn framework(&self, framework_id: &FrameworkId) -> Option<&FrameworkSnapshot> {
        self.frameworks
            .iter()
            .find(|f| &f.framework_id == framework_id)
    }

    pub fn slave(&self, slave_id: &SlaveId) -> Option<&SlaveSnapshot> {
        self.slaves.iter().find(|s| &s.slave_id == slave_id)
    }
}

#[derive(Debug, Clone)]
pub struct FrameworkSnapshot {
    pub framework_id: FrameworkId,
    pub name: String,
    pub active: bool,
    pub tasks: Vec<Task>,
    pub offers: Vec<OfferId>,
}

#[derive(Debug, Clone)]
pub struct SlaveSnapshot {
    pub slave_id: SlaveId,
    pub hostname: String,
    pub total: Resources,
    pub available: Resources,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone)]
pub struct OfferSnapshot {
    pub offer_id: OfferId,
    pub framework_id: FrameworkId,
    pub slave_id: SlaveId,
    pub resources: Resources,
}
