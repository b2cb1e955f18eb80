use keel_server::address::Address;
use keel_server::http::HttpResponse;
use tokio::sync::oneshot;

use crate::id::{ExecutorId, FrameworkId, SlaveId, TaskId};
use crate::protocol::{SlaveMessage, Task};

pub enum SlaveEvent {
    /// A protocol message from the master or a local executor.
    Message {
        from: Address,
        message: SlaveMessage,
    },
    /// The detector reported a (possibly absent) master.
    MasterDetected { master: Option<Address> },
    /// A linked peer stopped or its connection died.
    Exited { address: Address },
    /// Periodic scan of the status update retry buffers.
    RetryTick,
    /// Periodic liveness ping to the master.
    HeartbeatTick,
    /// The reaper observed an executor process exit.
    ExecutorExited {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        status: i32,
    },
    /// The isolation module failed to start an executor.
    ExecutorLaunchFailed {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        error: String,
    },
    HttpQuery {
        endpoint: SlaveEndpoint,
        reply: oneshot::Sender<HttpResponse>,
    },
    /// A consistent view of the slave's registries, for tests.
    Inspect {
        reply: oneshot::Sender<SlaveRegistrySnapshot>,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
pub enum SlaveEndpoint {
    Info,
    Frameworks,
    Tasks,
    Stats,
    Vars,
}

#[derive(Debug, Clone)]
pub struct SlaveRegistrySnapshot {
    pub slave_id: Option<SlaveId>,
    pub master: Option<Address>,
    pub frameworks: Vec<FrameworkRecordSnapshot>,
    /// Unacknowledged updates held for frameworks with no record.
    pub orphaned_updates: usize,
}

impl SlaveRegistrySnapshot {
    pub fn framework(&self, framework_id: &FrameworkId) -> Option<&FrameworkRecordSnapshot> {
        self.frameworks
            .iter()
            .find(|f| &f.framework_id == framework_id)
    }
}

#[derive(Debug, Clone)]
pub struct FrameworkRecordSnapshot {
    pub framework_id: FrameworkId,
    pub pending_updates: usize,
    pub executors: Vec<ExecutorRecordSnapshot>,
}

#[derive(Debug, Clone)]
pub struct ExecutorRecordSnapshot {
    pub executor_id: ExecutorId,
    pub registered: bool,
    pub queued_tasks: Vec<TaskId>,
    pub tasks: Vec<Task>,
}
