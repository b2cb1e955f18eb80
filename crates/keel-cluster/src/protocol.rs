use serde::{Deserialize, Serialize};
use uuid::Uuid;

use keel_server::address::Address;
use keel_server::codec::WireMessage;

use crate::id::{ExecutorId, FrameworkId, OfferId, SlaveId, TaskId};
use crate::resources::Resources;

/// Task lifecycle states. `Staging → Running → {Finished|Failed|Killed}`,
/// with `Lost` reachable from any non-terminal state. Terminal states are
/// absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Staging,
    Running,
    Finished,
    Failed,
    Killed,
    Lost,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Finished | TaskState::Failed | TaskState::Killed | TaskState::Lost
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskState::Staging => "STAGING",
            TaskState::Running => "RUNNING",
            TaskState::Finished => "FINISHED",
            TaskState::Failed => "FAILED",
            TaskState::Killed => "KILLED",
            TaskState::Lost => "LOST",
        };
        write!(f, "{name}")
    }
}

/// How an executor is started: a URI to fetch, the command to run, and
/// opaque initialization data handed to the executor once it registers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorInfo {
    pub executor_id: ExecutorId,
    pub uri: String,
    pub command: String,
    pub data: Vec<u8>,
    /// Resources consumed by the executor itself, on top of its tasks.
    pub resources: Resources,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkInfo {
    pub name: String,
    pub user: String,
    /// The default executor used by tasks that do not carry their own.
    pub executor: ExecutorInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaveInfo {
    pub hostname: String,
    pub public_hostname: String,
    pub resources: Resources,
}

/// A task launch requested by a framework against an offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescription {
    pub task_id: TaskId,
    pub name: String,
    pub slave_id: SlaveId,
    pub resources: Resources,
    /// Overrides the framework's default executor when present.
    pub executor: Option<ExecutorInfo>,
    pub data: Vec<u8>,
}

/// A task as recorded in the master and slave registries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub framework_id: FrameworkId,
    pub slave_id: SlaveId,
    pub executor_id: ExecutorId,
    pub name: String,
    pub resources: Resources,
    pub state: TaskState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub slave_id: SlaveId,
    pub state: TaskState,
    pub message: Option<String>,
    /// Fresh per update; acknowledgements and deduplication key on it.
    pub uuid: Uuid,
}

impl TaskStatus {
    pub fn new(task_id: TaskId, slave_id: SlaveId, state: TaskState) -> Self {
        Self {
            task_id,
            slave_id,
            state,
            message: None,
            uuid: Uuid::new_v4(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// A promise of resources on one slave to one framework.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub offer_id: OfferId,
    pub slave_id: SlaveId,
    pub hostname: String,
    pub resources: Resources,
}

/// Constraints a framework attaches when declining resources.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Filters {
    /// How long the allocator should avoid re-offering the declined
    /// resources to this framework.
    pub refuse_seconds: f64,
}

impl Default for Filters {
    fn default() -> Self {
        Self { refuse_seconds: 5.0 }
    }
}

/// A standing request for resources, forwarded to the allocator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub slave_id: Option<SlaveId>,
    pub resources: Resources,
}

/// Identity handed to an executor when the slave accepts its registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorArgs {
    pub framework_id: FrameworkId,
    pub executor_id: ExecutorId,
    pub slave_id: SlaveId,
    pub hostname: String,
    pub data: Vec<u8>,
}

/// Messages accepted by the master, from schedulers and slaves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MasterMessage {
    RegisterFramework {
        framework: FrameworkInfo,
        scheduler: Address,
    },
    ReregisterFramework {
        framework_id: FrameworkId,
        framework: FrameworkInfo,
        scheduler: Address,
    },
    UnregisterFramework {
        framework_id: FrameworkId,
    },
    ReplyToOffer {
        framework_id: FrameworkId,
        offer_id: OfferId,
        tasks: Vec<TaskDescription>,
        filters: Filters,
    },
    ReviveOffers {
        framework_id: FrameworkId,
    },
    RequestResources {
        framework_id: FrameworkId,
        requests: Vec<ResourceRequest>,
    },
    KillTask {
        framework_id: FrameworkId,
        task_id: TaskId,
    },
    /// Scheduler-to-executor data, forwarded via the slave.
    FrameworkToExecutor {
        framework_id: FrameworkId,
        slave_id: SlaveId,
        executor_id: ExecutorId,
        data: Vec<u8>,
    },
    RegisterSlave {
        slave: SlaveInfo,
    },
    ReregisterSlave {
        slave_id: SlaveId,
        slave: SlaveInfo,
        tasks: Vec<Task>,
    },
    StatusUpdate {
        framework_id: FrameworkId,
        status: TaskStatus,
    },
    ExitedExecutor {
        slave_id: SlaveId,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        status: i32,
    },
    Ping {
        slave_id: SlaveId,
    },
}

impl WireMessage for MasterMessage {
    fn tag(&self) -> &'static str {
        match self {
            MasterMessage::RegisterFramework { .. } => "RegisterFramework",
            MasterMessage::ReregisterFramework { .. } => "ReregisterFramework",
            MasterMessage::UnregisterFramework { .. } => "UnregisterFramework",
            MasterMessage::ReplyToOffer { .. } => "ReplyToOffer",
            MasterMessage::ReviveOffers { .. } => "ReviveOffers",
            MasterMessage::RequestResources { .. } => "RequestResources",
            MasterMessage::KillTask { .. } => "KillTask",
            MasterMessage::FrameworkToExecutor { .. } => "FrameworkToExecutor",
            MasterMessage::RegisterSlave { .. } => "RegisterSlave",
            MasterMessage::ReregisterSlave { .. } => "ReregisterSlave",
            MasterMessage::StatusUpdate { .. } => "StatusUpdate",
            MasterMessage::ExitedExecutor { .. } => "ExitedExecutor",
            MasterMessage::Ping { .. } => "Ping",
        }
    }
}

/// Messages accepted by a scheduler driver, from the master (and, for
/// framework messages, directly from slaves).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SchedulerMessage {
    Registered {
        framework_id: FrameworkId,
    },
    ResourceOffers {
        offers: Vec<Offer>,
    },
    RescindOffer {
        offer_id: OfferId,
    },
    StatusUpdate {
        status: TaskStatus,
    },
    FrameworkMessage {
        slave_id: SlaveId,
        executor_id: ExecutorId,
        data: Vec<u8>,
    },
    SlaveLost {
        slave_id: SlaveId,
    },
    Error {
        code: i32,
        message: String,
    },
}

impl WireMessage for SchedulerMessage {
    fn tag(&self) -> &'static str {
        match self {
            SchedulerMessage::Registered { .. } => "Registered",
            SchedulerMessage::ResourceOffers { .. } => "ResourceOffers",
            SchedulerMessage::RescindOffer { .. } => "RescindOffer",
            SchedulerMessage::StatusUpdate { .. } => "StatusUpdate",
            SchedulerMessage::FrameworkMessage { .. } => "FrameworkMessage",
            SchedulerMessage::SlaveLost { .. } => "SlaveLost",
            SchedulerMessage::Error { .. } => "Error",
        }
    }
}

/// Messages accepted by a slave, from the master and from executors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SlaveMessage {
    SlaveRegistered {
        slave_id: SlaveId,
    },
    SlaveReregistered {
        slave_id: SlaveId,
    },
    RunTask {
        framework_id: FrameworkId,
        framework: FrameworkInfo,
        scheduler: Address,
        task: TaskDescription,
    },
    KillTask {
        framework_id: FrameworkId,
        task_id: TaskId,
    },
    KillFramework {
        framework_id: FrameworkId,
    },
    /// Scheduler-to-executor data, forwarded by the master.
    FrameworkToExecutor {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        data: Vec<u8>,
    },
    /// The framework's scheduler moved; subsequent direct messages go to
    /// the new address.
    UpdateFramework {
        framework_id: FrameworkId,
        scheduler: Address,
    },
    StatusUpdateAck {
        framework_id: FrameworkId,
        task_id: TaskId,
        uuid: Uuid,
    },
    Pong,
    RegisterExecutor {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
    },
    StatusUpdate {
        framework_id: FrameworkId,
        status: TaskStatus,
    },
    /// Executor-to-scheduler data, sent on to the scheduler directly.
    ExecutorToFramework {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        data: Vec<u8>,
    },
}

impl WireMessage for SlaveMessage {
    fn tag(&self) -> &'static str {
        match self {
            SlaveMessage::SlaveRegistered { .. } => "SlaveRegistered",
            SlaveMessage::SlaveReregistered { .. } => "SlaveReregistered",
            SlaveMessage::RunTask { .. } => "RunTask",
            SlaveMessage::KillTask { .. } => "KillTask",
            SlaveMessage::KillFramework { .. } => "KillFramework",
            SlaveMessage::FrameworkToExecutor { .. } => "FrameworkToExecutor",
            SlaveMessage::UpdateFramework { .. } => "UpdateFramework",
            SlaveMessage::StatusUpdateAck { .. } => "StatusUpdateAck",
            SlaveMessage::Pong => "Pong",
            SlaveMessage::RegisterExecutor { .. } => "RegisterExecutor",
            SlaveMessage::StatusUpdate { .. } => "StatusUpdate",
            SlaveMessage::ExecutorToFramework { .. } => "ExecutorToFramework",
        }
    }
}

/// Messages accepted by an executor driver, from its slave.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutorMessage {
    ExecutorRegistered {
        args: ExecutorArgs,
    },
    RunTask {
        task: TaskDescription,
    },
    KillTask {
        task_id: TaskId,
    },
    FrameworkMessage {
        data: Vec<u8>,
    },
    KillExecutor,
}

impl WireMessage for ExecutorMessage {
    fn tag(&self) -> &'static str {
        match self {
            ExecutorMessage::ExecutorRegistered { .. } => "ExecutorRegistered",
            ExecutorMessage::RunTask { .. } => "RunTask",
            ExecutorMessage::KillTask { .. } => "KillTask",
            ExecutorMessage::FrameworkMessage { .. } => "FrameworkMessage",
            ExecutorMessage::KillExecutor => "KillExecutor",
        }
    }
}

#[cfg(test)]
mod tests {
    use keel_server::codec::{decode_payload, encode_payload};

    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!TaskState::Staging.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        for state in [
            TaskState::Finished,
            TaskState::Failed,
            TaskState::Killed,
            TaskState::Lost,
        ] {
            assert!(state.is_terminal());
        }
    }

    #[test]
    fn test_status_update_payload_round_trip() {
        let status = TaskStatus::new(
            TaskId::new("t-1"),
            SlaveId::new("s-1"),
            TaskState::Finished,
        )
        .with_message("done");
        let message = MasterMessage::StatusUpdate {
            framework_id: FrameworkId::new("fw-1"),
            status: status.clone(),
        };
        assert_eq!(message.tag(), "StatusUpdate");
        let bytes = encode_payload(&message).unwrap();
        let decoded: MasterMessage = decode_payload(&bytes).unwrap();
        match decoded {
            MasterMessage::StatusUpdate {
                framework_id,
                status: decoded,
            } => {
                assert_eq!(framework_id, FrameworkId::new("fw-1"));
                assert_eq!(decoded, status);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
