mod actor;

use std::path::PathBuf;

use keel_common::env;
use keel_server::actor::{ActorHandle, ActorSystem};
use keel_server::address::Address;

use crate::error::{ClusterError, ClusterResult};
use crate::id::{ExecutorId, FrameworkId, TaskId};
use crate::protocol::{ExecutorArgs, ExecutorMessage, TaskDescription, TaskState};

use self::actor::{ExecActor, ExecActorOptions, ExecEvent};

/// Callbacks a framework's executor implements. Invoked on the driver's
/// actor, one at a time.
pub trait Executor: Send + 'static {
    fn init(&mut self, driver: &ExecutorDriverClient, args: &ExecutorArgs);
    fn launch_task(&mut self, driver: &ExecutorDriverClient, task: &TaskDescription);
    fn kill_task(&mut self, driver: &ExecutorDriverClient, task_id: &TaskId);
    fn framework_message(&mut self, driver: &ExecutorDriverClient, data: &[u8]);
    fn shutdown(&mut self, driver: &ExecutorDriverClient);
    fn error(&mut self, driver: &ExecutorDriverClient, code: i32, message: &str);
}

/// Who this executor is and which slave it belongs to. Real executor
/// processes read this from the environment the slave prepared; the
/// in-process isolation passes it directly.
#[derive(Debug, Clone)]
pub struct ExecutorIdentity {
    pub framework_id: FrameworkId,
    pub executor_id: ExecutorId,
    pub slave: Address,
    pub directory: PathBuf,
}

impl ExecutorIdentity {
    pub fn from_env() -> ClusterResult<Self> {
        let required = |name: &str| {
            env::var(name)
                .ok_or_else(|| ClusterError::InternalError(format!("{name} is not set")))
        };
        Ok(Self {
            framework_id: FrameworkId::new(required(env::ENV_FRAMEWORK_ID)?),
            executor_id: ExecutorId::new(required(env::ENV_EXECUTOR_ID)?),
            slave: required(env::ENV_SLAVE_ADDRESS)?
                .parse::<Address>()
                .map_err(ClusterError::from)?,
            directory: PathBuf::from(required(env::ENV_DIRECTORY)?),
        })
    }
}

/// Handle used to issue operations from inside callbacks or from other
/// threads. Operations issued before the slave accepts the registration
/// are buffered and flushed on acceptance.
#[derive(Clone)]
pub struct ExecutorDriverClient {
    handle: ActorHandle<ExecActor>,
}

impl ExecutorDriverClient {
    pub fn send_status_update(
        &self,
        task_id: TaskId,
        state: TaskState,
        message: Option<String>,
    ) {
        self.handle.send(ExecEvent::SendStatusUpdate {
            task_id,
            state,
            message,
        });
    }

    pub fn send_framework_message(&self, data: Vec<u8>) {
        self.handle.send(ExecEvent::SendFrameworkMessage { data });
    }

    pub fn stop(&self) {
        self.handle.send(ExecEvent::Stop);
    }
}

/// The library actor an executor process links against: registers with
/// the local slave, translates protocol messages into [Executor]
/// callbacks, and sends status updates back.
pub struct ExecutorDriver {
    system: ActorSystem,
    identity: ExecutorIdentity,
    executor: Option<Box<dyn Executor>>,
    handle: Option<ActorHandle<ExecActor>>,
    owns_endpoint: bool,
}

impl ExecutorDriver {
    /// A driver for a standalone executor process; identity comes from
    /// the environment prepared by the slave.
    pub fn new(executor: Box<dyn Executor>) -> ClusterResult<Self> {
        Ok(Self {
            system: ActorSystem::new(),
            identity: ExecutorIdentity::from_env()?,
            executor: Some(executor),
            handle: None,
            owns_endpoint: true,
        })
    }

    /// A driver running inside an existing actor system (local clusters
    /// and tests).
    pub fn local(
        system: ActorSystem,
        executor: Box<dyn Executor>,
        identity: ExecutorIdentity,
    ) -> Self {
        Self {
            system,
            identity,
            executor: Some(executor),
            handle: None,
            owns_endpoint: false,
        }
    }

    pub async fn start(&mut self) -> ClusterResult<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        let executor = self
            .executor
            .take()
            .ok_or_else(|| ClusterError::InternalError("driver cannot be restarted".into()))?;
        if self.owns_endpoint {
            self.system.listen("127.0.0.1", 0).await?;
        }
        let name = format!(
            "executor-{}-{}",
            self.identity.framework_id, self.identity.executor_id
        );
        let handle = self.system.spawn::<ExecActor>(
            &name,
            ExecActorOptions {
                executor,
                identity: self.identity.clone(),
            },
        );
        self.system
            .expose::<ExecActor, ExecutorMessage, _>(&handle, |message, from| {
                ExecEvent::Message { from, message }
            });
        self.handle = Some(handle);
        Ok(())
    }

    pub fn client(&self) -> ClusterResult<ExecutorDriverClient> {
        self.handle
            .as_ref()
            .map(|handle| ExecutorDriverClient {
                handle: handle.clone(),
            })
            .ok_or(ClusterError::DriverNotRunning)
    }

    pub fn stop(&self) {
        if let Some(handle) = &self.handle {
            handle.send(ExecEvent::Stop);
        }
    }

    pub async fn join(&self) {
        if let Some(handle) = &self.handle {
            handle.clone().wait_for_stop().await;
        }
    }

    pub async fn run(&mut self) -> ClusterResult<()> {
        self.start().await?;
        self.join().await;
        Ok(())
    }
}
