use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use keel_common::env;
use keel_server::actor::ActorSystem;
use keel_server::address::Address;
use log::{debug, info, warn};
use tokio::process::{Child, Command};

use crate::error::{ClusterError, ClusterResult};
use crate::exec::{Executor, ExecutorDriver, ExecutorIdentity};
use crate::id::{ExecutorId, FrameworkId};
use crate::protocol::{ExecutorInfo, FrameworkInfo};
use crate::resources::Resources;

/// Everything needed to start one executor run.
pub struct ExecutorLaunch {
    pub framework_id: FrameworkId,
    pub framework: FrameworkInfo,
    pub executor: ExecutorInfo,
    pub directory: PathBuf,
    /// The slave the executor should register with.
    pub slave: Address,
}

/// Forks executor processes and enforces their resource limits. The slave
/// depends only on this interface; process containment beyond plain forks
/// plugs in here.
#[async_trait]
pub trait IsolationModule: Send + Sync + 'static {
    /// Start the executor. Returns the child process for the reaper to
    /// watch, or [None] when the executor runs in-process.
    async fn launch_executor(&self, launch: ExecutorLaunch) -> ClusterResult<Option<Child>>;

    /// The executor's resource envelope changed (a task was added or
    /// removed); enforce the new limits.
    async fn resources_changed(
        &self,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
        resources: &Resources,
    );

    /// Forcibly stop the executor.
    async fn kill_executor(&self, framework_id: &FrameworkId, executor_id: &ExecutorId);
}

/// Runs each executor as a plain child process with its work directory as
/// the working directory and stdio captured into files there.
pub struct ProcessIsolation;

#[async_trait]
impl IsolationModule for ProcessIsolation {
    async fn launch_executor(&self, launch: ExecutorLaunch) -> ClusterResult<Option<Child>> {
        tokio::fs::create_dir_all(&launch.directory).await?;
        let executor = &launch.executor;
        let mut command = if executor.command.is_empty() {
            Command::new(&executor.uri)
        } else {
            let mut command = Command::new("/bin/sh");
            command.arg("-c").arg(&executor.command);
            command
        };
        let stdout = std::fs::File::create(launch.directory.join("stdout"))?;
        let stderr = std::fs::File::create(launch.directory.join("stderr"))?;
        command
            .current_dir(&launch.directory)
            .env(env::ENV_FRAMEWORK_ID, launch.framework_id.to_string())
            .env(env::ENV_EXECUTOR_ID, executor.executor_id.to_string())
            .env(env::ENV_EXECUTOR_URI, &executor.uri)
            .env(env::ENV_SLAVE_ADDRESS, launch.slave.to_string())
            .env(env::ENV_DIRECTORY, &launch.directory)
            .env(env::ENV_USER, &launch.framework.user)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        let child = command.spawn()?;
        info!(
            "launched executor '{}' of framework {} in {} (pid {:?})",
            executor.executor_id,
            launch.framework_id,
            launch.directory.display(),
            child.id()
        );
        Ok(Some(child))
    }

    async fn resources_changed(
        &self,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
        resources: &Resources,
    ) {
        // Plain processes have no enforceable limits; containment-aware
        // modules apply them here.
        debug!(
            "executor '{executor_id}' of framework {framework_id} now limited to {resources}"
        );
    }

    async fn kill_executor(&self, framework_id: &FrameworkId, executor_id: &ExecutorId) {
        // The reaper owns the child handle and delivers the kill.
        debug!("kill requested for executor '{executor_id}' of framework {framework_id}");
    }
}

type ExecutorFactory = Box<dyn Fn() -> Box<dyn Executor> + Send + Sync>;

/// Runs executors as in-process actors on a shared actor system. Used by
/// the local cluster and the test suites in place of real processes.
pub struct LocalIsolation {
    system: ActorSystem,
    factories: Mutex<HashMap<ExecutorId, ExecutorFactory>>,
    drivers: Mutex<HashMap<(FrameworkId, ExecutorId), ExecutorDriver>>,
}

impl LocalIsolation {
    pub fn new(system: ActorSystem) -> Self {
        Self {
            system,
            factories: Mutex::new(HashMap::new()),
            drivers: Mutex::new(HashMap::new()),
        }
    }

    /// Provide the executor implementation launched for `executor_id`.
    pub fn register_executor<F>(&self, executor_id: ExecutorId, factory: F)
    where
        F: Fn() -> Box<dyn Executor> + Send + Sync + 'static,
    {
        if let Ok(mut factories) = self.factories.lock() {
            factories.insert(executor_id, Box::new(factory));
        }
    }
}

#[async_trait]
impl IsolationModule for LocalIsolation {
    async fn launch_executor(&self, launch: ExecutorLaunch) -> ClusterResult<Option<Child>> {
        let executor_id = launch.executor.executor_id.clone();
        let executor = {
            let factories = self
                .factories
                .lock()
                .map_err(|_| ClusterError::InternalError("factory registry poisoned".into()))?;
            match factories.get(&executor_id) {
                Some(factory) => factory(),
                None => {
                    return Err(ClusterError::InternalError(format!(
                        "no executor registered for '{executor_id}'"
                    )))
                }
            }
        };
        let identity = ExecutorIdentity {
            framework_id: launch.framework_id.clone(),
            executor_id: executor_id.clone(),
            slave: launch.slave.clone(),
            directory: launch.directory.clone(),
        };
        let mut driver = ExecutorDriver::local(self.system.clone(), executor, identity);
        driver.start().await?;
        if let Ok(mut drivers) = self.drivers.lock() {
            drivers.insert((launch.framework_id, executor_id), driver);
        }
        Ok(None)
    }

    async fn resources_changed(
        &self,
        _framework_id: &FrameworkId,
        _executor_id: &ExecutorId,
        _resources: &Resources,
    ) {
    }

    async fn kill_executor(&self, framework_id: &FrameworkId, executor_id: &ExecutorId) {
        let driver = self
            .drivers
            .lock()
            .ok()
            .and_then(|mut d| d.remove(&(framework_id.clone(), executor_id.clone())));
        match driver {
            Some(driver) => driver.stop(),
            None => warn!(
                "no in-process executor '{executor_id}' of framework {framework_id} to kill"
            ),
        }
    }
}
