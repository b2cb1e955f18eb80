use keel_server::actor::ActorContext;
use keel_server::address::Address;
use log::{info, warn};
use tokio::time::Instant;
use uuid::Uuid;

use crate::id::{ExecutorId, FrameworkId, SlaveId, TaskId};
use crate::protocol::{
    ExecutorArgs, ExecutorMessage, FrameworkInfo, MasterMessage, SlaveInfo, Task,
    TaskDescription, TaskState, TaskStatus,
};
use crate::slave::event::SlaveEvent;
use crate::slave::isolation::ExecutorLaunch;
use crate::slave::options::{MASTER_RECONNECT_DELAY, RETRY_SCAN_INTERVAL};
use crate::slave::reaper::ReaperEvent;
use crate::slave::state::{
    unique_work_directory, ExecutorRecord, ExecutorRegistration, FrameworkRecord,
};
use crate::slave::SlaveActor;

impl SlaveActor {
    fn slave_info(&self) -> SlaveInfo {
        SlaveInfo {
            hostname: self.hostname.clone(),
            public_hostname: self.public_hostname.clone(),
            resources: self.options.resources.clone(),
        }
    }

    fn slave_id_or_blank(&self) -> SlaveId {
        self.state
            .slave_id
            .clone()
            .unwrap_or_else(|| SlaveId::new(""))
    }

    pub(super) fn handle_master_detected(
        &mut self,
        ctx: &mut ActorContext<Self>,
        master: Option<Address>,
    ) {
        let Some(master) = master else {
            info!("lost master(s); waiting for a new one");
            return;
        };
        info!("new master detected at {master}");
        self.state.master = Some(master.clone());
        ctx.link(&master, |address| SlaveEvent::Exited { address });
        match self.state.slave_id.clone() {
            None => {
                ctx.post(
                    &master,
                    &MasterMessage::RegisterSlave {
                        slave: self.slave_info(),
                    },
                );
            }
            Some(slave_id) => {
                // Re-registering after a restart or a master failover, so
                // report the tasks still running here.
                ctx.post(
                    &master,
                    &MasterMessage::ReregisterSlave {
                        slave_id,
                        slave: self.slave_info(),
                        tasks: self.state.running_tasks(),
                    },
                );
            }
        }
    }

    pub(super) fn handle_slave_reregistered(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        slave_id: SlaveId,
    ) {
        info!("re-registered with master");
        match &self.state.slave_id {
            Some(current) if current != &slave_id => {
                // The master must hand back the id we registered under.
                warn!("re-registered with mismatched slave id {slave_id} (expected {current})");
            }
            _ => self.state.slave_id = Some(slave_id),
        }
    }

    pub(super) fn handle_run_task(
        &mut self,
        ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
        framework: FrameworkInfo,
        scheduler: Address,
        task: TaskDescription,
    ) {
        info!(
            "got assigned task {} for framework {framework_id}",
            task.task_id
        );
        self.stats.launched_tasks += 1;
        if self.state.get_framework(&framework_id).is_none() {
            self.state.add_framework(FrameworkRecord {
                framework_id: framework_id.clone(),
                info: framework.clone(),
                scheduler: scheduler.clone(),
                executors: Default::default(),
                pending_updates: Default::default(),
            });
        } else if let Some(record) = self.state.get_framework_mut(&framework_id) {
            record.scheduler = scheduler.clone();
        }

        let executor_info = task
            .executor
            .clone()
            .unwrap_or_else(|| framework.executor.clone());
        let executor_id = executor_info.executor_id.clone();
        let slave_id = self.slave_id_or_blank();
        let work_dir = self.options.work_dir.clone();
        let isolation = self.options.isolation.clone();

        let Some(record) = self.state.get_framework_mut(&framework_id) else {
            return;
        };
        match record.executors.get_mut(&executor_id) {
            Some(executor) => match executor.registration.clone() {
                ExecutorRegistration::Launching => {
                    // Queue until the executor comes up.
                    executor.queued_tasks.push(task);
                }
                ExecutorRegistration::Registered(address) => {
                    let resources = match executor.resources.add(&task.resources) {
                        Ok(resources) => resources,
                        Err(e) => {
                            warn!("failed to grow executor resources: {e}");
                            executor.resources.clone()
                        }
                    };
                    executor.resources = resources.clone();
                    executor.tasks.insert(
                        task.task_id.clone(),
                        Task {
                            task_id: task.task_id.clone(),
                            framework_id: framework_id.clone(),
                            slave_id,
                            executor_id: executor_id.clone(),
                            name: task.name.clone(),
                            resources: task.resources.clone(),
                            state: TaskState::Staging,
                        },
                    );
                    ctx.post(&address, &ExecutorMessage::RunTask { task });
                    ctx.spawn(async move {
                        isolation
                            .resources_changed(&framework_id, &executor_id, &resources)
                            .await;
                    });
                }
                ExecutorRegistration::Dead => {
                    // The executor died before this launch arrived.
                    self.report_lost_task(
                        ctx,
                        &framework_id,
                        task.task_id,
                        "executor exited before the task could be delivered",
                    );
                }
            },
            None => {
                let directory =
                    unique_work_directory(&work_dir, &slave_id, &framework_id, &executor_id);
                info!(
                    "launching executor '{executor_id}' of framework {framework_id} in {}",
                    directory.display()
                );
                record.executors.insert(
                    executor_id.clone(),
                    ExecutorRecord {
                        info: executor_info.clone(),
                        directory: directory.clone(),
                        registration: ExecutorRegistration::Launching,
                        queued_tasks: vec![task],
                        tasks: Default::default(),
                        resources: executor_info.resources.clone(),
                    },
                );
                let launch = ExecutorLaunch {
                    framework_id: framework_id.clone(),
                    framework,
                    executor: executor_info,
                    directory,
                    slave: ctx.address().clone(),
                };
                let reaper = self.reaper.clone();
                let slave = ctx.handle().clone();
                ctx.spawn(async move {
                    match isolation.launch_executor(launch).await {
                        Ok(Some(child)) => {
                            if let Some(reaper) = reaper {
                                reaper.send(ReaperEvent::Watch {
                                    framework_id,
                                    executor_id,
                                    child,
                                });
                            }
                        }
                        Ok(None) => {}
                        Err(e) => slave.send(SlaveEvent::ExecutorLaunchFailed {
                            framework_id,
                            executor_id,
                            error: e.to_string(),
                        }),
                    }
                });
            }
        }
    }

    pub(super) fn handle_kill_task(
        &mut self,
        ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
        task_id: TaskId,
    ) {
        info!("asked to kill task {task_id} of framework {framework_id}");
        let Some(framework) = self.state.get_framework(&framework_id) else {
            warn!("cannot kill task {task_id}: framework {framework_id} is not running here");
            self.report_lost_task(ctx, &framework_id, task_id, "framework is unknown");
            return;
        };
        let Some(executor_id) = framework.executor_for_task(&task_id).cloned() else {
            // Unknown task: report it lost without touching any executor.
            self.report_lost_task(ctx, &framework_id, task_id, "task is unknown");
            return;
        };
        let executor_address = framework
            .executors
            .get(&executor_id)
            .and_then(|e| e.address().cloned());
        match executor_address {
            Some(address) => {
                // The executor owns the task now; it will answer with a
                // terminal status update.
                ctx.post(&address, &ExecutorMessage::KillTask { task_id });
            }
            None => {
                // Not registered yet: drop the queued task and report it
                // lost locally.
                if let Some(executor) = self
                    .state
                    .get_framework_mut(&framework_id)
                    .and_then(|f| f.executors.get_mut(&executor_id))
                {
                    executor.queued_tasks.retain(|t| t.task_id != task_id);
                    executor.tasks.remove(&task_id);
                }
                self.report_lost_task(ctx, &framework_id, task_id, "executor never started");
            }
        }
    }

    pub(super) fn handle_kill_framework(
        &mut self,
        ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
    ) {
        info!("asked to kill framework {framework_id}");
        let Some(framework) = self.state.remove_framework(&framework_id) else {
            warn!("framework {framework_id} is not running here");
            return;
        };
        let isolation = self.options.isolation.clone();
        for (executor_id, executor) in framework.executors {
            info!("killing executor '{executor_id}' of framework {framework_id}");
            if let Some(address) = executor.address() {
                ctx.post(address, &ExecutorMessage::KillExecutor);
            }
            if let Some(reaper) = &self.reaper {
                reaper.send(ReaperEvent::Kill {
                    framework_id: framework_id.clone(),
                    executor_id: executor_id.clone(),
                });
            }
            let isolation = isolation.clone();
            let framework_id = framework_id.clone();
            ctx.spawn(async move {
                isolation.kill_executor(&framework_id, &executor_id).await;
            });
        }
    }

    pub(super) fn handle_framework_to_executor(
        &mut self,
        ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        data: Vec<u8>,
    ) {
        let address = self
            .state
            .get_framework(&framework_id)
            .and_then(|f| f.executors.get(&executor_id))
            .and_then(|e| e.address().cloned());
        match address {
            Some(address) => {
                self.stats.valid_framework_messages += 1;
                ctx.post(&address, &ExecutorMessage::FrameworkMessage { data });
            }
            None => {
                // Messages for absent or still-launching executors are
                // dropped rather than queued.
                warn!(
                    "dropping message for executor '{executor_id}' of framework {framework_id}"
                );
                self.stats.invalid_framework_messages += 1;
            }
        }
    }

    pub(super) fn handle_update_framework(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
        scheduler: Address,
    ) {
        if let Some(framework) = self.state.get_framework_mut(&framework_id) {
            info!("updating framework {framework_id} scheduler to {scheduler}");
            framework.scheduler = scheduler;
        }
    }

    pub(super) fn handle_status_update_ack(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
        task_id: TaskId,
        uuid: Uuid,
    ) {
        if !self.state.ack_update(&framework_id, &task_id, &uuid) {
            warn!(
                "acknowledgement for unknown status update of task {task_id} \
                 of framework {framework_id}"
            );
        }
        self.reap_framework_if_idle(&framework_id);
    }

    pub(super) fn handle_register_executor(
        &mut self,
        ctx: &mut ActorContext<Self>,
        from: Address,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
    ) {
        info!("got registration for executor '{executor_id}' of framework {framework_id}");
        let slave_id = self.slave_id_or_blank();
        let hostname = self.hostname.clone();
        let isolation = self.options.isolation.clone();
        let Some(framework) = self.state.get_framework_mut(&framework_id) else {
            // Framework is gone (it may have been killed); tell the
            // executor to exit.
            warn!("framework {framework_id} does not exist; telling executor to exit");
            ctx.post(&from, &ExecutorMessage::KillExecutor);
            return;
        };
        let data = framework.info.executor.data.clone();
        match framework.executors.get_mut(&executor_id) {
            None => {
                warn!("not expecting executor '{executor_id}' of framework {framework_id}");
                ctx.post(&from, &ExecutorMessage::KillExecutor);
            }
            Some(executor) if executor.address().is_some() => {
                warn!(
                    "executor '{executor_id}' of framework {framework_id} is already running"
                );
                ctx.post(&from, &ExecutorMessage::KillExecutor);
            }
            Some(executor) => {
                executor.registration = ExecutorRegistration::Registered(from.clone());
                ctx.post(
                    &from,
                    &ExecutorMessage::ExecutorRegistered {
                        args: ExecutorArgs {
                            framework_id: framework_id.clone(),
                            executor_id: executor_id.clone(),
                            slave_id: slave_id.clone(),
                            hostname,
                            data,
                        },
                    },
                );
                // Flush the tasks that queued while the executor started.
                let queued = std::mem::take(&mut executor.queued_tasks);
                for task in queued {
                    executor.tasks.insert(
                        task.task_id.clone(),
                        Task {
                            task_id: task.task_id.clone(),
                            framework_id: framework_id.clone(),
                            slave_id: slave_id.clone(),
                            executor_id: executor_id.clone(),
                            name: task.name.clone(),
                            resources: task.resources.clone(),
                            state: TaskState::Staging,
                        },
                    );
                    executor.resources = executor
                        .resources
                        .add(&task.resources)
                        .unwrap_or_else(|_| executor.resources.clone());
                    ctx.post(&from, &ExecutorMessage::RunTask { task });
                }
                let resources = executor.resources.clone();
                ctx.spawn(async move {
                    isolation
                        .resources_changed(&framework_id, &executor_id, &resources)
                        .await;
                });
            }
        }
    }

    pub(super) fn handle_executor_status_update(
        &mut self,
        ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
        status: TaskStatus,
    ) {
        info!(
            "status update: task {} of framework {framework_id} is now {}",
            status.task_id, status.state
        );
        let isolation = self.options.isolation.clone();
        let Some(framework) = self.state.get_framework_mut(&framework_id) else {
            warn!("status update error: framework {framework_id} is unknown");
            self.stats.invalid_status_updates += 1;
            return;
        };
        let Some(executor_id) = framework.executor_for_task(&status.task_id).cloned() else {
            warn!(
                "status update error: no executor owns task {} of framework {framework_id}",
                status.task_id
            );
            self.stats.invalid_status_updates += 1;
            return;
        };
        self.stats.valid_status_updates += 1;
        if let Some(executor) = self
            .state
            .get_framework_mut(&framework_id)
            .and_then(|f| f.executors.get_mut(&executor_id))
        {
            if status.state.is_terminal() {
                match status.state {
                    TaskState::Finished => self.stats.finished_tasks += 1,
                    TaskState::Failed => self.stats.failed_tasks += 1,
                    TaskState::Killed => self.stats.killed_tasks += 1,
                    TaskState::Lost => self.stats.lost_tasks += 1,
                    _ => {}
                }
                if let Some(task) = executor.tasks.remove(&status.task_id) {
                    executor.resources = executor
                        .resources
                        .checked_sub(&task.resources)
                        .unwrap_or_else(|_| executor.resources.clone());
                }
                let resources = executor.resources.clone();
                let framework_id = framework_id.clone();
                let executor_id = executor_id.clone();
                ctx.spawn(async move {
                    isolation
                        .resources_changed(&framework_id, &executor_id, &resources)
                        .await;
                });
            } else if let Some(task) = executor.tasks.get_mut(&status.task_id) {
                task.state = status.state;
            }
        }
        self.forward_status_update(ctx, &framework_id, status);
    }

    pub(super) fn handle_executor_to_framework(
        &mut self,
        ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        data: Vec<u8>,
    ) {
        let slave_id = self.slave_id_or_blank();
        match self.state.get_framework(&framework_id) {
            Some(framework) => {
                self.stats.valid_framework_messages += 1;
                // Framework messages bypass the master.
                ctx.post(
                    &framework.scheduler,
                    &crate::protocol::SchedulerMessage::FrameworkMessage {
                        slave_id,
                        executor_id,
                        data,
                    },
                );
            }
            None => {
                warn!(
                    "cannot forward message from executor '{executor_id}': \
                     framework {framework_id} is unknown"
                );
                self.stats.invalid_framework_messages += 1;
            }
        }
    }

    pub(super) fn handle_retry_tick(&mut self, ctx: &mut ActorContext<Self>) {
        let now = Instant::now();
        let next_deadline = now + self.options.status_update_retry_interval;
        let master = self.state.master.clone();
        for (framework_id, status) in self.state.take_expired_updates(now, next_deadline) {
            warn!(
                "resending status update for task {} of framework {framework_id}",
                status.task_id
            );
            if let Some(master) = &master {
                ctx.post(
                    master,
                    &MasterMessage::StatusUpdate {
                        framework_id,
                        status,
                    },
                );
            }
        }
        ctx.send_with_delay(SlaveEvent::RetryTick, RETRY_SCAN_INTERVAL);
    }

    pub(super) fn handle_heartbeat_tick(&mut self, ctx: &mut ActorContext<Self>) {
        if let (Some(master), Some(slave_id)) =
            (self.state.master.clone(), self.state.slave_id.clone())
        {
            ctx.post(&master, &MasterMessage::Ping { slave_id });
        }
        ctx.send_with_delay(SlaveEvent::HeartbeatTick, self.options.heartbeat_interval);
    }

    pub(super) fn handle_executor_exited(
        &mut self,
        ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        status: i32,
    ) {
        let Some(framework) = self.state.get_framework_mut(&framework_id) else {
            warn!("unknown executor '{executor_id}' of unknown framework {framework_id} exited");
            return;
        };
        let Some(mut executor) = framework.executors.remove(&executor_id) else {
            warn!("unknown executor '{executor_id}' of framework {framework_id} exited");
            return;
        };
        executor.registration = ExecutorRegistration::Dead;
        info!(
            "executor '{executor_id}' of framework {framework_id} exited with status {status}"
        );
        let slave_id = self.slave_id_or_blank();
        if let Some(master) = self.state.master.clone() {
            ctx.post(
                &master,
                &MasterMessage::ExitedExecutor {
                    slave_id,
                    framework_id: framework_id.clone(),
                    executor_id: executor_id.clone(),
                    status,
                },
            );
        }
        let isolation = self.options.isolation.clone();
        {
            let framework_id = framework_id.clone();
            ctx.spawn(async move {
                isolation.kill_executor(&framework_id, &executor_id).await;
            });
        }
        self.reap_framework_if_idle(&framework_id);
    }

    pub(super) fn handle_executor_launch_failed(
        &mut self,
        ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        error: String,
    ) {
        warn!(
            "failed to launch executor '{executor_id}' of framework {framework_id}: {error}"
        );
        let queued = self
            .state
            .get_framework_mut(&framework_id)
            .and_then(|f| f.executors.remove(&executor_id))
            .map(|e| e.queued_tasks)
            .unwrap_or_default();
        for task in queued {
            self.report_lost_task(
                ctx,
                &framework_id,
                task.task_id,
                format!("executor failed to launch: {error}"),
            );
        }
        self.reap_framework_if_idle(&framework_id);
    }

    pub(super) fn handle_exited(&mut self, ctx: &mut ActorContext<Self>, address: Address) {
        if self.state.master.as_ref() == Some(&address) {
            warn!("master at {address} disconnected; waiting for a new master");
            self.state.master = None;
            // Re-read the detector after a pause; with a static detector
            // this retries the same master once its endpoint is back.
            let detector = self.options.detector.clone();
            let handle = ctx.handle().clone();
            ctx.spawn(async move {
                tokio::time::sleep(MASTER_RECONNECT_DELAY).await;
                let master = detector.subscribe().borrow().clone();
                handle.send(SlaveEvent::MasterDetected { master });
            });
        }
    }

    /// Synthesize a `LOST` status update and put it on the usual
    /// forward-and-retry path.
    fn report_lost_task(
        &mut self,
        ctx: &mut ActorContext<Self>,
        framework_id: &FrameworkId,
        task_id: TaskId,
        reason: impl Into<String>,
    ) {
        let status = TaskStatus::new(task_id, self.slave_id_or_blank(), TaskState::Lost)
            .with_message(reason.into());
        self.stats.lost_tasks += 1;
        self.forward_status_update(ctx, framework_id, status);
    }

    /// Send a status update to the master and buffer it until the master
    /// acknowledges receipt.
    fn forward_status_update(
        &mut self,
        ctx: &mut ActorContext<Self>,
        framework_id: &FrameworkId,
        status: TaskStatus,
    ) {
        match self.state.master.clone() {
            Some(master) => ctx.post(
                &master,
                &MasterMessage::StatusUpdate {
                    framework_id: framework_id.clone(),
                    status: status.clone(),
                },
            ),
            None => warn!(
                "no master known; status update for task {} will be sent on reconnect",
                status.task_id
            ),
        }
        let deadline = Instant::now() + self.options.status_update_retry_interval;
        self.state.enqueue_update(framework_id, status, deadline);
    }

    /// Drop the framework record once nothing is left of it: no executors
    /// and no unacknowledged status updates.
    fn reap_framework_if_idle(&mut self, framework_id: &FrameworkId) {
        let idle = self
            .state
            .get_framework(framework_id)
            .is_some_and(|f| f.executors.is_empty() && f.pending_update_count() == 0);
        if idle {
            info!("cleaning up framework {framework_id}");
            self.state.remove_framework(framework_id);
        }
    }
}
