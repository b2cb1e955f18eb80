use async_trait::async_trait;
use keel_common::env;
use keel_server::actor::{Actor, ActorAction, ActorContext, ActorHandle};
use log::info;
use tokio::time::Instant;

use crate::id::FrameworkId;
use crate::protocol::{ExecutorMessage, SlaveMessage};
use crate::slave::event::SlaveEvent;
use crate::slave::options::{SlaveOptions, RETRY_SCAN_INTERVAL};
use crate::slave::reaper::{ReaperActor, ReaperEvent, ReaperOptions};
use crate::slave::state::SlaveState;

#[derive(Debug, Default, Clone)]
pub struct SlaveStats {
    pub launched_tasks: u64,
    pub finished_tasks: u64,
    pub killed_tasks: u64,
    pub failed_tasks: u64,
    pub lost_tasks: u64,
    pub valid_status_updates: u64,
    pub invalid_status_updates: u64,
    pub valid_framework_messages: u64,
    pub invalid_framework_messages: u64,
}

pub struct SlaveActor {
    pub(super) options: SlaveOptions,
    pub(super) state: SlaveState,
    pub(super) stats: SlaveStats,
    pub(super) hostname: String,
    pub(super) public_hostname: String,
    pub(super) reaper: Option<ActorHandle<ReaperActor>>,
    pub(super) started_at: Instant,
}

#[async_trait]
impl Actor for SlaveActor {
    type Message = SlaveEvent;
    type Options = SlaveOptions;

    fn name() -> &'static str {
        "SlaveActor"
    }

    fn new(options: SlaveOptions) -> Self {
        let hostname = options
            .hostname
            .clone()
            .or_else(|| env::var("HOSTNAME"))
            .unwrap_or_else(|| "localhost".to_string());
        // On hosts behind NAT (e.g. cloud instances) the externally
        // visible name can differ from the local one.
        let public_hostname = env::var(env::ENV_PUBLIC_DNS).unwrap_or_else(|| hostname.clone());
        Self {
            options,
            state: SlaveState::new(),
            stats: SlaveStats::default(),
            hostname,
            public_hostname,
            reaper: None,
            started_at: Instant::now(),
        }
    }

    async fn start(&mut self, ctx: &mut ActorContext<Self>) {
        info!(
            "slave started at {} with {}",
            ctx.address(),
            self.options.resources
        );
        let reaper_name = format!("{}-reaper", ctx.address().name);
        let reaper = ctx.system().spawn::<ReaperActor>(
            &reaper_name,
            ReaperOptions {
                slave: ctx.handle().clone(),
            },
        );
        self.reaper = Some(reaper);

        let detector = self.options.detector.clone();
        let handle = ctx.handle().clone();
        ctx.spawn(async move {
            let mut watch = detector.subscribe();
            let initial = watch.borrow_and_update().clone();
            handle.send(SlaveEvent::MasterDetected { master: initial });
            while watch.changed().await.is_ok() {
                let master = watch.borrow_and_update().clone();
                handle.send(SlaveEvent::MasterDetected { master });
            }
        });

        ctx.send_with_delay(SlaveEvent::RetryTick, RETRY_SCAN_INTERVAL);
        ctx.send_with_delay(SlaveEvent::HeartbeatTick, self.options.heartbeat_interval);
    }

    fn receive(&mut self, ctx: &mut ActorContext<Self>, message: SlaveEvent) -> ActorAction {
        match message {
            SlaveEvent::Message { from, message } => {
                self.handle_message(ctx, from, message);
                ActorAction::Continue
            }
            SlaveEvent::MasterDetected { master } => {
                self.handle_master_detected(ctx, master);
                ActorAction::Continue
            }
            SlaveEvent::Exited { address } => {
                self.handle_exited(ctx, address);
                ActorAction::Continue
            }
            SlaveEvent::RetryTick => {
                self.handle_retry_tick(ctx);
                ActorAction::Continue
            }
            SlaveEvent::HeartbeatTick => {
                self.handle_heartbeat_tick(ctx);
                ActorAction::Continue
            }
            SlaveEvent::ExecutorExited {
                framework_id,
                executor_id,
                status,
            } => {
                self.handle_executor_exited(ctx, framework_id, executor_id, status);
                ActorAction::Continue
            }
            SlaveEvent::ExecutorLaunchFailed {
                framework_id,
                executor_id,
                error,
            } => {
                self.handle_executor_launch_failed(ctx, framework_id, executor_id, error);
                ActorAction::Continue
            }
            SlaveEvent::HttpQuery { endpoint, reply } => {
                let _ = reply.send(self.handle_http_query(ctx, endpoint));
                ActorAction::Continue
            }
            SlaveEvent::Inspect { reply } => {
                let _ = reply.send(self.snapshot());
                ActorAction::Continue
            }
            SlaveEvent::Shutdown => ActorAction::Stop,
        }
    }

    async fn stop(mut self, ctx: &mut ActorContext<Self>) {
        info!("slave at {} shutting down", ctx.address());
        let framework_ids: Vec<FrameworkId> = self
            .state
            .list_frameworks()
            .map(|f| f.framework_id.clone())
            .collect();
        for framework_id in framework_ids {
            let Some(framework) = self.state.remove_framework(&framework_id) else {
                continue;
            };
            for (executor_id, executor) in framework.executors {
                if let Some(address) = executor.address() {
                    ctx.post(address, &ExecutorMessage::KillExecutor);
                }
                self.options
                    .isolation
                    .kill_executor(&framework_id, &executor_id)
                    .await;
                if let Some(reaper) = &self.reaper {
                    reaper.send(ReaperEvent::Kill {
                        framework_id: framework_id.clone(),
                        executor_id,
                    });
                }
            }
        }
        if let Some(reaper) = &self.reaper {
            reaper.send(ReaperEvent::Shutdown);
        }
    }
}

impl SlaveActor {
    fn handle_message(
        &mut self,
        ctx: &mut ActorContext<Self>,
        from: keel_server::address::Address,
        message: SlaveMessage,
    ) {
        match message {
            SlaveMessage::SlaveRegistered { slave_id } => {
                info!("registered with master; given slave id {slave_id}");
                self.state.slave_id = Some(slave_id);
            }
            SlaveMessage::SlaveReregistered { slave_id } => {
                self.handle_slave_reregistered(ctx, slave_id);
            }
            SlaveMessage::RunTask {
                framework_id,
                framework,
                scheduler,
                task,
            } => self.handle_run_task(ctx, framework_id, framework, scheduler, task),
            SlaveMessage::KillTask {
                framework_id,
                task_id,
            } => self.handle_kill_task(ctx, framework_id, task_id),
            SlaveMessage::KillFramework { framework_id } => {
                self.handle_kill_framework(ctx, framework_id)
            }
            SlaveMessage::FrameworkToExecutor {
                framework_id,
                executor_id,
                data,
            } => self.handle_framework_to_executor(ctx, framework_id, executor_id, data),
            SlaveMessage::UpdateFramework {
                framework_id,
                scheduler,
            } => self.handle_update_framework(ctx, framework_id, scheduler),
            SlaveMessage::StatusUpdateAck {
                framework_id,
                task_id,
                uuid,
            } => self.handle_status_update_ack(ctx, framework_id, task_id, uuid),
            SlaveMessage::Pong => {}
            SlaveMessage::RegisterExecutor {
                framework_id,
                executor_id,
            } => self.handle_register_executor(ctx, from, framework_id, executor_id),
            SlaveMessage::StatusUpdate {
                framework_id,
                status,
            } => self.handle_executor_status_update(ctx, framework_id, status),
            SlaveMessage::ExecutorToFramework {
                framework_id,
                executor_id,
                data,
            } => self.handle_executor_to_framework(ctx, framework_id, executor_id, data),
        }
    }
}
