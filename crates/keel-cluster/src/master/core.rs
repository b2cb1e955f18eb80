use std::time::Duration;

use async_trait::async_trait;
use keel_server::actor::{Actor, ActorAction, ActorContext};
use log::{error, info};
use tokio::time::Instant;

use crate::allocator::Allocator;
use crate::master::event::MasterEvent;
use crate::master::options::MasterOptions;
use crate::master::state::MasterState;
use crate::protocol::MasterMessage;

/// Timing and policy knobs kept by the running master.
pub(super) struct MasterSettings {
    pub allocation_interval: Duration,
    pub framework_failover_timeout: Duration,
    pub slave_heartbeat_timeout: Duration,
    pub atomic_offer_replies: bool,
}

#[derive(Debug, Default, Clone)]
pub struct MasterStats {
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

pub struct MasterActor {
    pub(super) settings: MasterSettings,
    pub(super) state: MasterState,
    pub(super) allocator: Box<dyn Allocator>,
    pub(super) stats: MasterStats,
    pub(super) started_at: Instant,
}

#[async_trait]
impl Actor for MasterActor {
    type Message = MasterEvent;
    type Options = MasterOptions;

    fn name() -> &'static str {
        "MasterActor"
    }

    fn new(options: MasterOptions) -> Self {
        let MasterOptions {
            id_prefix,
            allocation_interval,
            framework_failover_timeout,
            slave_heartbeat_timeout,
            atomic_offer_replies,
            allocator,
        } = options;
        Self {
            settings: MasterSettings {
                allocation_interval,
                framework_failover_timeout,
                slave_heartbeat_timeout,
                atomic_offer_replies,
            },
            state: MasterState::new(&id_prefix),
            allocator,
            stats: MasterStats::default(),
            started_at: Instant::now(),
        }
    }

    async fn start(&mut self, ctx: &mut ActorContext<Self>) {
        info!("master started at {}", ctx.address());
        ctx.send_with_delay(MasterEvent::AllocationTick, self.settings.allocation_interval);
    }

    fn receive(&mut self, ctx: &mut ActorContext<Self>, message: MasterEvent) -> ActorAction {
        let action = match message {
            MasterEvent::Message { from, message } => {
                self.handle_message(ctx, from, message);
                ActorAction::Continue
            }
            MasterEvent::Exited { address } => {
                self.handle_exited(ctx, address);
                ActorAction::Continue
            }
            MasterEvent::FrameworkFailoverTimeout {
                framework_id,
                epoch,
            } => {
                self.handle_framework_failover_timeout(ctx, framework_id, epoch);
                ActorAction::Continue
            }
            MasterEvent::ProbeSlaveHeartbeat { slave_id, instant } => {
                self.handle_probe_slave_heartbeat(ctx, slave_id, instant);
                ActorAction::Continue
            }
            MasterEvent::AllocationTick => {
                self.handle_allocation_tick(ctx);
                ActorAction::Continue
            }
            MasterEvent::HttpQuery { endpoint, reply } => {
                let _ = reply.send(self.handle_http_query(ctx, endpoint));
                ActorAction::Continue
            }
            MasterEvent::Inspect { reply } => {
                let _ = reply.send(self.snapshot());
                ActorAction::Continue
            }
            MasterEvent::Shutdown => ActorAction::Stop,
        };
        if cfg!(debug_assertions) {
            if let Err(violation) = self.state.check_invariants() {
                error!("registry invariant violated: {violation}");
                debug_assert!(false, "registry invariant violated: {violation}");
            }
        }
        action
    }

    async fn stop(self, ctx: &mut ActorContext<Self>) {
        info!("master at {} stopped", ctx.address());
    }
}

impl MasterActor {
    fn handle_message(
        &mut self,
        ctx: &mut ActorContext<Self>,
        from: keel_server::address::Address,
        message: MasterMessage,
    ) {
        match message {
            MasterMessage::RegisterFramework {
                framework,
                scheduler,
            } => self.handle_register_framework(ctx, framework, scheduler),
            MasterMessage::ReregisterFramework {
                framework_id,
                framework,
                scheduler,
            } => self.handle_reregister_framework(ctx, framework_id, framework, scheduler),
            MasterMessage::UnregisterFramework { framework_id } => {
                self.handle_unregister_framework(ctx, framework_id)
            }
            MasterMessage::ReplyToOffer {
                framework_id,
                offer_id,
                tasks,
                filters,
            } => self.handle_reply_to_offer(ctx, framework_id, offer_id, tasks, filters),
            MasterMessage::ReviveOffers { framework_id } => {
                self.handle_revive_offers(ctx, framework_id)
            }
            MasterMessage::RequestResources {
                framework_id,
                requests,
            } => self.handle_request_resources(ctx, framework_id, requests),
            MasterMessage::KillTask {
                framework_id,
                task_id,
            } => self.handle_kill_task(ctx, framework_id, task_id),
            MasterMessage::FrameworkToExecutor {
                framework_id,
                slave_id,
                executor_id,
                data,
            } => self.handle_framework_to_executor(ctx, framework_id, slave_id, executor_id, data),
            MasterMessage::RegisterSlave { slave } => self.handle_register_slave(ctx, from, slave),
            MasterMessage::ReregisterSlave {
                slave_id,
                slave,
                tasks,
            } => self.handle_reregister_slave(ctx, from, slave_id, slave, tasks),
            MasterMessage::StatusUpdate {
                framework_id,
                status,
            } => self.handle_status_update(ctx, framework_id, status),
            MasterMessage::ExitedExecutor {
                slave_id,
                framework_id,
                executor_id,
                status,
            } => self.handle_exited_executor(ctx, slave_id, framework_id, executor_id, status),
            MasterMessage::Ping { slave_id } => self.handle_ping(ctx, from, slave_id),
        }
    }
}
