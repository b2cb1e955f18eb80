use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keel_server::actor::{Actor, ActorAction, ActorContext};
use keel_server::address::Address;
use log::{debug, info, warn};
use uuid::Uuid;

use crate::detector::MasterDetector;
use crate::id::{ExecutorId, FrameworkId, OfferId, SlaveId, TaskId};
use crate::protocol::{
    Filters, FrameworkInfo, MasterMessage, ResourceRequest, SchedulerMessage, TaskDescription,
};
use crate::sched::{Scheduler, SchedulerDriverClient};

const MASTER_RECONNECT_DELAY: Duration = Duration::from_secs(2);

pub(super) struct SchedActorOptions {
    pub scheduler: Box<dyn Scheduler>,
    pub framework: FrameworkInfo,
    pub detector: Arc<dyn MasterDetector>,
    /// Present when failing over as an already-registered framework.
    pub failover_id: Option<FrameworkId>,
}

pub(super) enum SchedEvent {
    Message {
        from: Address,
        message: SchedulerMessage,
    },
    MasterDetected {
        master: Option<Address>,
    },
    Exited {
        address: Address,
    },
    Op(SchedOp),
    Stop,
}

pub(super) enum SchedOp {
    ReplyToOffer {
        offer_id: OfferId,
        tasks: Vec<TaskDescription>,
        filters: Filters,
    },
    KillTask {
        task_id: TaskId,
    },
    ReviveOffers,
    RequestResources {
        requests: Vec<ResourceRequest>,
    },
    SendFrameworkMessage {
        slave_id: SlaveId,
        executor_id: ExecutorId,
        data: Vec<u8>,
    },
}

pub(super) struct SchedActor {
    scheduler: Box<dyn Scheduler>,
    framework: FrameworkInfo,
    detector: Arc<dyn MasterDetector>,
    master: Option<Address>,
    framework_id: Option<FrameworkId>,
    /// Operations issued before registration, flushed on `Registered`.
    pending: Vec<SchedOp>,
    /// Status update uuids already delivered to the scheduler; the master
    /// may forward retried updates more than once.
    seen_updates: HashSet<Uuid>,
}

impl SchedActor {
    fn client(ctx: &ActorContext<Self>) -> SchedulerDriverClient {
        SchedulerDriverClient {
            handle: ctx.handle().clone(),
        }
    }

    fn apply_op(&mut self, ctx: &mut ActorContext<Self>, op: SchedOp) {
        let (Some(master), Some(framework_id)) = (self.master.clone(), self.framework_id.clone())
        else {
            self.pending.push(op);
            return;
        };
        let message = match op {
            SchedOp::ReplyToOffer {
                offer_id,
                tasks,
                filters,
            } => MasterMessage::ReplyToOffer {
                framework_id,
                offer_id,
                tasks,
                filters,
            },
            SchedOp::KillTask { task_id } => MasterMessage::KillTask {
                framework_id,
                task_id,
            },
            SchedOp::ReviveOffers => MasterMessage::ReviveOffers { framework_id },
            SchedOp::RequestResources { requests } => MasterMessage::RequestResources {
                framework_id,
                requests,
            },
            SchedOp::SendFrameworkMessage {
                slave_id,
                executor_id,
                data,
            } => MasterMessage::FrameworkToExecutor {
                framework_id,
                slave_id,
                executor_id,
                data,
            },
        };
        ctx.post(&master, &message);
    }
}

#[async_trait]
impl Actor for SchedActor {
    type Message = SchedEvent;
    type Options = SchedActorOptions;

    fn name() -> &'static str {
        "SchedActor"
    }

    fn new(options: SchedActorOptions) -> Self {
        Self {
            scheduler: options.scheduler,
            framework: options.framework,
            detector: options.detector,
            master: None,
            framework_id: options.failover_id,
            pending: Vec::new(),
            seen_updates: HashSet::new(),
        }
    }

    async fn start(&mut self, ctx: &mut ActorContext<Self>) {
        info!("scheduler driver started at {}", ctx.address());
        let detector = self.detector.clone();
        let handle = ctx.handle().clone();
        ctx.spawn(async move {
            let mut watch = detector.subscribe();
            let initial = watch.borrow_and_update().clone();
            handle.send(SchedEvent::MasterDetected { master: initial });
            while watch.changed().await.is_ok() {
                let master = watch.borrow_and_update().clone();
                handle.send(SchedEvent::MasterDetected { master });
            }
        });
    }

    fn receive(&mut self, ctx: &mut ActorContext<Self>, message: SchedEvent) -> ActorAction {
        match message {
            SchedEvent::MasterDetected { master } => {
                let Some(master) = master else {
                    info!("no master detected; waiting");
                    return ActorAction::Continue;
                };
                info!("master detected at {master}");
                self.master = Some(master.clone());
                ctx.link(&master, |address| SchedEvent::Exited { address });
                let scheduler_address = ctx.address().clone();
                match self.framework_id.clone() {
                    Some(framework_id) => ctx.post(
                        &master,
                        &MasterMessage::ReregisterFramework {
                            framework_id,
                            framework: self.framework.clone(),
                            scheduler: scheduler_address,
                        },
                    ),
                    None => ctx.post(
                        &master,
                        &MasterMessage::RegisterFramework {
                            framework: self.framework.clone(),
                            scheduler: scheduler_address,
                        },
                    ),
                }
                ActorAction::Continue
            }
            SchedEvent::Message { from: _, message } => {
                match message {
                    SchedulerMessage::Registered { framework_id } => {
                        info!("framework registered with id {framework_id}");
                        self.framework_id = Some(framework_id.clone());
                        let client = Self::client(ctx);
                        self.scheduler.registered(&client, &framework_id);
                        for op in std::mem::take(&mut self.pending) {
                            self.apply_op(ctx, op);
                        }
                    }
                    SchedulerMessage::ResourceOffers { offers } => {
                        let client = Self::client(ctx);
                        self.scheduler.resource_offers(&client, &offers);
                    }
                    SchedulerMessage::RescindOffer { offer_id } => {
                        let client = Self::client(ctx);
                        self.scheduler.offer_rescinded(&client, &offer_id);
                    }
                    SchedulerMessage::StatusUpdate { status } => {
                        // Deliver each update once even when the master
                        // forwards a retried copy.
                        if self.seen_updates.insert(status.uuid) {
                            let client = Self::client(ctx);
                            self.scheduler.status_update(&client, &status);
                        } else {
                            debug!(
                                "dropping duplicate status update {} for task {}",
                                status.uuid, status.task_id
                            );
                        }
                    }
                    SchedulerMessage::FrameworkMessage {
                        slave_id,
                        executor_id,
                        data,
                    } => {
                        let client = Self::client(ctx);
                        self.scheduler
                            .framework_message(&client, &slave_id, &executor_id, &data);
                    }
                    SchedulerMessage::SlaveLost { slave_id } => {
                        let client = Self::client(ctx);
                        self.scheduler.slave_lost(&client, &slave_id);
                    }
                    SchedulerMessage::Error { code, message } => {
                        warn!("error from master: {message} ({code})");
                        let client = Self::client(ctx);
                        self.scheduler.error(&client, code, &message);
                    }
                }
                ActorAction::Continue
            }
            SchedEvent::Op(op) => {
                self.apply_op(ctx, op);
                ActorAction::Continue
            }
            SchedEvent::Exited { address } => {
                if self.master.as_ref() == Some(&address) {
                    warn!("master at {address} disconnected; re-detecting");
                    self.master = None;
                    let detector = self.detector.clone();
                    let handle = ctx.handle().clone();
                    ctx.spawn(async move {
                        tokio::time::sleep(MASTER_RECONNECT_DELAY).await;
                        let master = detector.subscribe().borrow().clone();
                        handle.send(SchedEvent::MasterDetected { master });
                    });
                }
                ActorAction::Continue
            }
            SchedEvent::Stop => {
                if let (Some(master), Some(framework_id)) =
                    (self.master.clone(), self.framework_id.clone())
                {
                    ctx.post(&master, &MasterMessage::UnregisterFramework { framework_id });
                }
                ActorAction::Stop
            }
        }
    }

    async fn stop(self, ctx: &mut ActorContext<Self>) {
        info!("scheduler driver at {} stopped", ctx.address());
    }
}
