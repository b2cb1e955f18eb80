use async_trait::async_trait;
use keel_server::actor::{Actor, ActorAction, ActorContext};
use keel_server::address::Address;
use log::{info, warn};

use crate::exec::{Executor, ExecutorDriverClient, ExecutorIdentity};
use crate::id::TaskId;
use crate::protocol::{ExecutorArgs, ExecutorMessage, SlaveMessage, TaskState, TaskStatus};

pub(super) struct ExecActorOptions {
    pub executor: Box<dyn Executor>,
    pub identity: ExecutorIdentity,
}

pub(super) enum ExecEvent {
    Message {
        from: Address,
        message: ExecutorMessage,
    },
    SendStatusUpdate {
        task_id: TaskId,
        state: TaskState,
        message: Option<String>,
    },
    SendFrameworkMessage {
        data: Vec<u8>,
    },
    Exited {
        address: Address,
    },
    Stop,
}

enum BufferedOp {
    StatusUpdate {
        task_id: TaskId,
        state: TaskState,
        message: Option<String>,
    },
    FrameworkMessage {
        data: Vec<u8>,
    },
}

pub(super) struct ExecActor {
    executor: Box<dyn Executor>,
    identity: ExecutorIdentity,
    /// Set once the slave accepts the registration.
    args: Option<ExecutorArgs>,
    /// Operations issued before registration, flushed on acceptance.
    buffered: Vec<BufferedOp>,
}

impl ExecActor {
    fn client(ctx: &ActorContext<Self>) -> ExecutorDriverClient {
        ExecutorDriverClient {
            handle: ctx.handle().clone(),
        }
    }

    fn post_status_update(
        &mut self,
        ctx: &mut ActorContext<Self>,
        task_id: TaskId,
        state: TaskState,
        message: Option<String>,
    ) {
        match &self.args {
            Some(args) => {
                let mut status = TaskStatus::new(task_id, args.slave_id.clone(), state);
                status.message = message;
                let slave = self.identity.slave.clone();
                ctx.post(
                    &slave,
                    &SlaveMessage::StatusUpdate {
                        framework_id: self.identity.framework_id.clone(),
                        status,
                    },
                );
            }
            None => self.buffered.push(BufferedOp::StatusUpdate {
                task_id,
                state,
                message,
            }),
        }
    }

    fn post_framework_message(&mut self, ctx: &mut ActorContext<Self>, data: Vec<u8>) {
        if self.args.is_some() {
            let slave = self.identity.slave.clone();
            ctx.post(
                &slave,
                &SlaveMessage::ExecutorToFramework {
                    framework_id: self.identity.framework_id.clone(),
                    executor_id: self.identity.executor_id.clone(),
                    data,
                },
            );
        } else {
            self.buffered.push(BufferedOp::FrameworkMessage { data });
        }
    }
}

#[async_trait]
impl Actor for ExecActor {
    type Message = ExecEvent;
    type Options = ExecActorOptions;

    fn name() -> &'static str {
        "ExecActor"
    }

    fn new(options: ExecActorOptions) -> Self {
        Self {
            executor: options.executor,
            identity: options.identity,
            args: None,
            buffered: Vec::new(),
        }
    }

    async fn start(&mut self, ctx: &mut ActorContext<Self>) {
        let slave = self.identity.slave.clone();
        info!(
            "executor '{}' of framework {} registering with slave at {slave}",
            self.identity.executor_id, self.identity.framework_id
        );
        ctx.link(&slave, |address| ExecEvent::Exited { address });
        ctx.post(
            &slave,
            &SlaveMessage::RegisterExecutor {
                framework_id: self.identity.framework_id.clone(),
                executor_id: self.identity.executor_id.clone(),
            },
        );
    }

    fn receive(&mut self, ctx: &mut ActorContext<Self>, message: ExecEvent) -> ActorAction {
        match message {
            ExecEvent::Message { from: _, message } => match message {
                ExecutorMessage::ExecutorRegistered { args } => {
                    info!(
                        "executor '{}' registered on slave {}",
                        args.executor_id, args.slave_id
                    );
                    self.args = Some(args.clone());
                    let client = Self::client(ctx);
                    self.executor.init(&client, &args);
                    for op in std::mem::take(&mut self.buffered) {
                        match op {
                            BufferedOp::StatusUpdate {
                                task_id,
                                state,
                                message,
                            } => self.post_status_update(ctx, task_id, state, message),
                            BufferedOp::FrameworkMessage { data } => {
                                self.post_framework_message(ctx, data)
                            }
                        }
                    }
                    ActorAction::Continue
                }
                ExecutorMessage::RunTask { task } => {
                    let client = Self::client(ctx);
                    self.executor.launch_task(&client, &task);
                    ActorAction::Continue
                }
                ExecutorMessage::KillTask { task_id } => {
                    let client = Self::client(ctx);
                    self.executor.kill_task(&client, &task_id);
                    ActorAction::Continue
                }
                ExecutorMessage::FrameworkMessage { data } => {
                    let client = Self::client(ctx);
                    self.executor.framework_message(&client, &data);
                    ActorAction::Continue
                }
                ExecutorMessage::KillExecutor => {
                    let client = Self::client(ctx);
                    if self.args.is_none() {
                        // The slave refused the registration.
                        self.executor
                            .error(&client, 1, "executor rejected by slave");
                    }
                    self.executor.shutdown(&client);
                    ActorAction::Stop
                }
            },
            ExecEvent::SendStatusUpdate {
                task_id,
                state,
                message,
            } => {
                self.post_status_update(ctx, task_id, state, message);
                ActorAction::Continue
            }
            ExecEvent::SendFrameworkMessage { data } => {
                self.post_framework_message(ctx, data);
                ActorAction::Continue
            }
            ExecEvent::Exited { address } => {
                warn!("slave at {address} exited; shutting down executor");
                let client = Self::client(ctx);
                self.executor.shutdown(&client);
                ActorAction::Stop
            }
            ExecEvent::Stop => {
                let client = Self::client(ctx);
                self.executor.shutdown(&client);
                ActorAction::Stop
            }
        }
    }

    async fn stop(self, _ctx: &mut ActorContext<Self>) {}
}
