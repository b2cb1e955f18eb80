use std::collections::HashMap;

use async_trait::async_trait;
use keel_server::actor::{Actor, ActorAction, ActorContext, ActorHandle};
use log::info;
use tokio::process::Child;
use tokio::sync::oneshot;

use crate::id::{ExecutorId, FrameworkId};
use crate::slave::event::SlaveEvent;
use crate::slave::SlaveActor;

/// Watches executor child processes and tells the slave when one exits.
/// Shares nothing with the slave beyond its message channel.
pub struct ReaperActor {
    slave: ActorHandle<SlaveActor>,
    /// Kill triggers for the children currently being watched.
    kills: HashMap<(FrameworkId, ExecutorId), oneshot::Sender<()>>,
}

pub struct ReaperOptions {
    pub slave: ActorHandle<SlaveActor>,
}

pub enum ReaperEvent {
    /// Watch a launched executor process until it exits.
    Watch {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        child: Child,
    },
    /// Kill the watched process.
    Kill {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
    },
    /// A watched process exited with the given status code.
    Reaped {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        status: i32,
    },
    Shutdown,
}

#[async_trait]
impl Actor for ReaperActor {
    type Message = ReaperEvent;
    type Options = ReaperOptions;

    fn name() -> &'static str {
        "ReaperActor"
    }

    fn new(options: ReaperOptions) -> Self {
        Self {
            slave: options.slave,
            kills: HashMap::new(),
        }
    }

    async fn start(&mut self, _ctx: &mut ActorContext<Self>) {}

    fn receive(&mut self, ctx: &mut ActorContext<Self>, message: ReaperEvent) -> ActorAction {
        match message {
            ReaperEvent::Watch {
                framework_id,
                executor_id,
                mut child,
            } => {
                info!(
                    "watching executor '{executor_id}' of framework {framework_id} \
                     (pid {:?})",
                    child.id()
                );
                let (kill, killed) = oneshot::channel();
                self.kills
                    .insert((framework_id.clone(), executor_id.clone()), kill);
                let handle = ctx.handle().clone();
                ctx.spawn(async move {
                    let status = tokio::select! {
                        status = child.wait() => status,
                        _ = killed => {
                            let _ = child.start_kill();
                            child.wait().await
                        }
                    };
                    let status = status.map(|s| s.code().unwrap_or(-1)).unwrap_or(-1);
                    handle.send(ReaperEvent::Reaped {
                        framework_id,
                        executor_id,
                        status,
                    });
                });
                ActorAction::Continue
            }
            ReaperEvent::Kill {
                framework_id,
                executor_id,
            } => {
                if let Some(kill) = self.kills.remove(&(framework_id, executor_id)) {
                    let _ = kill.send(());
                }
                ActorAction::Continue
            }
            ReaperEvent::Reaped {
                framework_id,
                executor_id,
                status,
            } => {
                self.kills
                    .remove(&(framework_id.clone(), executor_id.clone()));
                self.slave.send(SlaveEvent::ExecutorExited {
                    framework_id,
                    executor_id,
                    status,
                });
                ActorAction::Continue
            }
            ReaperEvent::Shutdown => ActorAction::Stop,
        }
    }

    async fn stop(mut self, _ctx: &mut ActorContext<Self>) {
        for (_, kill) in self.kills.drain() {
            let _ = kill.send(());
        }
    }
}
