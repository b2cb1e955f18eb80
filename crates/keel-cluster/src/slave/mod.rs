mod core;
mod event;
mod handler;
mod http;
mod isolation;
mod options;
mod reaper;
mod state;

use keel_server::actor::{ActorHandle, ActorSystem};

pub use self::core::{SlaveActor, SlaveStats};
pub use self::event::{
    ExecutorRecordSnapshot, FrameworkRecordSnapshot, SlaveEndpoint, SlaveEvent,
    SlaveRegistrySnapshot,
};
pub use self::isolation::{ExecutorLaunch, IsolationModule, LocalIsolation, ProcessIsolation};
pub use self::options::{SlaveOptions, STATUS_UPDATE_RETRY_INTERVAL};

use crate::protocol::SlaveMessage;

/// Spawn a slave actor under `name`, expose it on the wire, and install
/// its HTTP endpoints. Multiple slaves in one process (local mode) use
/// distinct names.
pub fn start_slave(
    system: &ActorSystem,
    name: &str,
    options: SlaveOptions,
) -> ActorHandle<SlaveActor> {
    let handle = system.spawn::<SlaveActor>(name, options);
    system.expose::<SlaveActor, SlaveMessage, _>(&handle, |message, from| SlaveEvent::Message {
        from,
        message,
    });
    system.expose_http(name, http::handlers(&handle));
    handle
}
