mod core;
mod event;
mod handler;
mod http;
mod options;
mod state;

use keel_server::actor::{ActorHandle, ActorSystem};

pub use self::core::{MasterActor, MasterStats};
pub use self::event::{
    FrameworkSnapshot, MasterEndpoint, MasterEvent, MasterSnapshot, OfferSnapshot, SlaveSnapshot,
};
pub use self::options::MasterOptions;

use crate::protocol::MasterMessage;

/// The name a master registers under; its address is
/// `<host>:<port>/master`.
pub const MASTER_ACTOR_NAME: &str = "master";

/// Spawn the master actor, expose it on the wire, and install its HTTP
/// endpoints.
pub fn start_master(system: &ActorSystem, options: MasterOptions) -> ActorHandle<MasterActor> {
    let handle = system.spawn::<MasterActor>(MASTER_ACTOR_NAME, options);
    system.expose::<MasterActor, MasterMessage, _>(&handle, |message, from| {
        MasterEvent::Message { from, message }
    });
    system.expose_http(MASTER_ACTOR_NAME, http::handlers(&handle));
    handle
}
