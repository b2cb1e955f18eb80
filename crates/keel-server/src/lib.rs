pub mod actor;
pub mod address;
pub mod codec;
pub mod error;
pub mod http;
pub mod retry;
mod transport;
