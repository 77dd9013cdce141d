//! Minimal Chrome DevTools Protocol client

pub mod connection;
#[cfg(test)]
pub(crate) mod testing;
pub mod transport;
pub mod types;

pub use connection::{Connection, Session};
pub use transport::{launch_chrome, Transport, COMMAND_TIMEOUT};
pub use types::TargetInfo;
