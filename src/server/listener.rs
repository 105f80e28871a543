use super::context::Connection;
use std::io;
use std::net::SocketAddr;

/// Result of one accept call
#[derive(Debug)]
pub enum Accepted {
    /// A request ready for dispatch
    Connection(Box<Connection>),
    /// Nothing arrived within the listener's wait window
    Idle,
    /// A request the listener answered itself (for example a 401 challenge);
    /// nothing to dispatch
    Answered,
    /// The listener was stopped; no further connections will arrive
    Stopped,
}

/// Source of incoming connections
///
/// `accept` is the acceptor loop's only blocking point besides its idle
/// sleep. Implementations should return [`Accepted::Idle`] periodically so
/// the loop can drain diagnostics while traffic is quiet.
pub trait Listener: Send + Sync {
    fn accept(&self) -> io::Result<Accepted>;

    /// Stop accepting. Connections already handed out are unaffected.
    /// Calling it more than once is harmless.
    fn stop(&self);

    fn local_addr(&self) -> Option<SocketAddr>;
}
