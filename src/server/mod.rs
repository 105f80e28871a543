//! # Server Module
//!
//! Connection plumbing around the request pipeline.
//!
//! - [`RequestView`] / [`ResponseView`]: the two halves of a connection as a
//!   handler sees them
//! - [`Listener`]: where connections come from; [`TinyHttpListener`] is the
//!   socket-backed implementation and enforces authentication
//! - [`Server`]: the acceptor loop that feeds connections to the worker pool

mod acceptor;
mod context;
mod http_server;
mod listener;
mod request;
mod response;

pub use acceptor::{
    Server, ServerBuilder, ServerHandle, StopHandle, MAX_CONSECUTIVE_ACCEPT_ERRORS,
};
pub use context::{Connection, ConnectionContext};
pub use http_server::{ListenerAuth, TinyHttpListener};
pub use listener::{Accepted, Listener};
pub use request::{
    parse_query_params, BodyReader, HeaderVec, ParamVec, RequestView, MAX_INLINE_HEADERS,
    MAX_INLINE_PARAMS,
};
pub use response::{ResponseParts, ResponseSink, ResponseState, ResponseView};
