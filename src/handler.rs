//! # Handler Contract
//!
//! A handler is the caller-supplied logic behind every request. It is bound
//! once at startup and shared by all workers, so it must be `Send + Sync`.
//!
//! Each invocation gets the full [`ConnectionContext`]: it may read the
//! request (including the ingested body fields), write to the response
//! stream, set status, headers and content type, point the response at a file
//! through `ctx.response.set_file_override(..)`, and return a [`Reply`].
//!
//! ## Reply resolution
//!
//! 1. A file override set on the response wins over anything returned
//! 2. If the handler already wrote to the response stream, the reply is ignored
//! 3. [`Reply::Text`] is sent verbatim as `text/html` unless a content type is set
//! 4. [`Reply::Json`] is serialized as `application/json` unless a content type is set
//! 5. [`Reply::Empty`] sends no body
//!
//! Returning `Err` (or panicking) turns the response into a bare `500`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use parley::{ConnectionContext, Reply};
//!
//! fn greet(ctx: &mut ConnectionContext) -> anyhow::Result<Reply> {
//!     let name = ctx.request.get_query_param("name").unwrap_or("world");
//!     Ok(Reply::text(format!("<h1>Hello {name}</h1>")))
//! }
//! ```

use crate::server::ConnectionContext;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;

/// What a handler returns
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Reply {
    /// No body beyond what the handler wrote itself
    #[default]
    Empty,
    /// Raw text, sent as-is
    Text(String),
    /// A structured value, serialized to JSON
    Json(Value),
    /// Send this file; same effect as setting the response's file override
    File(PathBuf),
    /// The handler produced the body through the response stream
    AlreadyWritten,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply::Text(text.into())
    }

    /// Serialize any `Serialize` value into a JSON reply.
    pub fn json<T: Serialize>(value: &T) -> anyhow::Result<Self> {
        Ok(Reply::Json(serde_json::to_value(value)?))
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Reply::File(path.into())
    }

    /// Whether resolving this reply would produce no body
    pub fn is_empty(&self) -> bool {
        match self {
            Reply::Empty | Reply::AlreadyWritten => true,
            Reply::Text(text) => text.is_empty(),
            Reply::Json(value) => value.is_null(),
            Reply::File(_) => false,
        }
    }
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        Reply::Text(text)
    }
}

impl From<&str> for Reply {
    fn from(text: &str) -> Self {
        Reply::Text(text.to_string())
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Reply::Json(value)
    }
}

impl From<()> for Reply {
    fn from(_: ()) -> Self {
        Reply::Empty
    }
}

/// Request-handling logic invoked once per connection
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, ctx: &mut ConnectionContext) -> anyhow::Result<Reply>;
}

impl<F> Handler for F
where
    F: Fn(&mut ConnectionContext) -> anyhow::Result<Reply> + Send + Sync + 'static,
{
    fn handle(&self, ctx: &mut ConnectionContext) -> anyhow::Result<Reply> {
        self(ctx)
    }
}
