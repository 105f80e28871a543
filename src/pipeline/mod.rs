//! # Request Pipeline
//!
//! The unit of work the acceptor submits to the worker pool, one per accepted
//! connection. [`process`] runs these steps in order:
//!
//! 1. Publish a diagnostic naming the client endpoint and identity
//! 2. Ingest the body unless `skip_body_read` is set: read the declared length,
//!    decode it as Latin-1 text and try a JSON parse
//! 3. Clear the response's file override
//! 4. In a guarded region:
//!    - switch to the connecting identity when impersonation is on
//!    - invoke the handler
//!    - resolve and write the response body (see [`resolve_body`])
//!    - any error or panic becomes status `500`
//! 5. Revert impersonation, then close the response exactly once
//!
//! Nothing inside the pipeline escapes it. Every operator-facing line goes to
//! the diagnostics channel tagged with the connection id, so lines for one
//! request appear in the order the steps ran.

mod body;
mod core;
mod reply;

pub use body::{decode_latin1, parse_structured, read_declared};
pub use core::process;
pub use reply::{apply_body, resolve_body, ResponseBody};

use crate::diagnostics::Diagnostics;
use crate::handler::Handler;
use crate::modules::Modules;
use crate::security::Impersonator;
use crate::server::Listener;
use crate::worker_pool::WorkerPool;
use std::fmt;
use std::sync::Arc;

/// Immutable snapshot of everything a pipeline needs, built once at startup
/// and shared by every dispatch
#[derive(Clone)]
pub struct DispatchConfig {
    pub listener: Arc<dyn Listener>,
    pub pool: Arc<WorkerPool>,
    pub diagnostics: Diagnostics,
    pub handler: Arc<dyn Handler>,
    pub impersonator: Arc<dyn Impersonator>,
    /// Run handlers under the connecting identity
    pub impersonate: bool,
    pub skip_body_read: bool,
    /// Worker pool capacity
    pub capacity: usize,
    pub modules: Arc<Modules>,
}

impl fmt::Debug for DispatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchConfig")
            .field("local_addr", &self.listener.local_addr())
            .field("impersonate", &self.impersonate)
            .field("skip_body_read", &self.skip_body_read)
            .field("capacity", &self.capacity)
            .field("modules", &self.modules)
            .finish()
    }
}
