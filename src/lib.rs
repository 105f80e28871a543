//! # parley
//!
//! **parley** is a single-process HTTP application server built on the `may`
//! coroutine runtime. It exposes caller-supplied handler logic over HTTP with
//! very little setup while keeping concurrency bounded and every request
//! isolated from the others.
//!
//! ## Architecture
//!
//! - **[`diagnostics`]** - Bounded multi-producer queue of operator log lines;
//!   only the control thread writes them out
//! - **[`worker_pool`]** - Fixed number of worker coroutines; excess work queues FIFO
//! - **[`pipeline`]** - Per-request unit of work: body ingestion, handler
//!   invocation (optionally impersonated), reply resolution, exactly-once close
//! - **[`server`]** - Request/response views, the listener abstraction with a
//!   `tiny_http` implementation, and the acceptor loop
//! - **[`handler`]** - The contract caller logic implements
//! - **[`security`]** - Authenticators and impersonation
//! - **[`config`]** / **[`runtime_config`]** / **[`telemetry`]** - Startup
//!   configuration, coroutine runtime tuning and logging
//!
//! ### Request Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Client
//!     participant Acceptor as Acceptor Loop<br/>(control thread)
//!     participant Pool as WorkerPool
//!     participant Pipeline as Pipeline<br/>(worker coroutine)
//!     participant Handler
//!     participant Diag as Diagnostics
//!
//!     Client->>Acceptor: HTTP request
//!     Acceptor->>Acceptor: Authenticate (401 challenge if needed)
//!     Acceptor->>Pool: submit(pipeline)
//!     Note over Acceptor: returns immediately
//!     Pool->>Pipeline: run when a slot is free
//!     Pipeline->>Diag: endpoint + identity
//!     Pipeline->>Pipeline: read declared body, decode, parse JSON
//!     Pipeline->>Handler: handle(ctx) (impersonated if enabled)
//!     Handler-->>Pipeline: Reply
//!     Pipeline->>Pipeline: file override > written > text > json
//!     Pipeline-->>Client: response (closed exactly once)
//!     Pipeline->>Diag: status lines
//!     Acceptor->>Diag: drain_and_emit()
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use parley::{Reply, Server, ServerConfig};
//!
//! let config = ServerConfig {
//!     addr: "127.0.0.1:8080".to_string(),
//!     ..ServerConfig::default()
//! };
//! let server = Server::builder(config)
//!     .handler(|ctx: &mut parley::ConnectionContext| -> anyhow::Result<Reply> {
//!         Ok(Reply::text(format!("<p>{} {}</p>", ctx.request.method, ctx.request.path)))
//!     })
//!     .build()
//!     .expect("server config");
//! server.run().expect("acceptor loop");
//! ```
//!
//! ## Runtime Considerations
//!
//! Workers are `may` coroutines. Handlers may block (file reads, socket
//! writes); the scheduler gets one OS thread per worker by default so a
//! blocking handler cannot stall another. There are no handler timeouts: a
//! hung handler holds its slot until it returns.

pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod echo;
pub mod error;
pub mod handler;
pub mod ids;
pub mod modules;
pub mod pipeline;
pub mod runtime_config;
pub mod security;
pub mod server;
pub mod static_files;
pub mod telemetry;
pub mod worker_pool;

pub use config::{AuthScheme, ServerConfig};
pub use diagnostics::{DiagnosticLevel, DiagnosticLine, Diagnostics, Publisher};
pub use error::{ConfigError, ServerError};
pub use handler::{Handler, Reply};
pub use ids::ConnectionId;
pub use modules::{ModuleRegistry, Modules};
pub use security::{AuthOutcome, Authenticator, Identity, Impersonator};
pub use server::{
    Connection, ConnectionContext, RequestView, ResponseView, Server, ServerBuilder,
    ServerHandle,
};
pub use worker_pool::{WorkerPool, WorkerPoolConfig};
