//! # Acceptor Loop
//!
//! The control thread. Each tick it blocks on the listener for the next
//! connection, submits a pipeline for it to the worker pool without waiting,
//! drains the diagnostics channel to the log, and sleeps the poll interval.
//! It is the only thread that writes operator output. An accept call never
//! waits longer than the poll interval, so a published line reaches the log
//! within about one interval.
//!
//! The loop ends when the listener reports [`Accepted::Stopped`] or after too
//! many consecutive accept errors. On the way out a drop guard stops the
//! listener, the pool finishes every in-flight and queued job, and a final
//! drain flushes what they published.

use super::context::Connection;
use super::http_server::{ListenerAuth, TinyHttpListener};
use super::listener::{Accepted, Listener};
use crate::config::{AuthScheme, ServerConfig};
use crate::diagnostics::Diagnostics;
use crate::error::{ConfigError, ServerError};
use crate::handler::Handler;
use crate::modules::ModuleRegistry;
use crate::pipeline::{self, DispatchConfig};
use crate::runtime_config::RuntimeConfig;
use crate::security::{Authenticator, Impersonator, StaticCredentials, TracingImpersonator};
use crate::worker_pool::{WorkerPool, WorkerPoolConfig};
use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

/// Consecutive accept failures after which the loop gives up
pub const MAX_CONSECUTIVE_ACCEPT_ERRORS: u32 = 16;

const SOURCE: &str = "acceptor";

/// Stops the listener when the loop exits, however it exits
struct ListenerGuard(Arc<dyn Listener>);

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.0.stop();
    }
}

/// Builder for a [`Server`]
///
/// Only the handler is required; everything else has a default.
pub struct ServerBuilder {
    config: ServerConfig,
    handler: Option<Arc<dyn Handler>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    impersonator: Option<Arc<dyn Impersonator>>,
    modules: ModuleRegistry,
    listener: Option<Arc<dyn Listener>>,
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .field("handler", &self.handler.is_some())
            .field("modules", &self.modules)
            .finish()
    }
}

impl ServerBuilder {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            handler: None,
            authenticator: None,
            impersonator: None,
            modules: ModuleRegistry::new(),
            listener: None,
        }
    }

    /// Bind the handler every request is dispatched to.
    pub fn handler<H: Handler>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn shared_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Credential check for the configured scheme. Basic falls back to the
    /// config's user table when none is given.
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Platform impersonation; defaults to [`TracingImpersonator`].
    pub fn impersonator(mut self, impersonator: Arc<dyn Impersonator>) -> Self {
        self.impersonator = Some(impersonator);
        self
    }

    /// Catalog the preload list is resolved against.
    pub fn modules(mut self, modules: ModuleRegistry) -> Self {
        self.modules = modules;
        self
    }

    /// Use this listener instead of binding a `tiny_http` socket.
    pub fn listener(mut self, listener: Arc<dyn Listener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Validate, preload, start the pool and bind.
    ///
    /// Every configuration check runs before anything is bound.
    ///
    /// # Errors
    ///
    /// [`ServerError::Config`] for invalid configuration, [`ServerError::Bind`]
    /// when the socket cannot be bound, [`ServerError::Io`] when the pool
    /// cannot start.
    pub fn build(self) -> Result<Server, ServerError> {
        let ServerBuilder {
            config,
            handler,
            authenticator,
            impersonator,
            modules,
            listener,
        } = self;

        config.validate()?;
        let handler = handler.ok_or(ConfigError::MissingHandler)?;
        let authenticator = match (config.auth, authenticator) {
            (AuthScheme::Anonymous, _) => None,
            (_, Some(authenticator)) => Some(authenticator),
            (AuthScheme::Basic, None) => Some(Arc::new(StaticCredentials::from_entries(
                &config.users,
            )) as Arc<dyn Authenticator>),
            (scheme, None) => {
                return Err(ConfigError::MissingAuthenticator {
                    scheme: scheme.to_string(),
                }
                .into())
            }
        };
        let modules = Arc::new(modules.preload(&config.preload)?);
        let addr = config.socket_addr()?;

        let runtime = RuntimeConfig::from_env(config.workers);
        runtime.apply();

        let diagnostics = Diagnostics::new(config.diagnostics_bound);
        let pool = Arc::new(WorkerPool::new(
            WorkerPoolConfig::new(config.workers, runtime.stack_size),
            diagnostics.clone(),
        )?);

        let listener: Arc<dyn Listener> = match listener {
            Some(listener) => listener,
            None => Arc::new(TinyHttpListener::bind(
                addr,
                ListenerAuth {
                    scheme: config.auth,
                    realm: config.realm.clone(),
                    authenticator,
                },
                config.accept_wait(),
            )?),
        };

        let dispatch = DispatchConfig {
            listener,
            pool,
            diagnostics,
            handler,
            impersonator: impersonator.unwrap_or_else(|| Arc::new(TracingImpersonator::new())),
            impersonate: config.impersonate,
            skip_body_read: config.skip_body_read,
            capacity: config.workers,
            modules,
        };

        Ok(Server {
            dispatch: Arc::new(dispatch),
            auth: config.auth,
            poll_interval: config.poll_interval(),
        })
    }
}

/// A configured server, ready to run its acceptor loop
pub struct Server {
    dispatch: Arc<DispatchConfig>,
    auth: AuthScheme,
    poll_interval: Duration,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("dispatch", &self.dispatch)
            .field("auth", &self.auth)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl Server {
    pub fn builder(config: ServerConfig) -> ServerBuilder {
        ServerBuilder::new(config)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.dispatch.listener.local_addr()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.dispatch.diagnostics
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.dispatch.pool
    }

    /// Handle that stops the listener from any thread
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.dispatch.listener))
    }

    /// Run the acceptor loop on the calling thread until the listener stops.
    ///
    /// Returns once every in-flight request has completed.
    ///
    /// # Errors
    ///
    /// [`ServerError::Io`] when accepting failed
    /// [`MAX_CONSECUTIVE_ACCEPT_ERRORS`] times in a row.
    pub fn run(&self) -> Result<(), ServerError> {
        let dispatch = &self.dispatch;
        let guard = ListenerGuard(Arc::clone(&dispatch.listener));

        info!(
            addr = ?dispatch.listener.local_addr(),
            auth = %self.auth,
            workers = dispatch.capacity,
            impersonate = dispatch.impersonate,
            skip_body_read = dispatch.skip_body_read,
            "Acceptor loop started"
        );

        let mut consecutive_errors = 0u32;
        let mut last_error: Option<io::Error> = None;
        loop {
            let stop = match dispatch.listener.accept() {
                Ok(Accepted::Connection(connection)) => {
                    consecutive_errors = 0;
                    self.dispatch(*connection);
                    false
                }
                Ok(Accepted::Idle) | Ok(Accepted::Answered) => {
                    consecutive_errors = 0;
                    false
                }
                Ok(Accepted::Stopped) => true,
                Err(e) => {
                    consecutive_errors += 1;
                    dispatch
                        .diagnostics
                        .error(SOURCE, format!("accept failed: {e}"));
                    last_error = Some(e);
                    consecutive_errors >= MAX_CONSECUTIVE_ACCEPT_ERRORS
                }
            };

            dispatch.diagnostics.drain_and_emit();
            if stop {
                break;
            }
            if !self.poll_interval.is_zero() {
                thread::sleep(self.poll_interval);
                // Lines published during the sleep must not also wait out the next accept
                dispatch.diagnostics.drain_and_emit();
            }
        }

        drop(guard);
        dispatch.pool.shutdown();
        dispatch.diagnostics.info(SOURCE, "acceptor loop stopped");
        dispatch.diagnostics.drain_and_emit();

        let pool = dispatch.pool.metrics();
        info!(
            dispatched = pool.get_dispatched_count(),
            completed = pool.get_completed_count(),
            panicked = pool.get_panicked_count(),
            diagnostics = dispatch.diagnostics.published(),
            "Acceptor loop stopped"
        );

        match last_error {
            Some(e) if consecutive_errors >= MAX_CONSECUTIVE_ACCEPT_ERRORS => {
                error!(error = %e, "Giving up after repeated accept failures");
                Err(ServerError::Io(e))
            }
            _ => Ok(()),
        }
    }

    /// Submit one connection to the pool without waiting for it.
    fn dispatch(&self, mut connection: Connection) {
        let dispatch = Arc::clone(&self.dispatch);
        if dispatch.pool.is_closed() {
            dispatch.diagnostics.warn(
                SOURCE,
                format!("{}: worker pool closed, rejecting", connection.id),
            );
            connection.response.fail(503);
            if let Err(e) = connection.response.close() {
                warn!(error = %e, "Failed to send rejection");
            }
            return;
        }
        let job = Arc::clone(&dispatch);
        if dispatch
            .pool
            .submit(move || pipeline::process(connection, &job))
            .is_err()
        {
            dispatch
                .diagnostics
                .warn(SOURCE, "worker pool closed during submit");
        }
    }

    /// Run the acceptor loop on a dedicated thread.
    ///
    /// # Errors
    ///
    /// [`ServerError::Io`] when the thread cannot be spawned.
    pub fn start(self) -> Result<ServerHandle, ServerError> {
        let addr = self.local_addr();
        let stop = self.stop_handle();
        let thread = thread::Builder::new()
            .name("parley-acceptor".to_string())
            .spawn(move || self.run())?;
        Ok(ServerHandle { addr, stop, thread })
    }
}

/// Stops a server's listener; cloneable and usable from any thread
#[derive(Clone)]
pub struct StopHandle(Arc<dyn Listener>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.stop();
    }
}

impl fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StopHandle")
            .field(&self.0.local_addr())
            .finish()
    }
}

/// Handle to a server running on its own thread
///
/// Provides methods for waiting until the server is ready, stopping it
/// gracefully, or joining the acceptor thread.
#[derive(Debug)]
pub struct ServerHandle {
    addr: Option<SocketAddr>,
    stop: StopHandle,
    thread: thread::JoinHandle<Result<(), ServerError>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Wait until the listener accepts TCP connections.
    ///
    /// Listeners without a socket address are ready immediately.
    ///
    /// # Errors
    ///
    /// Returns `TimedOut` if the socket doesn't accept within ~250ms
    /// (50 attempts × 5ms).
    pub fn wait_ready(&self) -> io::Result<()> {
        let Some(addr) = self.addr else {
            return Ok(());
        };
        for _ in 0..50 {
            if TcpStream::connect(addr).is_ok() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "server not ready"))
    }

    /// Stop accepting and wait for in-flight requests to finish.
    pub fn stop(self) -> Result<(), ServerError> {
        self.stop.stop();
        self.join()
    }

    /// Wait for the acceptor thread to exit.
    ///
    /// # Errors
    ///
    /// The loop's own error, or [`ServerError::Io`] if the thread panicked.
    pub fn join(self) -> Result<(), ServerError> {
        self.thread.join().map_err(|_| {
            ServerError::Io(io::Error::new(
                io::ErrorKind::Other,
                "acceptor thread panicked",
            ))
        })?
    }
}
