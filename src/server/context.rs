use super::request::RequestView;
use super::response::ResponseView;
use crate::diagnostics::Publisher;
use crate::ids::ConnectionId;
use crate::modules::Modules;
use crate::security::Identity;
use std::sync::Arc;

/// What a listener hands over for one accepted request
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub request: RequestView,
    pub response: ResponseView,
    /// Authenticated principal, `None` for anonymous connections
    pub identity: Option<Identity>,
}

impl Connection {
    pub fn new(request: RequestView, response: ResponseView, identity: Option<Identity>) -> Self {
        let id = ConnectionId::for_request(&request);
        Self {
            id,
            request,
            response,
            identity,
        }
    }
}

/// Everything a handler can see and touch for one request
///
/// Lives exactly as long as the pipeline run for its connection.
pub struct ConnectionContext {
    pub id: ConnectionId,
    pub request: RequestView,
    pub response: ResponseView,
    pub identity: Option<Identity>,
    log: Publisher,
    modules: Arc<Modules>,
}

impl ConnectionContext {
    pub fn new(connection: Connection, log: Publisher, modules: Arc<Modules>) -> Self {
        Self {
            id: connection.id,
            request: connection.request,
            response: connection.response,
            identity: connection.identity,
            log,
            modules,
        }
    }

    /// Publish an operator-facing line tagged with this connection's id.
    pub fn log(&self, message: impl Into<String>) {
        self.log.info(message);
    }

    /// The diagnostics publisher for this connection
    pub fn diagnostics(&self) -> &Publisher {
        &self.log
    }

    /// A preloaded module by name, if it exists and has type `T`
    pub fn module<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.modules.get::<T>(name)
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }
}
