//! `tiny_http` transport: socket accept, HTTP/1.1 parsing and the
//! authentication handshake, all on the acceptor's control thread.

use super::context::Connection;
use super::listener::{Accepted, Listener};
use super::request::RequestView;
use super::response::{ResponseParts, ResponseSink, ResponseView};
use crate::config::AuthScheme;
use crate::error::ServerError;
use crate::security::{parse_authorization, AuthOutcome, Authenticator, Identity};
use parking_lot::Mutex;
use std::fmt;
use std::io::{self, Read};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiny_http::{Header, Response};
use tracing::{debug, warn};

type SharedRequest = Arc<Mutex<Option<tiny_http::Request>>>;

/// Authentication enforced before a request is handed out
#[derive(Clone)]
pub struct ListenerAuth {
    pub scheme: AuthScheme,
    pub realm: String,
    pub authenticator: Option<Arc<dyn Authenticator>>,
}

impl ListenerAuth {
    pub fn anonymous() -> Self {
        Self {
            scheme: AuthScheme::Anonymous,
            realm: String::new(),
            authenticator: None,
        }
    }

    /// `WWW-Authenticate` value for a fresh challenge
    fn challenge(&self) -> Option<String> {
        let token = self.scheme.challenge_token()?;
        Some(match self.scheme {
            AuthScheme::Basic => format!("{} realm=\"{}\"", token, self.realm),
            _ => token.to_string(),
        })
    }
}

impl fmt::Debug for ListenerAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerAuth")
            .field("scheme", &self.scheme)
            .field("realm", &self.realm)
            .field("authenticator", &self.authenticator.is_some())
            .finish()
    }
}

enum AuthDecision {
    Allow(Option<Identity>),
    Challenge(String),
}

/// [`Listener`] backed by a `tiny_http::Server`
pub struct TinyHttpListener {
    server: tiny_http::Server,
    auth: ListenerAuth,
    accept_wait: Duration,
    stopped: AtomicBool,
}

impl fmt::Debug for TinyHttpListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TinyHttpListener")
            .field("addr", &self.local_addr())
            .field("auth", &self.auth)
            .field("accept_wait", &self.accept_wait)
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

impl TinyHttpListener {
    /// Bind the listening socket.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] when the address cannot be bound.
    pub fn bind(
        addr: SocketAddr,
        auth: ListenerAuth,
        accept_wait: Duration,
    ) -> Result<Self, ServerError> {
        let server = tiny_http::Server::http(addr).map_err(|e| ServerError::Bind {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;
        debug!(%addr, scheme = %auth.scheme, "listener bound");
        Ok(Self {
            server,
            auth,
            accept_wait,
            stopped: AtomicBool::new(false),
        })
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn authorize(&self, request: &tiny_http::Request) -> AuthDecision {
        let Some(challenge) = self.auth.challenge() else {
            return AuthDecision::Allow(None);
        };
        let header = request
            .headers()
            .iter()
            .find(|h| h.field.equiv("Authorization"))
            .map(|h| h.value.to_string());
        let Some(header) = header else {
            return AuthDecision::Challenge(challenge);
        };
        let Some((scheme, credentials)) = parse_authorization(&header) else {
            return AuthDecision::Challenge(challenge);
        };
        let expected = self.auth.scheme.challenge_token().unwrap_or_default();
        if !scheme.eq_ignore_ascii_case(expected) {
            return AuthDecision::Challenge(challenge);
        }
        let Some(authenticator) = self.auth.authenticator.as_ref() else {
            return AuthDecision::Challenge(challenge);
        };
        match authenticator.authenticate(self.auth.scheme, credentials) {
            AuthOutcome::Authenticated(identity) => AuthDecision::Allow(Some(identity)),
            AuthOutcome::Continue(token) => AuthDecision::Challenge(format!("{expected} {token}")),
            AuthOutcome::Rejected => AuthDecision::Challenge(challenge),
        }
    }

    fn answer(request: tiny_http::Request, status: u16, challenge: Option<&str>) {
        let mut response = Response::empty(status);
        if let Some(value) = challenge {
            if let Ok(header) = Header::from_bytes(&b"WWW-Authenticate"[..], value.as_bytes()) {
                response = response.with_header(header);
            }
        }
        if let Err(e) = request.respond(response) {
            warn!(error = %e, status, "failed to answer request");
        }
    }

    fn into_connection(request: tiny_http::Request, identity: Option<Identity>) -> Accepted {
        let method = match http::Method::from_bytes(request.method().as_str().as_bytes()) {
            Ok(method) => method,
            Err(_) => {
                Self::answer(request, 400, None);
                return Accepted::Answered;
            }
        };
        let mut view = RequestView::new(method, request.url());
        for header in request.headers() {
            view = view.with_header(header.field.as_str().as_str(), header.value.to_string());
        }
        if let Some(addr) = request.remote_addr() {
            view = view.with_remote_addr(*addr);
        }
        let content_length = request.body_length().map(|n| n as u64);

        let shared: SharedRequest = Arc::new(Mutex::new(Some(request)));
        let view = view.with_body_reader(
            Box::new(TinyHttpBody(Arc::clone(&shared))),
            content_length,
        );
        let response = ResponseView::new(Box::new(TinyHttpSink(shared)));
        Accepted::Connection(Box::new(Connection::new(view, response, identity)))
    }
}

impl Listener for TinyHttpListener {
    fn accept(&self) -> io::Result<Accepted> {
        if self.is_stopped() {
            return Ok(Accepted::Stopped);
        }
        let request = match self.server.recv_timeout(self.accept_wait) {
            Ok(Some(request)) => request,
            Ok(None) if self.is_stopped() => return Ok(Accepted::Stopped),
            Ok(None) => return Ok(Accepted::Idle),
            Err(_) if self.is_stopped() => return Ok(Accepted::Stopped),
            Err(e) => return Err(e),
        };
        match self.authorize(&request) {
            AuthDecision::Allow(identity) => Ok(Self::into_connection(request, identity)),
            AuthDecision::Challenge(challenge) => {
                debug!(url = %request.url(), "authentication required");
                Self::answer(request, 401, Some(&challenge));
                Ok(Accepted::Answered)
            }
        }
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            self.server.unblock();
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }
}

/// Request body stream; reads through to the underlying `tiny_http` request
/// until the response has been sent.
struct TinyHttpBody(SharedRequest);

impl Read for TinyHttpBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.0.lock().as_mut() {
            Some(request) => request.as_reader().read(buf),
            None => Ok(0),
        }
    }
}

struct TinyHttpSink(SharedRequest);

impl ResponseSink for TinyHttpSink {
    fn finish(self: Box<Self>, parts: ResponseParts) -> io::Result<()> {
        let request = self.0.lock().take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "request already answered")
        })?;
        let mut response = Response::from_data(parts.body).with_status_code(parts.status);
        if let Some(content_type) = parts.content_type.as_deref() {
            if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], content_type.as_bytes()) {
                response = response.with_header(header);
            }
        }
        // tiny_http derives Content-Length from the body it is given
        for (name, value) in &parts.headers {
            if name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            match Header::from_bytes(name.as_bytes(), value.as_bytes()) {
                Ok(header) => response = response.with_header(header),
                Err(()) => warn!(header = %name, "dropping invalid response header"),
            }
        }
        request.respond(response)
    }
}
