//! # Security Module
//!
//! Authentication and impersonation collaborators for the server.
//!
//! ## Overview
//!
//! - [`Authenticator`] validates the credentials a listener extracted from the
//!   `Authorization` header and yields an [`Identity`]. [`StaticCredentials`]
//!   implements RFC 7617 Basic against a user table of SHA-256 password digests.
//! - [`Impersonator`] switches the executing worker to a connecting identity and
//!   back. [`ImpersonationGuard`] is the only way the pipeline uses it, so the
//!   switch is always reverted when the guard drops, on every exit path.
//!
//! ## Authentication Flow
//!
//! 1. The listener reads `Authorization: <scheme> <credentials>`
//! 2. A missing header or a scheme mismatch gets `401` with the configured challenge
//! 3. The [`Authenticator`] returns an [`AuthOutcome`]:
//!    - `Authenticated(identity)`: the request is dispatched with that identity
//!    - `Continue(token)`: multi-leg handshake (Negotiate/NTLM), `401` with the token
//!    - `Rejected`: `401` with a fresh challenge
//!
//! Requests that do not authenticate never reach the worker pool.

mod basic;
mod impersonation;

pub use basic::{decode_basic, sha256_hex, StaticCredentials};
pub use impersonation::{
    impersonate, ImpersonationError, ImpersonationGuard, Impersonator, SecurityContext,
    TracingImpersonator,
};

use crate::config::AuthScheme;
use serde::Serialize;
use std::fmt;

/// An authenticated principal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    /// Principal name (user name for Basic, the realm principal for Negotiate)
    pub name: String,
    /// Scheme that authenticated it
    #[serde(serialize_with = "serialize_scheme")]
    pub scheme: AuthScheme,
}

impl Identity {
    pub fn new(name: impl Into<String>, scheme: AuthScheme) -> Self {
        Self {
            name: name.into(),
            scheme,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.scheme)
    }
}

fn serialize_scheme<S: serde::Serializer>(scheme: &AuthScheme, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&scheme.to_string())
}

/// Result of checking one `Authorization` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Credentials accepted
    Authenticated(Identity),
    /// Handshake needs another round trip; the token goes into the challenge
    Continue(String),
    /// Credentials refused
    Rejected,
}

/// Validates credentials for one authentication scheme.
///
/// Implementations must be cheap to call from the listener thread and must
/// never panic on malformed input.
pub trait Authenticator: Send + Sync {
    /// `credentials` is the header value after the scheme token, trimmed.
    fn authenticate(&self, scheme: AuthScheme, credentials: &str) -> AuthOutcome;
}

/// Split an `Authorization` header into its scheme token and credentials.
pub fn parse_authorization(header: &str) -> Option<(&str, &str)> {
    let header = header.trim();
    let (scheme, rest) = match header.split_once(' ') {
        Some((scheme, rest)) => (scheme, rest.trim()),
        None => (header, ""),
    };
    if scheme.is_empty() {
        None
    } else {
        Some((scheme, rest))
    }
}
