//! # Server Configuration
//!
//! Startup configuration for a parley server. It is built once, validated, and
//! then frozen into the [`DispatchConfig`](crate::pipeline::DispatchConfig)
//! shared by every pipeline; nothing here changes after the listener binds.
//!
//! ## Layering
//!
//! Values are resolved in this order, later layers winning:
//!
//! 1. Built-in defaults ([`ServerConfig::default`])
//! 2. An optional TOML file ([`ServerConfig::from_file`])
//! 3. `PARLEY_*` environment variables ([`ServerConfig::apply_env`])
//! 4. Command-line flags (applied by the CLI)
//!
//! ## Environment Variables
//!
//! | Variable | Field | Example |
//! |----------|-------|---------|
//! | `PARLEY_ADDR` | `addr` | `0.0.0.0:8080` |
//! | `PARLEY_AUTH` | `auth` | `basic` |
//! | `PARLEY_WORKERS` | `workers` | `8` |
//! | `PARLEY_IMPERSONATE` | `impersonate` | `true` |
//! | `PARLEY_SKIP_BODY_READ` | `skip_body_read` | `false` |
//! | `PARLEY_POLL_INTERVAL_MS` | `poll_interval_ms` | `30` |
//! | `PARLEY_DIAGNOSTICS_BOUND` | `diagnostics_bound` | `10000` |
//!
//! ## Example File
//!
//! ```toml
//! addr = "0.0.0.0:8080"
//! auth = "basic"
//! workers = 8
//! impersonate = true
//! preload = ["geoip"]
//!
//! [[users]]
//! name = "alice"
//! password_sha256 = "2bd806c97f0e00af1a1fc3328fa763a9269723c8db8fac4f93af71db186d6e90"
//! ```

use crate::error::ConfigError;
use serde::Deserialize;
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Default worker capacity
pub const DEFAULT_WORKERS: usize = 4;
/// Default acceptor idle sleep
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 30;
/// Default upper bound on how long one accept call waits before reporting idle
pub const DEFAULT_ACCEPT_WAIT_MS: u64 = DEFAULT_POLL_INTERVAL_MS;
/// Default diagnostics queue bound
pub const DEFAULT_DIAGNOSTICS_BOUND: usize = 10_000;

/// Authentication scheme enforced by the listener
///
/// There is deliberately no "none" value: a server that does not authenticate
/// uses [`AuthScheme::Anonymous`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthScheme {
    /// No authentication; every connection has no identity
    #[default]
    Anonymous,
    /// RFC 7617 Basic credentials
    Basic,
    /// SPNEGO / Kerberos
    Negotiate,
    /// NTLM challenge/response
    Ntlm,
}

impl AuthScheme {
    /// Scheme token used in `WWW-Authenticate` / `Authorization`
    pub fn challenge_token(&self) -> Option<&'static str> {
        match self {
            AuthScheme::Anonymous => None,
            AuthScheme::Basic => Some("Basic"),
            AuthScheme::Negotiate => Some("Negotiate"),
            AuthScheme::Ntlm => Some("NTLM"),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !matches!(self, AuthScheme::Anonymous)
    }
}

impl FromStr for AuthScheme {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "anonymous" | "unauthenticated" => Ok(AuthScheme::Anonymous),
            "basic" => Ok(AuthScheme::Basic),
            "negotiate" | "kerberos" => Ok(AuthScheme::Negotiate),
            "ntlm" => Ok(AuthScheme::Ntlm),
            _ => Err(ConfigError::UnknownAuthScheme {
                scheme: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthScheme::Anonymous => "anonymous",
            AuthScheme::Basic => "basic",
            AuthScheme::Negotiate => "negotiate",
            AuthScheme::Ntlm => "ntlm",
        };
        f.write_str(name)
    }
}

/// A Basic-auth user entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserEntry {
    pub name: String,
    /// Lowercase hex SHA-256 digest of the password
    pub password_sha256: String,
}

/// Startup configuration for the server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (`host:port`)
    pub addr: String,
    /// Authentication scheme
    pub auth: AuthScheme,
    /// Worker pool capacity (≥ 1)
    pub workers: usize,
    /// Run each handler under the connecting identity
    pub impersonate: bool,
    /// Leave the request body unread; handlers see no body fields
    pub skip_body_read: bool,
    /// Module names made available to every handler invocation
    pub preload: Vec<String>,
    /// Acceptor idle sleep in milliseconds
    pub poll_interval_ms: u64,
    /// Longest single accept wait in milliseconds before the loop ticks idle;
    /// never more than `poll_interval_ms` when that is nonzero
    pub accept_wait_ms: u64,
    /// Maximum buffered diagnostic lines before the oldest are dropped
    pub diagnostics_bound: usize,
    /// Realm advertised in Basic challenges
    pub realm: String,
    /// Basic-auth user table
    pub users: Vec<UserEntry>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
            auth: AuthScheme::Anonymous,
            workers: DEFAULT_WORKERS,
            impersonate: false,
            skip_body_read: false,
            preload: Vec::new(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            accept_wait_ms: DEFAULT_ACCEPT_WAIT_MS,
            diagnostics_bound: DEFAULT_DIAGNOSTICS_BOUND,
            realm: "parley".to_string(),
            users: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file on top of the defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::File {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&text).map_err(|e| match e {
            ConfigError::File { reason, .. } => ConfigError::File {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::File {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })
    }

    /// Defaults overridden by `PARLEY_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from `PARLEY_*` environment variables.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Override fields from an arbitrary variable lookup.
    ///
    /// Unparseable numeric or boolean values are ignored; an unknown scheme
    /// name is an error.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("PARLEY_ADDR") {
            self.addr = addr;
        }
        if let Some(auth) = lookup("PARLEY_AUTH") {
            self.auth = auth.parse()?;
        }
        if let Some(workers) = lookup("PARLEY_WORKERS").and_then(|s| s.parse().ok()) {
            self.workers = workers;
        }
        if let Some(flag) = lookup("PARLEY_IMPERSONATE").and_then(|s| parse_flag(&s)) {
            self.impersonate = flag;
        }
        if let Some(flag) = lookup("PARLEY_SKIP_BODY_READ").and_then(|s| parse_flag(&s)) {
            self.skip_body_read = flag;
        }
        if let Some(ms) = lookup("PARLEY_POLL_INTERVAL_MS").and_then(|s| s.parse().ok()) {
            self.poll_interval_ms = ms;
        }
        if let Some(bound) = lookup("PARLEY_DIAGNOSTICS_BOUND").and_then(|s| s.parse().ok()) {
            self.diagnostics_bound = bound;
        }
        Ok(())
    }

    /// Reject configurations that must never start.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.impersonate && !self.auth.is_authenticated() {
            return Err(ConfigError::ImpersonationRequiresAuth);
        }
        if self.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        self.socket_addr()?;
        Ok(())
    }

    /// Resolve the listen address without binding it.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.addr
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| ConfigError::InvalidAddress {
                addr: self.addr.clone(),
            })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Longest single accept wait, capped at the poll interval so buffered
    /// diagnostics never wait more than one interval for the acceptor.
    pub fn accept_wait(&self) -> Duration {
        let ms = match self.poll_interval_ms {
            0 => self.accept_wait_ms,
            poll => self.accept_wait_ms.min(poll),
        };
        Duration::from_millis(ms)
    }
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
