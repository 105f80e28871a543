use std::fmt;
use std::io;

/// Startup configuration error
///
/// Returned by `ServerConfig::validate()` and the server builder. Any of these
/// aborts startup before a listener is bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Impersonation requires an authenticated identity to switch to
    ///
    /// The `anonymous` scheme never produces one, so the combination is rejected.
    ImpersonationRequiresAuth,
    /// Worker capacity must be at least one
    ZeroWorkers,
    /// Unknown authentication scheme name
    UnknownAuthScheme {
        /// The rejected scheme string
        scheme: String,
    },
    /// The listen address could not be parsed
    InvalidAddress {
        /// The rejected address string
        addr: String,
    },
    /// A module named in the preload list was never registered
    UnknownModule {
        /// The missing module name
        name: String,
    },
    /// Negotiate/NTLM need a caller-supplied authenticator
    MissingAuthenticator {
        /// The scheme that has no authenticator
        scheme: String,
    },
    /// No handler was bound before `build()`
    MissingHandler,
    /// Configuration file could not be read or parsed
    File {
        /// Path of the file
        path: String,
        /// Underlying reason
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ImpersonationRequiresAuth => write!(
                f,
                "configuration error: impersonation cannot be combined with the anonymous \
                authentication scheme"
            ),
            ConfigError::ZeroWorkers => {
                write!(f, "configuration error: worker capacity must be at least 1")
            }
            ConfigError::UnknownAuthScheme { scheme } => write!(
                f,
                "configuration error: unknown authentication scheme '{}' \
                (expected anonymous, basic, negotiate or ntlm)",
                scheme
            ),
            ConfigError::InvalidAddress { addr } => {
                write!(f, "configuration error: invalid listen address '{}'", addr)
            }
            ConfigError::UnknownModule { name } => write!(
                f,
                "configuration error: preload module '{}' is not registered",
                name
            ),
            ConfigError::MissingAuthenticator { scheme } => write!(
                f,
                "configuration error: the '{}' scheme requires an authenticator",
                scheme
            ),
            ConfigError::MissingHandler => {
                write!(f, "configuration error: no handler bound")
            }
            ConfigError::File { path, reason } => {
                write!(f, "configuration error: {}: {}", path, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Errors that stop the server from starting or running
#[derive(Debug)]
pub enum ServerError {
    /// Invalid startup configuration
    Config(ConfigError),
    /// The listener could not bind its address
    Bind {
        /// Address that failed to bind
        addr: String,
        /// Underlying reason
        reason: String,
    },
    /// The control thread could not be spawned
    Io(io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Config(e) => write!(f, "{}", e),
            ServerError::Bind { addr, reason } => {
                write!(f, "failed to bind listener on {}: {}", addr, reason)
            }
            ServerError::Io(e) => write!(f, "server i/o error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Config(e) => Some(e),
            ServerError::Io(e) => Some(e),
            ServerError::Bind { .. } => None,
        }
    }
}

impl From<ConfigError> for ServerError {
    fn from(e: ConfigError) -> Self {
        ServerError::Config(e)
    }
}

impl From<io::Error> for ServerError {
    fn from(e: io::Error) -> Self {
        ServerError::Io(e)
    }
}
