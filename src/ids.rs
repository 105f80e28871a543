//! Connection identifiers
//!
//! Every accepted connection gets a [`ConnectionId`]. It is the source tag
//! of every diagnostic line its pipeline publishes, so one request can be
//! followed through the interleaved output of the pool. A client that already
//! carries a trace id in one of [`TRACE_HEADERS`] keeps it, as long as it is
//! a ULID.

use crate::server::RequestView;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Request headers checked for a client-supplied id, in order
pub const TRACE_HEADERS: [&str; 2] = ["x-request-id", "x-correlation-id"];

#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct ConnectionId(pub Ulid);

impl ConnectionId {
    /// Mint a fresh id.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// The first well-formed id among [`TRACE_HEADERS`], or a fresh one.
    ///
    /// A malformed header is skipped rather than rejected; the request is
    /// still served under a minted id.
    pub fn for_request(request: &RequestView) -> Self {
        TRACE_HEADERS
            .iter()
            .filter_map(|name| request.get_header(name))
            .find_map(|value| value.trim().parse().ok())
            .unwrap_or_default()
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for ConnectionId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(ConnectionId)
    }
}

impl Serialize for ConnectionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
