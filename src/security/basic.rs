use super::{AuthOutcome, Authenticator, Identity};
use crate::config::{AuthScheme, UserEntry};
use base64::Engine;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Basic-auth authenticator backed by a fixed user table
///
/// Passwords are stored as lowercase hex SHA-256 digests, never in clear.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    users: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `[[users]]` table of the server config.
    pub fn from_entries(entries: &[UserEntry]) -> Self {
        let users = entries
            .iter()
            .map(|u| (u.name.clone(), u.password_sha256.to_lowercase()))
            .collect();
        Self { users }
    }

    /// Add a user with a clear-text password (hashed on insert).
    pub fn with_user(mut self, name: &str, password: &str) -> Self {
        self.users.insert(name.to_string(), sha256_hex(password));
        self
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    fn verify(&self, user: &str, password: &str) -> bool {
        match self.users.get(user) {
            Some(expected) => {
                constant_time_eq(expected.as_bytes(), sha256_hex(password).as_bytes())
            }
            None => false,
        }
    }
}

impl Authenticator for StaticCredentials {
    fn authenticate(&self, scheme: AuthScheme, credentials: &str) -> AuthOutcome {
        if scheme != AuthScheme::Basic {
            return AuthOutcome::Rejected;
        }
        match decode_basic(credentials) {
            Some((user, password)) if self.verify(&user, &password) => {
                AuthOutcome::Authenticated(Identity::new(user, AuthScheme::Basic))
            }
            _ => AuthOutcome::Rejected,
        }
    }
}

/// Decode `base64(user:password)`.
///
/// The password may itself contain `:`; only the first colon separates.
pub fn decode_basic(credentials: &str) -> Option<(String, String)> {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(credentials.trim())
        .ok()?;
    let text = String::from_utf8(raw).ok()?;
    let (user, password) = text.split_once(':')?;
    if user.is_empty() {
        return None;
    }
    Some((user.to_string(), password.to_string()))
}

/// Lowercase hex SHA-256 digest of a string
pub fn sha256_hex(input: &str) -> String {
    Sha256::digest(input.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic(user: &str, pass: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"))
    }

    #[test]
    fn test_decode_basic() {
        assert_eq!(
            decode_basic(&basic("alice", "a:b")),
            Some(("alice".to_string(), "a:b".to_string()))
        );
        assert_eq!(decode_basic("!!!not-base64"), None);
        assert_eq!(decode_basic(&basic("", "pw")), None);
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_static_credentials() {
        let creds = StaticCredentials::new().with_user("alice", "s3cret");
        assert_eq!(
            creds.authenticate(AuthScheme::Basic, &basic("alice", "s3cret")),
            AuthOutcome::Authenticated(Identity::new("alice", AuthScheme::Basic))
        );
        assert_eq!(
            creds.authenticate(AuthScheme::Basic, &basic("alice", "wrong")),
            AuthOutcome::Rejected
        );
        assert_eq!(
            creds.authenticate(AuthScheme::Basic, &basic("bob", "s3cret")),
            AuthOutcome::Rejected
        );
        assert_eq!(
            creds.authenticate(AuthScheme::Negotiate, &basic("alice", "s3cret")),
            AuthOutcome::Rejected
        );
    }

    #[test]
    fn test_from_entries_normalizes_case() {
        let entries = vec![UserEntry {
            name: "carol".to_string(),
            password_sha256: sha256_hex("pw").to_uppercase(),
        }];
        let creds = StaticCredentials::from_entries(&entries);
        assert!(matches!(
            creds.authenticate(AuthScheme::Basic, &basic("carol", "pw")),
            AuthOutcome::Authenticated(_)
        ));
    }
}
