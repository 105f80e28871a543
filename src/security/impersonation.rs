use super::Identity;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Opaque token for one acquired security context
#[derive(Debug, PartialEq, Eq)]
pub struct SecurityContext {
    pub identity: String,
    pub token: u64,
}

/// Failure to switch into a connecting identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImpersonationError {
    /// The connection carries no authenticated identity
    Unauthenticated,
    /// The platform refused the switch
    Denied {
        identity: String,
        reason: String,
    },
}

impl fmt::Display for ImpersonationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImpersonationError::Unauthenticated => {
                write!(f, "cannot impersonate an unauthenticated connection")
            }
            ImpersonationError::Denied { identity, reason } => {
                write!(f, "impersonation of '{}' denied: {}", identity, reason)
            }
        }
    }
}

impl std::error::Error for ImpersonationError {}

/// Acquire/release of a worker's security context
///
/// `acquire` switches the calling worker to `identity`; `release` switches it
/// back. The pipeline only ever calls these through [`impersonate`], whose
/// guard releases exactly once.
pub trait Impersonator: Send + Sync {
    fn acquire(&self, identity: &Identity) -> Result<SecurityContext, ImpersonationError>;
    fn release(&self, context: SecurityContext);
}

/// Default impersonator: no OS call, just bookkeeping
///
/// Tracks how many contexts are currently held so tests and health checks can
/// confirm every switch was reverted.
#[derive(Debug, Default)]
pub struct TracingImpersonator {
    next_token: AtomicU64,
    active: AtomicUsize,
    acquired: AtomicU64,
}

impl TracingImpersonator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contexts acquired and not yet released
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Contexts acquired over the lifetime of the impersonator
    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::SeqCst)
    }
}

impl Impersonator for TracingImpersonator {
    fn acquire(&self, identity: &Identity) -> Result<SecurityContext, ImpersonationError> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        self.active.fetch_add(1, Ordering::SeqCst);
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(SecurityContext {
            identity: identity.name.clone(),
            token,
        })
    }

    fn release(&self, _context: SecurityContext) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Scoped impersonation; reverts when dropped
pub struct ImpersonationGuard<'a> {
    impersonator: &'a dyn Impersonator,
    context: Option<SecurityContext>,
}

impl<'a> ImpersonationGuard<'a> {
    /// Name of the identity the worker is running as
    pub fn identity(&self) -> Option<&str> {
        self.context.as_ref().map(|c| c.identity.as_str())
    }

    /// Revert now instead of at end of scope.
    pub fn revert(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(context) = self.context.take() {
            self.impersonator.release(context);
        }
    }
}

impl Drop for ImpersonationGuard<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Switch to `identity` for the lifetime of the returned guard.
pub fn impersonate<'a>(
    impersonator: &'a dyn Impersonator,
    identity: Option<&Identity>,
) -> Result<ImpersonationGuard<'a>, ImpersonationError> {
    let identity = identity.ok_or(ImpersonationError::Unauthenticated)?;
    let context = impersonator.acquire(identity)?;
    Ok(ImpersonationGuard {
        impersonator,
        context: Some(context),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthScheme;

    #[test]
    fn test_guard_releases_on_drop() {
        let imp = TracingImpersonator::new();
        let alice = Identity::new("alice", AuthScheme::Basic);
        {
            let guard = impersonate(&imp, Some(&alice)).unwrap();
            assert_eq!(guard.identity(), Some("alice"));
            assert_eq!(imp.active(), 1);
        }
        assert_eq!(imp.active(), 0);
        assert_eq!(imp.acquired(), 1);
    }

    #[test]
    fn test_explicit_revert_releases_once() {
        let imp = TracingImpersonator::new();
        let alice = Identity::new("alice", AuthScheme::Basic);
        let guard = impersonate(&imp, Some(&alice)).unwrap();
        guard.revert();
        assert_eq!(imp.active(), 0);
    }

    #[test]
    fn test_unauthenticated_is_rejected() {
        let imp = TracingImpersonator::new();
        assert_eq!(
            impersonate(&imp, None).err(),
            Some(ImpersonationError::Unauthenticated)
        );
        assert_eq!(imp.acquired(), 0);
    }

    #[test]
    fn test_guard_releases_during_unwind() {
        let imp = TracingImpersonator::new();
        let alice = Identity::new("alice", AuthScheme::Basic);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = impersonate(&imp, Some(&alice)).unwrap();
            panic!("handler blew up");
        }));
        assert!(result.is_err());
        assert_eq!(imp.active(), 0);
    }
}
