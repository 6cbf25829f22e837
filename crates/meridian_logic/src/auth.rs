//! The authentication seam.
//!
//! Credential storage is deliberately external: the logic process only
//! consumes the pass/fail/throttle contract below. The in-memory
//! implementation exists for tests and single-node setups; a production
//! deployment injects its own.

use crate::blocking::BlockingPool;
use async_trait::async_trait;
use dashmap::DashMap;
use meridian_session::AccountUid;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Failed attempts allowed inside the throttle window before lockout.
const THROTTLE_ATTEMPTS: u32 = 5;
/// The sliding throttle window.
const THROTTLE_WINDOW: Duration = Duration::from_secs(60);

/// Outcome of an authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Success(AccountUid),
    BadCredentials,
    /// Too many recent failures for this account name.
    Throttled { retry_after: Duration },
}

/// Validates credentials for the login command.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, name: &str, password: &str) -> AuthOutcome;
}

#[derive(Debug, Clone)]
struct AccountEntry {
    uid: AccountUid,
    password: String,
}

#[derive(Debug, Clone)]
struct FailureTrack {
    window_start: Instant,
    failures: u32,
}

/// In-memory account table with per-name failure throttling.
///
/// Verification runs on the blocking pool; a real implementation would
/// be hashing there, and keeping the pattern identical makes swapping
/// one in trivial.
pub struct MemoryAuthenticator {
    accounts: DashMap<String, AccountEntry>,
    failures: DashMap<String, FailureTrack>,
    pool: Arc<BlockingPool>,
    next_uid: std::sync::atomic::AtomicU64,
}

impl MemoryAuthenticator {
    pub fn new(pool: Arc<BlockingPool>) -> Self {
        Self {
            accounts: DashMap::new(),
            failures: DashMap::new(),
            pool,
            next_uid: std::sync::atomic::AtomicU64::new(1),
        }
    }

    /// Creates an account, returning its uid. Existing names are
    /// replaced; this is a test/bootstrap convenience, not a public
    /// registration flow.
    pub fn add_account(&self, name: &str, password: &str) -> AccountUid {
        let uid = AccountUid(
            self.next_uid
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed),
        );
        self.accounts.insert(
            name.to_lowercase(),
            AccountEntry {
                uid,
                password: password.to_string(),
            },
        );
        uid
    }

    fn throttled(&self, name: &str) -> Option<Duration> {
        let track = self.failures.get(name)?;
        let elapsed = track.window_start.elapsed();
        if elapsed >= THROTTLE_WINDOW {
            return None;
        }
        if track.failures >= THROTTLE_ATTEMPTS {
            Some(THROTTLE_WINDOW - elapsed)
        } else {
            None
        }
    }

    fn record_failure(&self, name: &str) {
        let mut track = self.failures.entry(name.to_string()).or_insert(FailureTrack {
            window_start: Instant::now(),
            failures: 0,
        });
        if track.window_start.elapsed() >= THROTTLE_WINDOW {
            track.window_start = Instant::now();
            track.failures = 0;
        }
        track.failures += 1;
    }
}

#[async_trait]
impl Authenticator for MemoryAuthenticator {
    async fn authenticate(&self, name: &str, password: &str) -> AuthOutcome {
        let name = name.to_lowercase();
        if let Some(retry_after) = self.throttled(&name) {
            warn!(account = %name, "login throttled");
            return AuthOutcome::Throttled { retry_after };
        }

        let entry = self.accounts.get(&name).map(|e| e.clone());
        let password = password.to_string();
        // Comparison happens off the event loop, like a hash check would.
        let verified = self
            .pool
            .run(move || {
                entry
                    .filter(|e| e.password == password)
                    .map(|e| e.uid)
            })
            .await
            .ok()
            .flatten();

        match verified {
            Some(uid) => {
                self.failures.remove(&name);
                info!(account = %name, uid = uid.0, "login succeeded");
                AuthOutcome::Success(uid)
            }
            None => {
                self.record_failure(&name);
                AuthOutcome::BadCredentials
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator() -> MemoryAuthenticator {
        MemoryAuthenticator::new(Arc::new(BlockingPool::new(2)))
    }

    #[tokio::test]
    async fn test_success_and_failure() {
        let auth = authenticator();
        let uid = auth.add_account("Mira", "sekrit");

        assert_eq!(auth.authenticate("mira", "sekrit").await, AuthOutcome::Success(uid));
        assert_eq!(
            auth.authenticate("mira", "wrong").await,
            AuthOutcome::BadCredentials
        );
        assert_eq!(
            auth.authenticate("nobody", "x").await,
            AuthOutcome::BadCredentials
        );
    }

    #[tokio::test]
    async fn test_throttle_after_repeated_failures() {
        let auth = authenticator();
        auth.add_account("mira", "sekrit");

        for _ in 0..THROTTLE_ATTEMPTS {
            assert_eq!(
                auth.authenticate("mira", "wrong").await,
                AuthOutcome::BadCredentials
            );
        }
        // Even the right password is refused while throttled.
        assert!(matches!(
            auth.authenticate("mira", "sekrit").await,
            AuthOutcome::Throttled { .. }
        ));
    }

    #[tokio::test]
    async fn test_success_clears_failure_track() {
        let auth = authenticator();
        let uid = auth.add_account("mira", "sekrit");

        for _ in 0..THROTTLE_ATTEMPTS - 1 {
            auth.authenticate("mira", "wrong").await;
        }
        assert_eq!(auth.authenticate("mira", "sekrit").await, AuthOutcome::Success(uid));
        // The slate is clean again.
        assert_eq!(
            auth.authenticate("mira", "wrong").await,
            AuthOutcome::BadCredentials
        );
        assert_eq!(auth.authenticate("mira", "sekrit").await, AuthOutcome::Success(uid));
    }
}
