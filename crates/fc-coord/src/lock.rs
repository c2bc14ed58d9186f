//! Named mutual-exclusion locks stored as `lock:<name>` → owner token.

use std::thread;
use std::time::{Duration, Instant};

use fc_config::CoordConfig;
use fc_runtime::{Batch, Commands, PttlValue, StoreAdapter};
use tracing::{debug, trace, warn};

use crate::error::{CoordError, Result};
use crate::optimistic::{RetryPolicy, TxnOutcome, run_optimistic};
use crate::token::OwnerToken;

const LOCK_PREFIX: &str = "lock:";

/// Expiry is tracked in whole milliseconds; anything shorter would delete
/// the lock the moment it is taken.
pub const MIN_LEASE: Duration = Duration::from_millis(1);

#[must_use]
pub fn lock_key(name: &str) -> String {
    format!("{LOCK_PREFIX}{name}")
}

// ── Connection-level operations ─────────────────────────────────────────
//
// Shared by `LockManager` and the primitives that take a lock on their own
// connection (messaging, the delayed-task poller, guarded semaphores).

pub(crate) fn acquire_on<A>(
    conn: &mut A,
    name: &str,
    acquire_timeout: Duration,
    retry_interval: Duration,
    lease: Option<Duration>,
) -> Result<Option<OwnerToken>>
where
    A: StoreAdapter + ?Sized,
{
    if let Some(lease) = lease
        && lease < MIN_LEASE
    {
        return Err(CoordError::LeaseTooShort { lease });
    }
    let key = lock_key(name);
    let token = OwnerToken::generate();
    let deadline = Instant::now() + acquire_timeout;
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        if conn.set_nx(&key, token.as_str())? {
            if let Some(lease) = lease {
                conn.expire(&key, lease)?;
            }
            debug!(name, %token, attempt, "lock acquired");
            return Ok(Some(token));
        }
        if let Some(lease) = lease
            && conn.ttl(&key)? == PttlValue::NoExpiry
        {
            // An earlier holder died between SETNX and EXPIRE.
            conn.expire(&key, lease)?;
            debug!(name, "repaired lease on lock without expiry");
        }
        if Instant::now() >= deadline {
            trace!(name, attempt, "lock acquire timed out");
            return Ok(None);
        }
        thread::sleep(retry_interval);
    }
}

pub(crate) fn release_on<A>(
    conn: &mut A,
    name: &str,
    token: &OwnerToken,
    policy: RetryPolicy,
) -> Result<bool>
where
    A: StoreAdapter + ?Sized,
{
    let key = lock_key(name);
    let outcome = run_optimistic(conn, std::slice::from_ref(&key), policy, |conn| {
        if conn.get(&key)?.as_deref() != Some(token.as_str()) {
            return Ok(None);
        }
        let mut batch = Batch::new();
        batch.del(&[key.as_str()]);
        Ok(Some(batch))
    })?;
    match outcome {
        TxnOutcome::Committed(_) => {
            debug!(name, %token, "lock released");
            Ok(true)
        }
        TxnOutcome::Skipped => Ok(false),
        TxnOutcome::TimedOut => {
            warn!(name, %token, "lock release gave up under contention");
            Ok(false)
        }
    }
}

// ── LockManager ─────────────────────────────────────────────────────────

/// Acquires and releases named locks over one store connection.
#[derive(Debug)]
pub struct LockManager<A> {
    conn: A,
    config: CoordConfig,
}

impl<A: StoreAdapter> LockManager<A> {
    pub fn new(conn: A, config: CoordConfig) -> Self {
        Self { conn, config }
    }

    pub fn connection(&mut self) -> &mut A {
        &mut self.conn
    }

    pub fn into_inner(self) -> A {
        self.conn
    }

    /// Retry SETNX until `acquire_timeout` elapses. `None` on timeout.
    pub fn acquire(
        &mut self,
        name: &str,
        acquire_timeout: Duration,
    ) -> Result<Option<OwnerToken>> {
        acquire_on(
            &mut self.conn,
            name,
            acquire_timeout,
            self.config.lock_retry_interval(),
            None,
        )
    }

    /// [`LockManager::acquire`] with the configured default timeout.
    pub fn acquire_default(&mut self, name: &str) -> Result<Option<OwnerToken>> {
        let timeout = self.config.lock_acquire_timeout();
        self.acquire(name, timeout)
    }

    /// Like [`LockManager::acquire`], but the lock expires after `lease`.
    /// Leases under [`MIN_LEASE`] are rejected with
    /// [`CoordError::LeaseTooShort`].
    ///
    /// A lock found without any expiry gets `lease` applied so a holder that
    /// crashed between SETNX and EXPIRE cannot wedge it forever.
    pub fn acquire_with_lease(
        &mut self,
        name: &str,
        acquire_timeout: Duration,
        lease: Duration,
    ) -> Result<Option<OwnerToken>> {
        acquire_on(
            &mut self.conn,
            name,
            acquire_timeout,
            self.config.lock_retry_interval(),
            Some(lease),
        )
    }

    /// Delete the lock only if it still holds `token`.
    pub fn release(&mut self, name: &str, token: &OwnerToken) -> Result<bool> {
        let policy = RetryPolicy::new(
            self.config.release_max_wait(),
            self.config.txn_retry_backoff(),
        );
        release_on(&mut self.conn, name, token, policy)
    }

    /// Acquire with the default timeout and wrap the token in a guard.
    pub fn lock(&mut self, name: &str) -> Result<Option<LockGuard<'_, A>>> {
        Ok(self.acquire_default(name)?.map(|token| LockGuard {
            manager: self,
            name: name.to_owned(),
            token: Some(token),
        }))
    }
}

/// Holds a lock until [`LockGuard::release`] or drop.
#[derive(Debug)]
pub struct LockGuard<'a, A: StoreAdapter> {
    manager: &'a mut LockManager<A>,
    name: String,
    token: Option<OwnerToken>,
}

impl<A: StoreAdapter> LockGuard<'_, A> {
    #[must_use]
    pub fn token(&self) -> Option<&OwnerToken> {
        self.token.as_ref()
    }

    /// Run commands on the manager's connection while the lock is held.
    pub fn connection(&mut self) -> &mut A {
        self.manager.connection()
    }

    /// Release now. Returns `false` if the lock was lost in the meantime.
    pub fn release(mut self) -> Result<bool> {
        match self.token.take() {
            Some(token) => self.manager.release(&self.name, &token),
            None => Ok(false),
        }
    }
}

impl<A: StoreAdapter> Drop for LockGuard<'_, A> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            match self.manager.release(&self.name, &token) {
                Ok(true) => {}
                Ok(false) => warn!(name = %self.name, %token, "lock was lost before guard drop"),
                Err(err) => warn!(name = %self.name, error = %err, "lock release on drop failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use fc_config::CoordConfig;
    use fc_runtime::{Commands, PttlValue, SharedStore};

    use super::{LockManager, lock_key};
    use crate::error::CoordError;
    use crate::token::OwnerToken;

    fn manager(shared: &std::sync::Arc<SharedStore>) -> LockManager<fc_runtime::LocalConnection> {
        LockManager::new(shared.connect(), CoordConfig::default())
    }

    #[test]
    fn second_acquire_times_out_until_release() {
        let shared = SharedStore::new();
        let mut a = manager(&shared);
        let mut b = manager(&shared);
        let token = a.acquire("res", Duration::from_millis(10)).unwrap().expect("free");
        assert!(b.acquire("res", Duration::from_millis(10)).unwrap().is_none());
        assert!(a.release("res", &token).unwrap());
        assert!(b.acquire("res", Duration::from_millis(10)).unwrap().is_some());
    }

    #[test]
    fn release_with_foreign_token_is_refused() {
        let shared = SharedStore::new();
        let mut a = manager(&shared);
        let token = a.acquire("res", Duration::from_millis(10)).unwrap().unwrap();
        let stranger = OwnerToken::generate();
        assert!(!a.release("res", &stranger).unwrap());
        assert_eq!(
            a.connection().get(&lock_key("res")).unwrap(),
            Some(token.to_string())
        );
        assert!(!a.release("missing", &token).unwrap());
    }

    #[test]
    fn lease_sets_expiry() {
        let shared = SharedStore::new();
        let mut a = manager(&shared);
        a.acquire_with_lease("res", Duration::from_millis(10), Duration::from_secs(30))
            .unwrap()
            .unwrap();
        match a.connection().ttl(&lock_key("res")).unwrap() {
            PttlValue::Remaining(ms) => assert!(ms > 0 && ms <= 30_000),
            other => panic!("expected remaining ttl, got {other:?}"),
        }
    }

    #[test]
    fn expired_lease_frees_lock_for_another_caller() {
        let shared = SharedStore::new();
        let mut a = manager(&shared);
        let mut b = manager(&shared);
        a.acquire_with_lease("res", Duration::from_millis(10), Duration::from_millis(30))
            .unwrap()
            .unwrap();
        assert!(b.acquire("res", Duration::from_millis(5)).unwrap().is_none());
        let token = b.acquire("res", Duration::from_millis(500)).unwrap();
        assert!(token.is_some());
    }

    #[test]
    fn sub_millisecond_lease_is_rejected_before_touching_the_lock() {
        let shared = SharedStore::new();
        let mut a = manager(&shared);
        let mut b = manager(&shared);
        let err = a
            .acquire_with_lease("res", Duration::from_millis(10), Duration::from_micros(500))
            .expect_err("lease too short");
        assert!(matches!(err, CoordError::LeaseTooShort { .. }));
        assert_eq!(shared.key_count(), 0);

        let token = b.acquire("res", Duration::from_millis(10)).unwrap().expect("free");
        assert!(a.acquire("res", Duration::from_millis(5)).unwrap().is_none());
        assert!(b.release("res", &token).unwrap());
    }

    #[test]
    fn lease_acquire_repairs_lock_without_expiry() {
        let shared = SharedStore::new();
        let mut a = manager(&shared);
        a.connection().set(&lock_key("res"), "orphan", None).unwrap();
        let got = a
            .acquire_with_lease("res", Duration::from_millis(5), Duration::from_secs(5))
            .unwrap();
        assert!(got.is_none());
        assert!(matches!(
            a.connection().ttl(&lock_key("res")).unwrap(),
            PttlValue::Remaining(_)
        ));
    }

    #[test]
    fn guard_releases_on_drop() {
        let shared = SharedStore::new();
        let mut a = manager(&shared);
        {
            let guard = a.lock("res").unwrap().expect("free");
            assert!(guard.token().is_some());
        }
        assert_eq!(shared.key_count(), 0);

        let guard = a.lock("res").unwrap().unwrap();
        assert!(guard.release().unwrap());
        assert_eq!(shared.key_count(), 0);
    }
}
