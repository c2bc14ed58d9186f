//! Fair counting semaphore.
//!
//! Three keys back a semaphore called `name`:
//!
//! - `name`: timeline, token → acquisition time in ms. Entries older than the
//!   holder timeout are stale and get reclaimed by the next acquirer.
//! - `name:owner`: token → ticket. Rank in this set decides who holds.
//! - `name:counter`: monotonically increasing ticket source.
//!
//! Rank is taken on tickets rather than timestamps, so a caller whose clock
//! runs a little ahead cannot jump the queue.

use std::time::Duration;

use fc_config::CoordConfig;
use fc_runtime::{Aggregate, Batch, Commands, ScoreBound, StoreAdapter, unix_time_ms};
use tracing::{debug, trace};

use crate::error::Result;
use crate::lock::{acquire_on, release_on};
use crate::optimistic::{RetryPolicy, TxnOutcome, exec_atomic, run_optimistic, take_reply};
use crate::token::OwnerToken;

#[must_use]
pub fn owner_key(name: &str) -> String {
    format!("{name}:owner")
}

#[must_use]
pub fn counter_key(name: &str) -> String {
    format!("{name}:counter")
}

fn guard_lock_name(name: &str) -> String {
    format!("semaphore:{name}")
}

#[allow(clippy::cast_precision_loss)]
fn ms_score(ms: u64) -> f64 {
    ms as f64
}

pub(crate) fn acquire_on_conn<A>(
    conn: &mut A,
    name: &str,
    limit: u32,
    timeout: Duration,
) -> Result<Option<OwnerToken>>
where
    A: StoreAdapter + ?Sized,
{
    let token = OwnerToken::generate();
    let owner = owner_key(name);
    let counter = counter_key(name);
    let now = unix_time_ms();
    let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    let stale_before = ms_score(now.saturating_sub(timeout_ms));

    // Reclaim stale holders, drop their tickets, draw a ticket.
    let mut batch = Batch::new();
    batch
        .zremrangebyscore(name, ScoreBound::NEG_INF, ScoreBound::Exclusive(stale_before))
        .zinterstore(&owner, &[owner.as_str(), name], &[1.0, 0.0], Aggregate::Sum)
        .incr_by(&counter, 1);
    let mut replies = exec_atomic(conn, batch)?;
    let reclaimed = take_reply(&mut replies, 0).into_integer()?;
    let ticket = take_reply(&mut replies, 2).into_integer()?;
    if reclaimed > 0 {
        trace!(name, reclaimed, "reclaimed stale semaphore holders");
    }

    #[allow(clippy::cast_precision_loss)]
    let ticket_score = ticket as f64;
    let mut batch = Batch::new();
    batch
        .zadd(name, token.as_str(), ms_score(now))
        .zadd(&owner, token.as_str(), ticket_score)
        .zrank(&owner, token.as_str());
    let mut replies = exec_atomic(conn, batch)?;
    let rank = take_reply(&mut replies, 2).into_optional_integer()?;

    if rank.is_some_and(|rank| rank < i64::from(limit)) {
        debug!(name, %token, ticket, ?rank, "semaphore acquired");
        return Ok(Some(token));
    }

    let mut batch = Batch::new();
    batch.zrem(name, token.as_str()).zrem(&owner, token.as_str());
    exec_atomic(conn, batch)?;
    trace!(name, ticket, ?rank, limit, "semaphore full");
    Ok(None)
}

/// Holds at most `limit` concurrent owners per semaphore name.
#[derive(Debug)]
pub struct SemaphoreManager<A> {
    conn: A,
    config: CoordConfig,
}

impl<A: StoreAdapter> SemaphoreManager<A> {
    pub fn new(conn: A, config: CoordConfig) -> Self {
        Self { conn, config }
    }

    pub fn connection(&mut self) -> &mut A {
        &mut self.conn
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.config.release_max_wait(),
            self.config.txn_retry_backoff(),
        )
    }

    /// Try once to become one of `limit` holders. Holders whose acquisition
    /// is older than `timeout` are treated as gone.
    ///
    /// Returns `None` when the semaphore is full; this never waits.
    pub fn acquire(
        &mut self,
        name: &str,
        limit: u32,
        timeout: Duration,
    ) -> Result<Option<OwnerToken>> {
        acquire_on_conn(&mut self.conn, name, limit, timeout)
    }

    /// [`SemaphoreManager::acquire`] under the lock `semaphore:<name>`.
    ///
    /// Two unguarded acquirers can draw tickets in one order and insert them
    /// in the other, briefly letting the later ticket hold a slot. The lock
    /// closes that window. `None` if the lock itself is busy.
    pub fn acquire_with_lock(
        &mut self,
        name: &str,
        limit: u32,
        timeout: Duration,
    ) -> Result<Option<OwnerToken>> {
        let lock_name = guard_lock_name(name);
        let Some(lock_token) = acquire_on(
            &mut self.conn,
            &lock_name,
            self.config.semaphore_lock_timeout(),
            self.config.lock_retry_interval(),
            None,
        )?
        else {
            trace!(name, "semaphore guard lock busy");
            return Ok(None);
        };
        let acquired = acquire_on_conn(&mut self.conn, name, limit, timeout);
        let policy = self.retry_policy();
        release_on(&mut self.conn, &lock_name, &lock_token, policy)?;
        acquired
    }

    /// Give up a slot. `true` iff `token` was still in the timeline.
    pub fn release(&mut self, name: &str, token: &OwnerToken) -> Result<bool> {
        let owner = owner_key(name);
        let mut batch = Batch::new();
        batch.zrem(name, token.as_str()).zrem(&owner, token.as_str());
        let mut replies = exec_atomic(&mut self.conn, batch)?;
        let removed = take_reply(&mut replies, 0).into_integer()? == 1;
        debug!(name, %token, removed, "semaphore released");
        Ok(removed)
    }

    /// Push the holder's timeline entry to now so it is not reclaimed.
    ///
    /// `false` means the holder had already timed out and lost its slot.
    pub fn refresh(&mut self, name: &str, token: &OwnerToken) -> Result<bool> {
        let policy = self.retry_policy();
        let watched = [name.to_owned()];
        let outcome = run_optimistic(&mut self.conn, &watched, policy, |conn| {
            if conn.zscore(name, token.as_str())?.is_none() {
                return Ok(None);
            }
            let mut batch = Batch::new();
            batch.zadd(name, token.as_str(), ms_score(unix_time_ms()));
            Ok(Some(batch))
        })?;
        Ok(matches!(outcome, TxnOutcome::Committed(_)))
    }
}
