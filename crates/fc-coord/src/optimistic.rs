//! WATCH / queue / commit with a bounded retry loop.

use std::thread;
use std::time::{Duration, Instant};

use fc_runtime::{Batch, Reply, StoreAdapter};
use tracing::{trace, warn};

use crate::error::{CoordError, Result};

/// Result of [`run_optimistic`].
#[derive(Debug, Clone, PartialEq)]
pub enum TxnOutcome {
    /// The batch was applied; replies are in queue order.
    Committed(Vec<Reply>),
    /// The body decided there was nothing to commit.
    Skipped,
    /// Every attempt within the deadline was rejected.
    TimedOut,
}

impl TxnOutcome {
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }

    #[must_use]
    pub fn into_replies(self) -> Option<Vec<Reply>> {
        match self {
            Self::Committed(replies) => Some(replies),
            Self::Skipped | Self::TimedOut => None,
        }
    }
}

/// Retry limits for [`run_optimistic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_wait: Duration,
    pub backoff: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_wait: Duration, backoff: Duration) -> Self {
        Self { max_wait, backoff }
    }
}

/// Watch `keys`, let `body` read state and build a batch, then commit.
///
/// A rejected commit discards the batch and starts over from the watch.
/// `body` returning `Ok(None)` unwatches and yields [`TxnOutcome::Skipped`].
/// The first attempt always runs, even with a zero `max_wait`.
pub fn run_optimistic<A, F>(
    conn: &mut A,
    keys: &[String],
    policy: RetryPolicy,
    mut body: F,
) -> Result<TxnOutcome>
where
    A: StoreAdapter + ?Sized,
    F: FnMut(&mut A) -> Result<Option<Batch>>,
{
    let deadline = Instant::now() + policy.max_wait;
    let mut attempt: u32 = 0;
    loop {
        if attempt > 0 && Instant::now() >= deadline {
            trace!(?keys, attempt, "optimistic transaction timed out");
            return Ok(TxnOutcome::TimedOut);
        }
        attempt += 1;

        conn.watch(keys)?;
        let batch = match body(conn) {
            Ok(Some(batch)) => batch,
            Ok(None) => {
                conn.unwatch()?;
                return Ok(TxnOutcome::Skipped);
            }
            Err(err) => {
                if let Err(unwatch_err) = conn.unwatch() {
                    warn!(error = %unwatch_err, "unwatch after failed body");
                }
                return Err(err);
            }
        };

        match conn.commit(batch)? {
            Some(replies) => return Ok(TxnOutcome::Committed(replies)),
            None => {
                trace!(?keys, attempt, "watched key changed, retrying");
                if !policy.backoff.is_zero() {
                    thread::sleep(policy.backoff);
                }
            }
        }
    }
}

/// Move the reply at `slot` out of a committed batch. A missing slot reads
/// as `Nil`, which the typed accessors then reject.
pub(crate) fn take_reply(replies: &mut [Reply], slot: usize) -> Reply {
    replies
        .get_mut(slot)
        .map_or(Reply::Nil, |reply| std::mem::replace(reply, Reply::Nil))
}

/// Commit `batch` with no watched keys, as MULTI/EXEC would.
pub fn exec_atomic<A>(conn: &mut A, batch: Batch) -> Result<Vec<Reply>>
where
    A: StoreAdapter + ?Sized,
{
    conn.unwatch()?;
    conn.commit(batch)?.ok_or(CoordError::Aborted)
}
