//! Delayed tasks: park work in `delayed:` until its time, then move it onto
//! the ready list `queue:<name>`.

use std::time::Duration;

use fc_config::CoordConfig;
use fc_runtime::{Commands, StoreAdapter, unix_time_ms};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::lock::{acquire_on, release_on};
use crate::optimistic::RetryPolicy;
use crate::token::OwnerToken;
use crate::worker::{BackgroundLoop, Step};

pub const DELAYED_KEY: &str = "delayed:";

#[must_use]
pub fn queue_key(queue: &str) -> String {
    format!("queue:{queue}")
}

/// Serialized form of a scheduled task. The JSON text is the set member, so
/// a task is never modified once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayedTask {
    pub token: OwnerToken,
    pub queue: String,
    pub task_name: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing due yet.
    Idle,
    /// Another poller holds the task's lock or moved it first.
    Contended,
    /// The task with this token is now on its ready queue.
    Moved(OwnerToken),
    /// The due entry was not a task descriptor and has been removed.
    Discarded,
}

#[derive(Debug)]
pub struct DelayedQueue<A> {
    conn: A,
    config: CoordConfig,
}

impl<A: StoreAdapter> DelayedQueue<A> {
    pub fn new(conn: A, config: CoordConfig) -> Self {
        Self { conn, config }
    }

    pub fn connection(&mut self) -> &mut A {
        &mut self.conn
    }

    /// Queue `task_name(args)` on `queue`. A zero delay goes straight onto
    /// the ready list; anything else waits in `delayed:`.
    pub fn schedule(
        &mut self,
        queue: &str,
        task_name: &str,
        args: Vec<String>,
        delay: Duration,
    ) -> Result<OwnerToken> {
        let task = DelayedTask {
            token: OwnerToken::generate(),
            queue: queue.to_owned(),
            task_name: task_name.to_owned(),
            args,
        };
        let payload = serde_json::to_string(&task)?;
        if delay.is_zero() {
            self.conn.rpush(&queue_key(queue), &payload)?;
            debug!(queue, token = %task.token, "task ready immediately");
        } else {
            let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            #[allow(clippy::cast_precision_loss)]
            let due = unix_time_ms().saturating_add(delay_ms) as f64;
            self.conn.zadd(DELAYED_KEY, &payload, due)?;
            debug!(queue, token = %task.token, delay_ms, "task delayed");
        }
        Ok(task.token)
    }

    /// Move the earliest task onto its ready queue if it is due.
    pub fn poll_once(&mut self) -> Result<PollOutcome> {
        let head = self.conn.zrange_by_rank(DELAYED_KEY, 0, 0)?;
        let Some((payload, due)) = head.into_iter().next() else {
            return Ok(PollOutcome::Idle);
        };
        #[allow(clippy::cast_precision_loss)]
        let now = unix_time_ms() as f64;
        if due > now {
            return Ok(PollOutcome::Idle);
        }

        let task: DelayedTask = match serde_json::from_str(&payload) {
            Ok(task) => task,
            Err(err) => {
                warn!(error = %err, payload = %payload, "discarding malformed delayed task");
                self.conn.zrem(DELAYED_KEY, &[payload.as_str()])?;
                return Ok(PollOutcome::Discarded);
            }
        };
        let lock_name = task.token.as_str();
        let Some(lock_token) = acquire_on(
            &mut self.conn,
            lock_name,
            self.config.poller_lock_timeout(),
            self.config.lock_retry_interval(),
            None,
        )?
        else {
            trace!(token = %task.token, "delayed task locked by another poller");
            return Ok(PollOutcome::Contended);
        };

        let moved = self.move_to_ready(&payload, &task);
        let policy = RetryPolicy::new(
            self.config.release_max_wait(),
            self.config.txn_retry_backoff(),
        );
        release_on(&mut self.conn, lock_name, &lock_token, policy)?;
        moved
    }

    fn move_to_ready(&mut self, payload: &str, task: &DelayedTask) -> Result<PollOutcome> {
        if self.conn.zrem(DELAYED_KEY, &[payload])? != 1 {
            return Ok(PollOutcome::Contended);
        }
        self.conn.rpush(&queue_key(&task.queue), payload)?;
        debug!(queue = %task.queue, token = %task.token, "delayed task moved to ready queue");
        Ok(PollOutcome::Moved(task.token.clone()))
    }

    /// Pop the oldest ready task from `queue`.
    pub fn pop_ready(&mut self, queue: &str) -> Result<Option<DelayedTask>> {
        match self.conn.lpop(&queue_key(queue))? {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    pub fn ready_len(&mut self, queue: &str) -> Result<i64> {
        Ok(self.conn.llen(&queue_key(queue))?)
    }

    pub fn delayed_len(&mut self) -> Result<i64> {
        Ok(self.conn.zcard(DELAYED_KEY)?)
    }
}

impl<A: StoreAdapter + Send + 'static> DelayedQueue<A> {
    /// Run [`DelayedQueue::poll_once`] on a background thread, sleeping
    /// `poll_interval` whenever nothing is due.
    pub fn spawn_poller(mut self) -> Result<BackgroundLoop> {
        let idle = self.config.poll_interval();
        BackgroundLoop::spawn("delayed-poller", move || match self.poll_once() {
            Ok(PollOutcome::Idle) => Step::Sleep(idle),
            Ok(PollOutcome::Contended | PollOutcome::Moved(_) | PollOutcome::Discarded) => {
                Step::Continue
            }
            Err(err) => {
                warn!(error = %err, "delayed task poll failed");
                Step::Sleep(idle)
            }
        })
    }
}
