#![forbid(unsafe_code)]

//! Store adapter contract consumed by the coordination layer, plus an
//! in-process implementation with per-connection WATCH state.

mod batch;
mod commands;
mod local;

use std::time::{SystemTime, UNIX_EPOCH};

pub use batch::Batch;
pub use commands::Commands;
pub use fc_command::{Command, CommandError, Reply};
pub use fc_store::{Aggregate, PttlValue, ScoreBound, StoreError};
pub use local::{LocalConnection, SharedStore};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("store connection failed: {0}")]
    Io(String),
}

impl From<StoreError> for AdapterError {
    fn from(value: StoreError) -> Self {
        Self::Command(CommandError::Store(value))
    }
}

/// One client session against the ordered key-value store.
///
/// WATCH state belongs to the connection, so concurrent callers must each
/// hold their own connection.
pub trait StoreAdapter {
    /// Run a single command immediately.
    fn execute(&mut self, command: Command) -> Result<Reply, AdapterError>;

    /// Snapshot `keys`; the next [`StoreAdapter::commit`] aborts if any changed.
    fn watch(&mut self, keys: &[String]) -> Result<(), AdapterError>;

    fn unwatch(&mut self) -> Result<(), AdapterError>;

    /// Apply `batch` indivisibly. Returns `Ok(None)` when a watched key
    /// changed since [`StoreAdapter::watch`]; nothing is applied in that case.
    /// Watches are cleared either way.
    fn commit(&mut self, batch: Batch) -> Result<Option<Vec<Reply>>, AdapterError>;
}

impl<T: StoreAdapter + ?Sized> StoreAdapter for &mut T {
    fn execute(&mut self, command: Command) -> Result<Reply, AdapterError> {
        (**self).execute(command)
    }

    fn watch(&mut self, keys: &[String]) -> Result<(), AdapterError> {
        (**self).watch(keys)
    }

    fn unwatch(&mut self) -> Result<(), AdapterError> {
        (**self).unwatch()
    }

    fn commit(&mut self, batch: Batch) -> Result<Option<Vec<Reply>>, AdapterError> {
        (**self).commit(batch)
    }
}

/// Milliseconds since the Unix epoch, the time base for scores and TTLs.
#[must_use]
pub fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
