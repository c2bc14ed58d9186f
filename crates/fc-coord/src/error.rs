use fc_runtime::{AdapterError, CommandError, StoreError};

/// Errors surfaced by the coordination primitives.
///
/// Contention and exhausted timeouts are not errors; they come back as
/// `None`/`false` outcomes from the individual operations.
#[derive(Debug, thiserror::Error)]
pub enum CoordError {
    #[error(transparent)]
    Store(#[from] AdapterError),
    #[error("lock {name:?} could not be acquired")]
    LockUnavailable { name: String },
    #[error("lease of {lease:?} is shorter than the store's 1 ms expiry resolution")]
    LeaseTooShort { lease: std::time::Duration },
    #[error("malformed payload: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("unwatched commit was rejected by the store")]
    Aborted,
    #[error("failed to spawn background worker: {0}")]
    Spawn(#[source] std::io::Error),
}

impl From<CommandError> for CoordError {
    fn from(value: CommandError) -> Self {
        Self::Store(AdapterError::Command(value))
    }
}

impl From<StoreError> for CoordError {
    fn from(value: StoreError) -> Self {
        Self::Store(AdapterError::from(value))
    }
}

pub type Result<T, E = CoordError> = std::result::Result<T, E>;
