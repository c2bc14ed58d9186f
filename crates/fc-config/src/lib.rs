#![forbid(unsafe_code)]

//! Tunables for the coordination primitives.
//!
//! Durations are carried as milliseconds so a TOML file reads naturally:
//!
//! ```toml
//! lock_acquire_timeout_ms = 10000
//! poll_interval_ms = 10
//! autocomplete_window = 10
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Prefix for environment overrides, e.g. `FC_POLL_INTERVAL_MS=25`.
pub const ENV_PREFIX: &str = "FC_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordConfig {
    /// How long a plain `acquire` keeps retrying before giving up.
    pub lock_acquire_timeout_ms: u64,
    /// Sleep between SETNX attempts.
    pub lock_retry_interval_ms: u64,
    /// Sleep between optimistic transaction attempts.
    pub txn_retry_backoff_ms: u64,
    /// Upper bound on the compare-and-delete loop in lock release.
    pub release_max_wait_ms: u64,
    /// Acquire timeout of the guard lock in `acquire_with_lock`.
    pub semaphore_lock_timeout_ms: u64,
    pub autocomplete_max_wait_ms: u64,
    /// Maximum number of candidates an autocomplete query returns.
    pub autocomplete_window: usize,
    /// Sleep between empty polls of the delayed set.
    pub poll_interval_ms: u64,
    pub poller_lock_timeout_ms: u64,
    /// Length cap of a user's recent-contacts list.
    pub recent_contacts_cap: usize,
}

impl Default for CoordConfig {
    fn default() -> Self {
        Self {
            lock_acquire_timeout_ms: 10_000,
            lock_retry_interval_ms: 1,
            txn_retry_backoff_ms: 1,
            release_max_wait_ms: 10_000,
            semaphore_lock_timeout_ms: 10,
            autocomplete_max_wait_ms: 10_000,
            autocomplete_window: 10,
            poll_interval_ms: 10,
            poller_lock_timeout_ms: 10_000,
            recent_contacts_cap: 100,
        }
    }
}

impl CoordConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file, then apply `FC_*` environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Self = toml::from_str(&text)?;
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `lookup("FC_<FIELD_NAME>")`. `lookup` is a
    /// parameter so callers and tests can supply their own source.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |field: &'static str| -> Result<Option<u64>, ConfigError> {
            let name = format!("{ENV_PREFIX}{}", field.to_ascii_uppercase());
            match lookup(&name) {
                None => Ok(None),
                Some(raw) => raw.trim().parse::<u64>().map(Some).map_err(|err| {
                    ConfigError::Invalid {
                        field,
                        reason: format!("{name}={raw:?}: {err}"),
                    }
                }),
            }
        };

        macro_rules! override_ms {
            ($($field:ident),+ $(,)?) => {
                $(
                    if let Some(value) = read(stringify!($field))? {
                        self.$field = value;
                    }
                )+
            };
        }
        override_ms!(
            lock_acquire_timeout_ms,
            lock_retry_interval_ms,
            txn_retry_backoff_ms,
            release_max_wait_ms,
            semaphore_lock_timeout_ms,
            autocomplete_max_wait_ms,
            poll_interval_ms,
            poller_lock_timeout_ms,
        );
        if let Some(value) = read("autocomplete_window")? {
            self.autocomplete_window = usize::try_from(value).unwrap_or(usize::MAX);
        }
        if let Some(value) = read("recent_contacts_cap")? {
            self.recent_contacts_cap = usize::try_from(value).unwrap_or(usize::MAX);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.autocomplete_window == 0 {
            return Err(ConfigError::Invalid {
                field: "autocomplete_window",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.recent_contacts_cap == 0 {
            return Err(ConfigError::Invalid {
                field: "recent_contacts_cap",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "poll_interval_ms",
                reason: "a zero interval busy-spins the poller".to_string(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn lock_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_acquire_timeout_ms)
    }

    #[must_use]
    pub fn lock_retry_interval(&self) -> Duration {
        Duration::from_millis(self.lock_retry_interval_ms)
    }

    #[must_use]
    pub fn txn_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.txn_retry_backoff_ms)
    }

    #[must_use]
    pub fn release_max_wait(&self) -> Duration {
        Duration::from_millis(self.release_max_wait_ms)
    }

    #[must_use]
    pub fn semaphore_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.semaphore_lock_timeout_ms)
    }

    #[must_use]
    pub fn autocomplete_max_wait(&self) -> Duration {
        Duration::from_millis(self.autocomplete_max_wait_ms)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn poller_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.poller_lock_timeout_ms)
    }
}
