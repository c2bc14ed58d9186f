#![forbid(unsafe_code)]

//! Coordination primitives built only from WATCH/MULTI/EXEC, ordered sets,
//! lists and expiring strings: no server-side scripting.
//!
//! Each manager owns one [`StoreAdapter`](fc_runtime::StoreAdapter)
//! connection. WATCH state is per connection, so concurrent callers each
//! build their own manager from their own connection.

pub mod autocomplete;
pub mod contacts;
pub mod delayed;
mod error;
pub mod lock;
pub mod messaging;
pub mod optimistic;
pub mod semaphore;
#[cfg(test)]
mod test_support;
mod token;
pub mod worker;

pub use autocomplete::{AutocompleteIndex, find_prefix_range};
pub use contacts::RecentContacts;
pub use delayed::{DelayedQueue, DelayedTask, PollOutcome};
pub use error::{CoordError, Result};
pub use lock::{LockGuard, LockManager};
pub use messaging::{ChatId, ChatMessage, ChatMessages, Messaging};
pub use optimistic::{RetryPolicy, TxnOutcome, exec_atomic, run_optimistic};
pub use semaphore::SemaphoreManager;
pub use token::OwnerToken;
pub use worker::{BackgroundLoop, Step, StopFlag};
