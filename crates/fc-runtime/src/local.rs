use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use fc_command::{Command, CommandError, Reply, apply_command, command_keys};
use fc_store::Store;
use parking_lot::Mutex;
use tracing::trace;

use crate::{AdapterError, Batch, StoreAdapter, unix_time_ms};

static CLIENT_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// An in-process keyspace shared by any number of [`LocalConnection`]s.
///
/// Every command and every batch commit runs under one mutex, which gives
/// the same indivisibility as a single-threaded server.
#[derive(Debug, Default)]
pub struct SharedStore {
    store: Mutex<Store>,
}

impl SharedStore {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Open a new client session with its own WATCH state.
    #[must_use]
    pub fn connect(self: &Arc<Self>) -> LocalConnection {
        LocalConnection {
            shared: Arc::clone(self),
            client_id: CLIENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            watched_keys: Vec::new(),
        }
    }

    #[must_use]
    pub fn key_count(&self) -> usize {
        self.store.lock().len()
    }

    pub fn flush(&self) {
        self.store.lock().flushdb();
    }
}

#[derive(Debug)]
pub struct LocalConnection {
    shared: Arc<SharedStore>,
    client_id: u64,
    watched_keys: Vec<(String, u64)>,
}

impl LocalConnection {
    #[must_use]
    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    #[must_use]
    pub fn shared(&self) -> &Arc<SharedStore> {
        &self.shared
    }
}

impl Clone for LocalConnection {
    /// A clone is a fresh session on the same store; WATCH state is not shared.
    fn clone(&self) -> Self {
        self.shared.connect()
    }
}

fn command_error_to_reply(err: CommandError) -> Reply {
    match err {
        CommandError::Store(store_err) => Reply::Error(store_err),
        CommandError::WrongReplyType { .. } => Reply::Nil,
    }
}

impl StoreAdapter for LocalConnection {
    fn execute(&mut self, command: Command) -> Result<Reply, AdapterError> {
        let now_ms = unix_time_ms();
        trace!(
            client_id = self.client_id,
            command = command.name(),
            keys = ?command_keys(&command),
            "execute"
        );
        let mut store = self.shared.store.lock();
        Ok(apply_command(&command, &mut store, now_ms)?)
    }

    fn watch(&mut self, keys: &[String]) -> Result<(), AdapterError> {
        let now_ms = unix_time_ms();
        let mut store = self.shared.store.lock();
        for key in keys {
            let fp = store.key_fingerprint(key, now_ms);
            self.watched_keys.push((key.clone(), fp));
        }
        Ok(())
    }

    fn unwatch(&mut self) -> Result<(), AdapterError> {
        self.watched_keys.clear();
        Ok(())
    }

    fn commit(&mut self, batch: Batch) -> Result<Option<Vec<Reply>>, AdapterError> {
        let now_ms = unix_time_ms();
        let watched = std::mem::take(&mut self.watched_keys);
        let mut store = self.shared.store.lock();

        // Check watched keys: if any were modified, abort the transaction
        let watch_failed = watched
            .iter()
            .any(|(key, original_fp)| store.key_fingerprint(key, now_ms) != *original_fp);
        if watch_failed {
            trace!(client_id = self.client_id, queued = batch.len(), "commit aborted");
            return Ok(None);
        }

        let mut results = Vec::with_capacity(batch.len());
        for command in batch.commands() {
            match apply_command(command, &mut store, now_ms) {
                Ok(reply) => results.push(reply),
                Err(err) => results.push(command_error_to_reply(err)),
            }
        }
        trace!(client_id = self.client_id, applied = results.len(), "commit applied");
        Ok(Some(results))
    }
}
