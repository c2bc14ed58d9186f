use fc_runtime::{AdapterError, Batch, Command, LocalConnection, Reply, StoreAdapter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Watch,
    Commit,
}

/// A [`LocalConnection`] that calls `hook` with a second connection to the
/// same store just before each WATCH and each commit.
pub(crate) struct HookedConnection<F> {
    inner: LocalConnection,
    side: LocalConnection,
    hook: F,
}

impl<F> HookedConnection<F>
where
    F: FnMut(Phase, &mut LocalConnection),
{
    pub(crate) fn new(inner: LocalConnection, hook: F) -> Self {
        let side = inner.shared().connect();
        Self { inner, side, hook }
    }
}

impl<F> StoreAdapter for HookedConnection<F>
where
    F: FnMut(Phase, &mut LocalConnection),
{
    fn execute(&mut self, command: Command) -> Result<Reply, AdapterError> {
        self.inner.execute(command)
    }

    fn watch(&mut self, keys: &[String]) -> Result<(), AdapterError> {
        (self.hook)(Phase::Watch, &mut self.side);
        self.inner.watch(keys)
    }

    fn unwatch(&mut self) -> Result<(), AdapterError> {
        self.inner.unwatch()
    }

    fn commit(&mut self, batch: Batch) -> Result<Option<Vec<Reply>>, AdapterError> {
        (self.hook)(Phase::Commit, &mut self.side);
        self.inner.commit(batch)
    }
}
