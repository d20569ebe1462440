//! The sink-facing handle: [`SinkHandle`].

use crate::delegate::Delegate;
use crate::storage::Storage;
use crate::sync::Arc;

/// The handle the sink owner uses to report writability and to finish the
/// stream from its own side.
///
/// Unlike [`crate::Writer`], this handle is not `Clone`: writability is
/// driven by a single sink owner (typically the task that owns the
/// underlying synchronous resource, e.g. a socket or file). Nothing here
/// prevents sharing it behind an `Arc` at a higher layer if an embedder
/// needs that; there is simply no builtin refcounted clone, since the
/// common case is a single owner.
pub struct SinkHandle<E, D, Err> {
    storage: Arc<Storage<E, D, Err>>,
}

impl<E, D, Err> SinkHandle<E, D, Err>
where
    D: Delegate<E, Err>,
    Err: Clone + std::fmt::Debug,
{
    pub(crate) fn new(storage: Arc<Storage<E, D, Err>>) -> Self {
        SinkHandle { storage }
    }

    /// Reports whether the underlying resource can currently accept more
    /// data. Flipping `false -> true` drains whatever accumulated while
    /// unwritable (and resumes any producers suspended on it); flipping
    /// `true -> false` simply starts buffering future yields again.
    ///
    /// May be called reentrantly from inside
    /// [`Delegate::did_yield`]/[`Delegate::did_yield_one`]; see the crate
    /// docs' "Reentrancy" section for why that's safe.
    pub fn set_writability(&self, writable: bool) {
        self.storage.set_writability(writable);
    }

    /// Finishes the sink side cleanly. Any buffered-but-undelivered
    /// elements are dropped; any producers currently suspended on this
    /// writer resolve with [`crate::YieldError::AlreadyFinished`].
    pub fn finish(&self) {
        self.storage.sink_finish(None);
    }

    /// Finishes the sink side with an error. Buffered elements are
    /// dropped; suspended producers resolve with
    /// [`crate::YieldError::Sink`] carrying this error, and the delegate's
    /// [`Delegate::did_terminate`] receives it too.
    pub fn finish_with_error(&self, error: Err) {
        self.storage.sink_finish(Some(error));
    }
}

impl<E, D, Err> Drop for SinkHandle<E, D, Err>
where
    D: Delegate<E, Err>,
    Err: Clone + std::fmt::Debug,
{
    fn drop(&mut self) {
        self.storage.sink_finish(None);
    }
}
