//! Owns the mutex-guarded [`Inner`] state machine and the delegate, and is
//! the only place that ever (a) takes the lock, (b) calls into the
//! delegate, and (c) sends on a suspended producer's `oneshot::Sender`.
//!
//! The shape here mirrors `into_underlying_sink.rs` in the crate this one
//! is descended from: take the guarded value out under the lock, decide
//! what to do, put the new value back, drop the lock, *then* run whatever
//! the decision called for. Nothing that can call back into user code ever
//! runs while `self.inner` is locked.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace};

use crate::delegate::Delegate;
use crate::state::{Effects, Inner, YieldOutcome};
use crate::sync::{Arc, Mutex, MutexGuard};
use crate::yield_id::{YieldId, YieldIdGenerator};

pub(crate) struct Storage<E, D, Err> {
    /// Per-instance id, purely for disambiguating `tracing` spans/events
    /// when multiple writer/sink pairs are live at once.
    id: u64,
    inner: Mutex<Inner<E, Err>>,
    delegate: D,
    yield_ids: YieldIdGenerator,
}

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(0);

impl<E, D, Err> Storage<E, D, Err>
where
    D: Delegate<E, Err>,
    Err: Clone + std::fmt::Debug,
{
    pub(crate) fn new(initial_writable: bool, delegate: D) -> Arc<Self> {
        let id = NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed);
        debug!(storage_id = id, initial_writable, "writer/sink pair created");
        Arc::new(Storage {
            id,
            inner: Mutex::new(Inner::new(initial_writable)),
            delegate,
            yield_ids: YieldIdGenerator::default(),
        })
    }

    /// Runs a `yield` to completion or suspension. Returns a receiver to
    /// await when the call must suspend; otherwise resolves synchronously.
    pub(crate) fn yield_elements(&self, elements: Vec<E>) -> (YieldId, YieldOutcome<Err>) {
        let id = self.yield_ids.next();
        trace!(storage_id = self.id, yield_id = ?id, len = elements.len(), "yield");
        let (outcome, effects) = {
            let mut inner = self.lock();
            inner.yield_event(elements, id)
        };
        self.run_effects(effects);
        (id, outcome)
    }

    /// Cancels an in-flight `yield`, called from the suspended future's
    /// `Drop` glue when it is dropped before resuming.
    pub(crate) fn cancel(&self, id: YieldId) {
        trace!(storage_id = self.id, yield_id = ?id, "cancel");
        let effects = {
            let mut inner = self.lock();
            inner.cancel(id)
        };
        self.run_effects(effects);
    }

    pub(crate) fn set_writability(&self, writable: bool) {
        trace!(storage_id = self.id, writable, "set_writability");
        let effects = {
            let mut inner = self.lock();
            inner.set_writability(writable)
        };
        self.run_effects(effects);
    }

    pub(crate) fn writer_finish(&self, error: Option<Err>) {
        debug!(storage_id = self.id, error = ?error, "writer finish");
        let effects = {
            let mut inner = self.lock();
            inner.writer_finish(error)
        };
        self.run_effects(effects);
    }

    pub(crate) fn writer_deinit(&self) {
        trace!(storage_id = self.id, "writer deinit");
        let effects = {
            let mut inner = self.lock();
            inner.writer_deinit()
        };
        self.run_effects(effects);
    }

    pub(crate) fn sink_finish(&self, error: Option<Err>) {
        debug!(storage_id = self.id, error = ?error, "sink finish");
        let effects = {
            let mut inner = self.lock();
            inner.sink_finish(error)
        };
        self.run_effects(effects);
    }

    fn lock(&self) -> MutexGuard<'_, Inner<E, Err>> {
        // `crate::sync::Mutex` is either `std`'s or loom's shadow type;
        // both expose the same `lock() -> LockResult<MutexGuard<T>>` shape,
        // so this helper works unmodified under `cfg(loom)`.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn deliver(&self, mut elements: Vec<E>) {
        if elements.len() == 1 {
            self.delegate.did_yield_one(elements.pop().expect("len checked above"));
        } else {
            self.delegate.did_yield(elements);
        }
    }

    /// Executes a batch of effects, looping back into
    /// [`Inner::unbuffer_queued_events`] after every delivery until the
    /// state machine reports nothing further pending. Termination is
    /// absorbing: once it fires, this returns without looping again.
    fn run_effects(&self, mut effects: Effects<E, Err>) {
        loop {
            for (resumer, result) in effects.resumes.drain(..) {
                // The receiving future may already have been dropped
                // (cancelled and raced with this very resume); that's a
                // benign, expected outcome, not an error.
                let _ = resumer.send(result);
            }
            let had_delivery = effects.delivery.is_some();
            if let Some(elements) = effects.delivery.take() {
                self.deliver(elements);
            }
            if let Some(error) = effects.terminate.take() {
                debug!(storage_id = self.id, error = ?error, "terminate");
                self.delegate.did_terminate(error);
                return;
            }
            if !had_delivery {
                return;
            }
            let mut inner = self.lock();
            effects = inner.unbuffer_queued_events();
            drop(inner);
        }
    }
}
