//! The producer-facing handle: [`Writer`].

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::delegate::Delegate;
use crate::error::YieldError;
use crate::state::YieldOutcome;
use crate::storage::Storage;
use crate::sync::Arc;
use crate::yield_id::YieldId;

/// A cloneable handle producers use to push elements into the sink.
///
/// Every clone shares the same underlying storage. `finish`/`finish_with_error`
/// may be called from any clone and take effect immediately; dropping the
/// *last* clone has the same effect as an implicit `finish()` with no error,
/// mirroring a bare channel sender whose last drop closes the channel.
pub struct Writer<E, D, Err> {
    storage: Arc<Storage<E, D, Err>>,
    /// Tracks writer-side liveness independently of `storage`'s own
    /// refcount (which also includes the `SinkHandle` and any in-flight
    /// suspended yield). The last `Writer` clone to drop this to a strong
    /// count of 1 is the one that triggers `writer_deinit`.
    alive: Arc<()>,
}

impl<E, D, Err> Writer<E, D, Err>
where
    D: Delegate<E, Err>,
    Err: Clone + std::fmt::Debug,
{
    pub(crate) fn new(storage: Arc<Storage<E, D, Err>>) -> Self {
        Writer {
            storage,
            alive: Arc::new(()),
        }
    }

    /// Yields a batch of elements. Resolves once the sink has accepted
    /// them (delivered now, or buffered for later delivery once the sink
    /// becomes writable again).
    ///
    /// Dropping the returned future before it resolves cancels the yield:
    /// if it was still suspended, the sink never sees these elements.
    pub async fn yield_all<I>(&self, elements: I) -> Result<(), YieldError<Err>>
    where
        I: IntoIterator<Item = E>,
    {
        self.yield_vec(elements.into_iter().collect()).await
    }

    /// Yields a single element. Equivalent to `yield_all([element])` but
    /// avoids the intermediate `Vec` on the non-suspending path.
    pub async fn yield_one(&self, element: E) -> Result<(), YieldError<Err>> {
        self.yield_vec(vec![element]).await
    }

    async fn yield_vec(&self, elements: Vec<E>) -> Result<(), YieldError<Err>> {
        let (id, outcome) = self.storage.yield_elements(elements);
        match outcome {
            YieldOutcome::Done(result) => result,
            YieldOutcome::Suspend(receiver) => {
                SuspendedYield {
                    storage: &self.storage,
                    id,
                    receiver,
                    settled: false,
                }
                .await
            }
        }
    }

    /// Finishes the writer side cleanly. Idempotent with an implicit
    /// finish on last-handle drop: calling this and then dropping every
    /// clone is not an error, the second finish is simply absorbed by the
    /// state machine's terminal phase.
    pub fn finish(&self) {
        self.storage.writer_finish(None);
    }

    /// Finishes the writer side with an error, delivered to the sink's
    /// [`Delegate::did_terminate`](crate::Delegate::did_terminate).
    pub fn finish_with_error(&self, error: Err) {
        self.storage.writer_finish(Some(error));
    }
}

impl<E, D, Err> Clone for Writer<E, D, Err> {
    fn clone(&self) -> Self {
        Writer {
            storage: Arc::clone(&self.storage),
            alive: Arc::clone(&self.alive),
        }
    }
}

impl<E, D, Err> Drop for Writer<E, D, Err>
where
    D: Delegate<E, Err>,
    Err: Clone + std::fmt::Debug,
{
    fn drop(&mut self) {
        if Arc::strong_count(&self.alive) == 1 {
            self.storage.writer_deinit();
        }
    }
}

/// A suspended `yield`'s future: wraps the `oneshot::Receiver` the state
/// machine handed back, and cancels the yield on drop if it never
/// resolved. This is the async-idiomatic stand-in for an explicit
/// cancellation token: dropping the future *is* the cancellation signal.
struct SuspendedYield<'a, E, D, Err> {
    storage: &'a Arc<Storage<E, D, Err>>,
    id: YieldId,
    receiver: oneshot::Receiver<Result<(), YieldError<Err>>>,
    settled: bool,
}

impl<'a, E, D, Err> Future for SuspendedYield<'a, E, D, Err>
where
    D: Delegate<E, Err>,
    Err: Clone + std::fmt::Debug,
{
    type Output = Result<(), YieldError<Err>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => {
                this.settled = true;
                Poll::Ready(result)
            }
            // The sender side is only ever dropped after sending, via
            // `run_effects`; a closed channel with no value is
            // unreachable in practice, but treat it as a clean finish
            // rather than panicking on a future desync.
            Poll::Ready(Err(_)) => {
                this.settled = true;
                Poll::Ready(Err(YieldError::AlreadyFinished))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<'a, E, D, Err> Drop for SuspendedYield<'a, E, D, Err>
where
    D: Delegate<E, Err>,
    Err: Clone + std::fmt::Debug,
{
    fn drop(&mut self) {
        if !self.settled {
            self.storage.cancel(self.id);
        }
    }
}
