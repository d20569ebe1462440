/// The consumer side of a writer/sink pair: receives batches of elements and
/// a single, terminal notification.
///
/// All methods are called outside the storage lock (see `storage.rs`), and
/// at most one call into a given `Delegate` is ever in flight at a time
/// (enforced by the `in_outcall` flag in the state machine), so a delegate
/// implementation never needs its own synchronization to serialize these
/// calls against each other.
///
/// A delegate may call [`crate::SinkHandle::set_writability`] reentrantly
/// from inside [`Delegate::did_yield`]/[`Delegate::did_yield_one`]; elements
/// yielded during that reentrant call are buffered and drained in a
/// follow-up call once the outer one returns, rather than starting a
/// second, overlapping call.
pub trait Delegate<E, Err>: Send + Sync + 'static {
    /// Delivers a contiguous batch of elements, in the order they were
    /// yielded.
    ///
    /// Must not block indefinitely: blocking here stalls every producer
    /// waiting on this writer, since it holds up the draining of `buffer`
    /// and therefore the eventual flip of `in_outcall` back to `false`.
    fn did_yield(&self, elements: Vec<E>);

    /// Fast path for a single-element batch. The default forwards to
    /// [`Delegate::did_yield`] with a one-element `Vec`; override only if a
    /// single-element delivery can meaningfully avoid the `Vec` allocation
    /// or a per-batch cost on the delegate's side.
    fn did_yield_one(&self, element: E) {
        self.did_yield(vec![element]);
    }

    /// Called exactly once, after all accepted elements have been
    /// delivered. `error` is the originating finish error, if any; `None`
    /// on a clean finish.
    ///
    /// The default implementation does nothing; most delegates only care
    /// about the elements and treat termination as "stop expecting more
    /// calls".
    #[allow(unused_variables)]
    fn did_terminate(&self, error: Option<Err>) {}
}

/// Lets a delegate be shared between the storage it's wired into and
/// whatever else (typically a test, or a sibling subsystem) wants to
/// observe it independently, without requiring `Delegate` implementors to
/// bake `Arc` sharing into their own type.
impl<E, Err, T> Delegate<E, Err> for std::sync::Arc<T>
where
    T: Delegate<E, Err> + ?Sized,
{
    fn did_yield(&self, elements: Vec<E>) {
        (**self).did_yield(elements)
    }

    fn did_yield_one(&self, element: E) {
        (**self).did_yield_one(element)
    }

    fn did_terminate(&self, error: Option<Err>) {
        (**self).did_terminate(error)
    }
}
