//! An asynchronous, back-pressured writer that bridges concurrent producers
//! to a single-threaded synchronous sink.
//!
//! Producers call [`Writer::yield_all`]/[`Writer::yield_one`] to push
//! elements in. When the sink reports it is writable (via
//! [`SinkHandle::set_writability`]), elements are delivered to a
//! [`Delegate`] implementation as soon as they arrive. When the sink is not
//! writable, producers suspend until it becomes writable again, at which
//! point everything buffered while unwritable is delivered in one batch and
//! every suspended producer resumes.
//!
//! ```ignore
//! let (writer, sink) = make_writer(true, MyDelegate::new());
//! sink.set_writability(true);
//! writer.yield_all([1, 2, 3]).await?;
//! writer.finish();
//! ```
//!
//! # Reentrancy
//!
//! A [`Delegate`] implementation may call
//! [`SinkHandle::set_writability`]/[`SinkHandle::finish`] reentrantly from
//! inside [`Delegate::did_yield`]/[`Delegate::did_yield_one`]. The state
//! machine tracks an internal "in an outcall" flag for exactly this reason:
//! elements yielded while a delivery is already in flight are appended to a
//! buffer rather than triggering a second, overlapping delegate call, and
//! are drained in a follow-up call once the first one returns. At most one
//! [`Delegate`] method call is ever in flight at a time.
//!
//! # Cancellation
//!
//! There is no separate cancellation-token type. A suspended
//! [`Writer::yield_all`]/[`Writer::yield_one`] call is an ordinary Rust
//! future; dropping it before it resolves cancels the yield, the
//! async-idiomatic equivalent of the original design's cancellation
//! callback.

mod close_ratchet;
mod delegate;
mod error;
mod sink;
mod state;
mod storage;
mod sync;
mod writer;
mod yield_id;

pub use close_ratchet::{CloseAction, CloseRatchet};
pub use delegate::Delegate;
pub use error::YieldError;
pub use sink::SinkHandle;
pub use writer::Writer;

use storage::Storage;

/// Creates a connected writer/sink pair sharing one piece of storage.
///
/// `initial_writable` seeds the writability flag before the sink ever
/// calls [`SinkHandle::set_writability`] explicitly; `delegate` receives
/// every delivered batch and the eventual termination notification.
pub fn make_writer<E, D, Err>(
    initial_writable: bool,
    delegate: D,
) -> (Writer<E, D, Err>, SinkHandle<E, D, Err>)
where
    D: Delegate<E, Err>,
    Err: Clone + std::fmt::Debug,
{
    let storage = Storage::new(initial_writable, delegate);
    (
        Writer::new(storage.clone()),
        SinkHandle::new(storage),
    )
}
