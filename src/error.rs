use std::fmt;

/// The error returned by a failing `yield`.
///
/// `Err` is the user-supplied error type passed to
/// [`crate::Writer::finish_with_error`] or
/// [`crate::SinkHandle::finish_with_error`]; it has no bound beyond what the
/// embedder needs (this crate never inspects it), so the `Display`/`Error`
/// impls below are written by hand rather than derived, bounded on
/// `Err: Debug` only where actually needed.
#[derive(Clone)]
pub enum YieldError<Err> {
    /// The writer or the sink has already finished, with no specific error
    /// attached (a clean finish, or a last-handle drop).
    AlreadyFinished,
    /// The sink finished with an explicit error, which is forwarded
    /// verbatim.
    Sink(Err),
}

impl<Err: fmt::Debug> fmt::Debug for YieldError<Err> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            YieldError::AlreadyFinished => f.write_str("AlreadyFinished"),
            YieldError::Sink(err) => f.debug_tuple("Sink").field(err).finish(),
        }
    }
}

impl<Err: fmt::Debug> fmt::Display for YieldError<Err> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            YieldError::AlreadyFinished => write!(f, "writer or sink already finished"),
            YieldError::Sink(err) => write!(f, "sink finished with an error: {err:?}"),
        }
    }
}

impl<Err: fmt::Debug> std::error::Error for YieldError<Err> {}

impl<Err> YieldError<Err> {
    /// Builds a [`YieldError`] from the error recorded on a finished sink,
    /// falling back to `AlreadyFinished` when the sink finished cleanly.
    pub(crate) fn from_sink_error(error: Option<Err>) -> Self {
        match error {
            Some(err) => YieldError::Sink(err),
            None => YieldError::AlreadyFinished,
        }
    }
}
