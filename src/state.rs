//! The writer state machine: a tagged `Phase` enum plus the pure transition
//! functions that drive it. Every public method here takes `&mut self`,
//! consumes the current phase by value (via `mem::replace` with the
//! transient [`Phase::Modifying`] sentinel), computes the next phase and an
//! [`Effects`] bundle describing what must happen *outside* the lock, and
//! writes the next phase back before returning.
//!
//! `storage.rs` is the only caller of these methods; it owns the mutex and
//! is responsible for actually running the returned effects once the lock
//! is dropped. Nothing in this module ever calls the delegate, sends on a
//! `oneshot::Sender`, or otherwise does anything observable while holding
//! `&mut self`.

use std::mem;

use tokio::sync::oneshot;
use tracing::error;

use crate::error::YieldError;
use crate::yield_id::YieldId;

pub(crate) type Resumer<Err> = oneshot::Sender<Result<(), YieldError<Err>>>;

pub(crate) struct SuspendedYield<Err> {
    pub(crate) yield_id: YieldId,
    pub(crate) resumer: Resumer<Err>,
}

/// Data carried while `Streaming`.
pub(crate) struct Streaming<E, Err> {
    pub(crate) in_outcall: bool,
    pub(crate) cancelled_ids: Vec<YieldId>,
    pub(crate) suspended: Vec<SuspendedYield<Err>>,
    pub(crate) buffer: Vec<E>,
}

impl<E, Err> Streaming<E, Err> {
    fn fresh(in_outcall: bool) -> Self {
        Streaming {
            in_outcall,
            cancelled_ids: Vec::new(),
            suspended: Vec::new(),
            buffer: Vec::new(),
        }
    }

    /// Appends a suspended producer and its (not-yet-delivered) elements.
    /// Always called in the same locked section as the `yield` classify
    /// step that decided to suspend.
    fn register_suspended(
        &mut self,
        id: YieldId,
        elements: Vec<E>,
    ) -> oneshot::Receiver<Result<(), YieldError<Err>>> {
        let (resumer, receiver) = oneshot::channel();
        self.suspended.push(SuspendedYield {
            yield_id: id,
            resumer,
        });
        self.buffer.extend(elements);
        receiver
    }

    fn resume_all(&mut self, result: impl Fn() -> Result<(), YieldError<Err>>) -> Vec<(Resumer<Err>, Result<(), YieldError<Err>>)> {
        self.suspended
            .drain(..)
            .map(|sy| (sy.resumer, result()))
            .collect()
    }
}

/// The writer's tagged state.
///
/// [`Phase::Modifying`] is a transient sentinel only ever observed while a
/// transition method holds `&mut self`; it is never visible across a lock
/// boundary. If any method below ever matches on it, that is a bug in this
/// module, not a reachable runtime condition.
pub(crate) enum Phase<E, Err> {
    Initial,
    Streaming(Streaming<E, Err>),
    WriterFinished {
        buffer: Vec<E>,
        error: Option<Err>,
        /// Carried so a reentrant `set_writability` during an in-flight
        /// `did_yield` can't start a second, overlapping outcall while the
        /// first one (the one that was running when `writer_finish` raced
        /// it) is still on the stack.
        in_outcall: bool,
    },
    Finished {
        /// The error that reaches both `did_terminate` and any `yield`
        /// call arriving after termination. Populated from whichever side
        /// (writer or sink) actually drove the transition into this
        /// phase: a writer-initiated error is exposed to post-termination
        /// `yield` callers once this phase is reached, even though it is
        /// not exposed while still `WriterFinished`.
        termination_error: Option<Err>,
    },
    Modifying,
}

/// The result of classifying a `yield` call.
pub(crate) enum YieldOutcome<Err> {
    /// The call is already resolved; return this result to the caller
    /// without suspending.
    Done(Result<(), YieldError<Err>>),
    /// The call must suspend; await this receiver.
    Suspend(oneshot::Receiver<Result<(), YieldError<Err>>>),
}

/// Side effects a transition wants executed once the lock is released.
///
/// Multiple effects on one `Effects` value are applied in a fixed order by
/// `storage.rs`: resumes, then delivery, then termination. See that
/// module's `run_effects` for the full loop (termination is absorbing;
/// delivery alone means "drain again after this outcall returns").
pub(crate) struct Effects<E, Err> {
    pub(crate) delivery: Option<Vec<E>>,
    pub(crate) resumes: Vec<(Resumer<Err>, Result<(), YieldError<Err>>)>,
    pub(crate) terminate: Option<Option<Err>>,
}

impl<E, Err> Default for Effects<E, Err> {
    fn default() -> Self {
        Effects {
            delivery: None,
            resumes: Vec::new(),
            terminate: None,
        }
    }
}

impl<E, Err> Effects<E, Err> {
    pub(crate) fn none() -> Self {
        Self::default()
    }

    pub(crate) fn delivery(elements: Vec<E>) -> Self {
        Effects {
            delivery: Some(elements),
            ..Default::default()
        }
    }

    pub(crate) fn terminate(error: Option<Err>) -> Self {
        Effects {
            terminate: Some(error),
            ..Default::default()
        }
    }
}

/// The mutex-guarded storage payload: the writability flag plus the
/// current phase. Writability lives outside [`Phase`] because both
/// `Initial` and `Streaming` need it and moving between them must preserve
/// it.
pub(crate) struct Inner<E, Err> {
    writable: bool,
    phase: Phase<E, Err>,
}

impl<E, Err: Clone> Inner<E, Err> {
    pub(crate) fn new(initial_writable: bool) -> Self {
        Inner {
            writable: initial_writable,
            phase: Phase::Initial,
        }
    }

    #[cfg(test)]
    pub(crate) fn is_writable(&self) -> bool {
        self.writable
    }

    #[cfg(test)]
    pub(crate) fn phase_name(&self) -> &'static str {
        match self.phase {
            Phase::Initial => "Initial",
            Phase::Streaming(_) => "Streaming",
            Phase::WriterFinished { .. } => "WriterFinished",
            Phase::Finished { .. } => "Finished",
            Phase::Modifying => "Modifying",
        }
    }

    /// Classifies (and, if it must suspend, registers) a `yield` call.
    pub(crate) fn yield_event(
        &mut self,
        elements: Vec<E>,
        id: YieldId,
    ) -> (YieldOutcome<Err>, Effects<E, Err>) {
        let phase = mem::replace(&mut self.phase, Phase::Modifying);
        match phase {
            Phase::Initial => {
                let writable = self.writable;
                let mut s = Streaming::fresh(writable);
                if writable {
                    self.phase = Phase::Streaming(s);
                    (YieldOutcome::Done(Ok(())), Effects::delivery(elements))
                } else {
                    let receiver = s.register_suspended(id, elements);
                    self.phase = Phase::Streaming(s);
                    (YieldOutcome::Suspend(receiver), Effects::none())
                }
            }
            Phase::Streaming(mut s) => {
                let was_cancelled = if let Some(pos) =
                    s.cancelled_ids.iter().position(|&cancelled| cancelled == id)
                {
                    s.cancelled_ids.remove(pos);
                    true
                } else {
                    false
                };
                let writable = self.writable;
                let result = match (writable, s.in_outcall) {
                    (true, false) => {
                        s.in_outcall = true;
                        self.phase = Phase::Streaming(s);
                        (YieldOutcome::Done(Ok(())), Effects::delivery(elements))
                    }
                    (true, true) => {
                        s.buffer.extend(elements);
                        self.phase = Phase::Streaming(s);
                        (YieldOutcome::Done(Ok(())), Effects::none())
                    }
                    (false, _) if was_cancelled => {
                        // Already cancelled: accept the elements into the
                        // buffer (the sink already agreed to take them),
                        // but never suspend an already-cancelled producer.
                        s.buffer.extend(elements);
                        self.phase = Phase::Streaming(s);
                        (YieldOutcome::Done(Ok(())), Effects::none())
                    }
                    (false, _) => {
                        let receiver = s.register_suspended(id, elements);
                        self.phase = Phase::Streaming(s);
                        (YieldOutcome::Suspend(receiver), Effects::none())
                    }
                };
                result
            }
            Phase::WriterFinished {
                buffer,
                error,
                in_outcall,
            } => {
                self.phase = Phase::WriterFinished {
                    buffer,
                    error,
                    in_outcall,
                };
                (
                    YieldOutcome::Done(Err(YieldError::AlreadyFinished)),
                    Effects::none(),
                )
            }
            Phase::Finished { termination_error } => {
                let err = YieldError::from_sink_error(termination_error.clone());
                self.phase = Phase::Finished { termination_error };
                (YieldOutcome::Done(Err(err)), Effects::none())
            }
            Phase::Modifying => {
                error!("observed Modifying phase outside a transition");
                unreachable!("observed Modifying phase outside a transition")
            }
        }
    }

    /// Handles a cancellation for `id`. No-op outside `Streaming` (and,
    /// degenerately, registers the id as pre-cancelled from `Initial`, a
    /// race that the public Rust API cannot actually trigger but which
    /// this transition still handles so every phase is covered).
    pub(crate) fn cancel(&mut self, id: YieldId) -> Effects<E, Err> {
        let phase = mem::replace(&mut self.phase, Phase::Modifying);
        match phase {
            Phase::Initial => {
                let mut s = Streaming::fresh(false);
                s.cancelled_ids.push(id);
                self.phase = Phase::Streaming(s);
                Effects::none()
            }
            Phase::Streaming(mut s) => {
                if let Some(pos) = s.suspended.iter().position(|sy| sy.yield_id == id) {
                    let suspended = s.suspended.remove(pos);
                    self.phase = Phase::Streaming(s);
                    Effects {
                        resumes: vec![(suspended.resumer, Ok(()))],
                        ..Default::default()
                    }
                } else {
                    s.cancelled_ids.push(id);
                    self.phase = Phase::Streaming(s);
                    Effects::none()
                }
            }
            other => {
                self.phase = other;
                Effects::none()
            }
        }
    }

    /// Toggles writability. Synchronous; the only event issued from the
    /// sink-owning thread outside of `finish`.
    pub(crate) fn set_writability(&mut self, new: bool) -> Effects<E, Err> {
        let phase = mem::replace(&mut self.phase, Phase::Modifying);
        match phase {
            Phase::Initial => {
                self.writable = new;
                self.phase = Phase::Initial;
                Effects::none()
            }
            Phase::Streaming(mut s) => {
                if self.writable == new {
                    self.phase = Phase::Streaming(s);
                    return Effects::none();
                }
                self.writable = new;
                if !new {
                    self.phase = Phase::Streaming(s);
                    return Effects::none();
                }
                if s.in_outcall {
                    // The live callout will observe the flip via
                    // `unbuffer_queued_events` once it returns.
                    self.phase = Phase::Streaming(s);
                    Effects::none()
                } else if s.buffer.is_empty() {
                    let resumes = s.resume_all(|| Ok(()));
                    self.phase = Phase::Streaming(s);
                    Effects {
                        resumes,
                        ..Default::default()
                    }
                } else {
                    let elements = mem::take(&mut s.buffer);
                    let resumes = s.resume_all(|| Ok(()));
                    s.in_outcall = true;
                    self.phase = Phase::Streaming(s);
                    Effects {
                        delivery: Some(elements),
                        resumes,
                        ..Default::default()
                    }
                }
            }
            Phase::WriterFinished {
                buffer,
                error,
                in_outcall,
            } => {
                if !new || in_outcall {
                    self.phase = Phase::WriterFinished {
                        buffer,
                        error,
                        in_outcall,
                    };
                    return Effects::none();
                }
                self.phase = Phase::Finished {
                    termination_error: error.clone(),
                };
                if buffer.is_empty() {
                    Effects::terminate(error)
                } else {
                    Effects {
                        delivery: Some(buffer),
                        terminate: Some(error),
                        ..Default::default()
                    }
                }
            }
            Phase::Finished { termination_error } => {
                self.phase = Phase::Finished { termination_error };
                Effects::none()
            }
            Phase::Modifying => {
                error!("observed Modifying phase outside a transition");
                unreachable!("observed Modifying phase outside a transition")
            }
        }
    }

    /// The writer side finished (`Writer::finish`/`finish_with_error`, or
    /// last-handle drop via `writer_deinit` below).
    pub(crate) fn writer_finish(&mut self, error: Option<Err>) -> Effects<E, Err> {
        let phase = mem::replace(&mut self.phase, Phase::Modifying);
        match phase {
            Phase::Initial => {
                self.phase = Phase::Finished {
                    termination_error: error.clone(),
                };
                Effects::terminate(error)
            }
            Phase::Streaming(mut s) => {
                if s.buffer.is_empty() {
                    if s.in_outcall {
                        self.phase = Phase::WriterFinished {
                            buffer: Vec::new(),
                            error,
                            in_outcall: true,
                        };
                        Effects::none()
                    } else {
                        self.phase = Phase::Finished {
                            termination_error: error.clone(),
                        };
                        Effects::terminate(error)
                    }
                } else {
                    let resumes = s.resume_all(|| Ok(()));
                    let in_outcall = s.in_outcall;
                    let buffer = mem::take(&mut s.buffer);
                    self.phase = Phase::WriterFinished {
                        buffer,
                        error,
                        in_outcall,
                    };
                    Effects {
                        resumes,
                        ..Default::default()
                    }
                }
            }
            other => {
                self.phase = other;
                Effects::none()
            }
        }
    }

    /// Last drop of the writer handle: finish with no error. No producer
    /// can still be suspended at this point (every suspended yield holds
    /// its own storage reference independent of the handle count, and a
    /// dropped-before-resuming yield cancels itself first), but a
    /// cancelled producer can still have left elements behind in `buffer`
    /// with no matching `suspended` entry; those are kept queued rather
    /// than finishing outright.
    pub(crate) fn writer_deinit(&mut self) -> Effects<E, Err> {
        let phase = mem::replace(&mut self.phase, Phase::Modifying);
        match phase {
            Phase::Initial => {
                self.phase = Phase::Finished {
                    termination_error: None,
                };
                Effects::terminate(None)
            }
            Phase::Streaming(mut s) => {
                debug_assert!(
                    s.suspended.is_empty(),
                    "writer handle dropped while producers were still suspended on it"
                );
                if s.buffer.is_empty() {
                    self.phase = Phase::Finished {
                        termination_error: None,
                    };
                    Effects::terminate(None)
                } else {
                    // A cancelled producer can leave elements behind with
                    // no matching suspended entry (its future resolved and
                    // dropped before this handle did); the sink hasn't
                    // seen them yet, so keep them queued for the next
                    // `set_writability(true)` instead of dropping them.
                    let in_outcall = s.in_outcall;
                    let buffer = mem::take(&mut s.buffer);
                    self.phase = Phase::WriterFinished {
                        buffer,
                        error: None,
                        in_outcall,
                    };
                    Effects::none()
                }
            }
            other => {
                self.phase = other;
                Effects::none()
            }
        }
    }

    /// The sink side finished (`SinkHandle::finish`/`finish_with_error`, or
    /// last-handle drop).
    pub(crate) fn sink_finish(&mut self, error: Option<Err>) -> Effects<E, Err> {
        let phase = mem::replace(&mut self.phase, Phase::Modifying);
        match phase {
            Phase::Initial => {
                self.phase = Phase::Finished {
                    termination_error: error.clone(),
                };
                Effects::terminate(error)
            }
            Phase::Streaming(mut s) => {
                let err = error.clone();
                let resumes = s.resume_all(|| Err(YieldError::from_sink_error(err.clone())));
                if s.in_outcall {
                    self.phase = Phase::WriterFinished {
                        buffer: Vec::new(),
                        error,
                        in_outcall: true,
                    };
                    Effects {
                        resumes,
                        ..Default::default()
                    }
                } else {
                    self.phase = Phase::Finished {
                        termination_error: error.clone(),
                    };
                    Effects {
                        resumes,
                        terminate: Some(error),
                        ..Default::default()
                    }
                }
            }
            Phase::WriterFinished { .. } => {
                self.phase = Phase::Finished {
                    termination_error: error.clone(),
                };
                Effects::terminate(error)
            }
            Phase::Finished { termination_error } => {
                self.phase = Phase::Finished { termination_error };
                Effects::none()
            }
            Phase::Modifying => {
                error!("observed Modifying phase outside a transition");
                unreachable!("observed Modifying phase outside a transition")
            }
        }
    }

    /// Drains whatever accumulated in `buffer` (reentrantly, during the
    /// outcall that just returned) and either triggers another delivery or
    /// finalizes. Called by `storage.rs` in a loop after every delegate
    /// callout until it reports nothing left to do.
    pub(crate) fn unbuffer_queued_events(&mut self) -> Effects<E, Err> {
        let phase = mem::replace(&mut self.phase, Phase::Modifying);
        match phase {
            Phase::Streaming(mut s) => {
                if !s.in_outcall {
                    error!("unbuffer_queued_events called while no outcall was in progress");
                }
                assert!(
                    s.in_outcall,
                    "unbuffer_queued_events called while no outcall was in progress"
                );
                if s.buffer.is_empty() {
                    s.in_outcall = false;
                    self.phase = Phase::Streaming(s);
                    Effects::none()
                } else {
                    let elements = mem::take(&mut s.buffer);
                    self.phase = Phase::Streaming(s);
                    Effects::delivery(elements)
                }
            }
            Phase::WriterFinished {
                buffer,
                error,
                in_outcall,
            } => {
                if !in_outcall {
                    error!("unbuffer_queued_events called on WriterFinished without a prior outcall");
                }
                assert!(
                    in_outcall,
                    "unbuffer_queued_events called on WriterFinished without a prior outcall"
                );
                self.phase = Phase::Finished {
                    termination_error: error.clone(),
                };
                if buffer.is_empty() {
                    Effects::terminate(error)
                } else {
                    Effects {
                        delivery: Some(buffer),
                        terminate: Some(error),
                        ..Default::default()
                    }
                }
            }
            Phase::Finished { termination_error } => {
                self.phase = Phase::Finished { termination_error };
                Effects::none()
            }
            Phase::Initial => {
                self.phase = Phase::Initial;
                error!("unbuffer_queued_events called from the Initial phase");
                panic!("unbuffer_queued_events called from the Initial phase");
            }
            Phase::Modifying => {
                error!("observed Modifying phase outside a transition");
                unreachable!("observed Modifying phase outside a transition")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> YieldId {
        // `YieldId` fields are private to `yield_id`; drive a generator
        // instead of poking at representation.
        let gen = crate::yield_id::YieldIdGenerator::default();
        for _ in 0..n {
            gen.next();
        }
        gen.next()
    }

    #[test]
    fn initial_writable_yield_delivers_immediately() {
        let mut inner: Inner<u32, ()> = Inner::new(true);
        let (outcome, effects) = inner.yield_event(vec![1, 2, 3], id(0));
        assert!(matches!(outcome, YieldOutcome::Done(Ok(()))));
        assert_eq!(effects.delivery, Some(vec![1, 2, 3]));
        assert_eq!(inner.phase_name(), "Streaming");
    }

    #[test]
    fn initial_unwritable_yield_suspends() {
        let mut inner: Inner<u32, ()> = Inner::new(false);
        let (outcome, effects) = inner.yield_event(vec![9], id(0));
        assert!(matches!(outcome, YieldOutcome::Suspend(_)));
        assert!(effects.delivery.is_none());
        assert_eq!(inner.phase_name(), "Streaming");
    }

    #[test]
    fn cancel_of_suspended_yield_resumes_normally_but_keeps_buffered_elements() {
        let mut inner: Inner<u32, ()> = Inner::new(false);
        let (outcome, _) = inner.yield_event(vec![7], id(0));
        assert!(matches!(outcome, YieldOutcome::Suspend(_)));

        let effects = inner.cancel(id(0));
        assert_eq!(effects.resumes.len(), 1);
        assert!(matches!(effects.resumes[0].1, Ok(())));

        // The element is still queued; flipping writable delivers it.
        let effects = inner.set_writability(true);
        assert_eq!(effects.delivery, Some(vec![7]));
    }

    #[test]
    fn cancel_from_initial_is_total() {
        let mut inner: Inner<u32, ()> = Inner::new(true);
        let effects = inner.cancel(id(0));
        assert!(effects.resumes.is_empty());
        assert_eq!(inner.phase_name(), "Streaming");
    }

    #[test]
    fn writer_finish_with_empty_buffer_not_in_outcall_terminates_immediately() {
        let mut inner: Inner<u32, &'static str> = Inner::new(true);
        let _ = inner.yield_event(vec![1], id(0));
        // Fully drains synchronously (writable, not in outcall initially),
        // but the drain itself flips in_outcall true and then storage.rs
        // would normally clear it again via unbuffer_queued_events. Here we
        // drive it directly to model a quiescent Streaming state.
        let _ = inner.unbuffer_queued_events();
        let effects = inner.writer_finish(None);
        assert_eq!(inner.phase_name(), "Finished");
        assert!(effects.terminate.is_some());
    }

    #[test]
    fn sink_finish_drops_buffer_and_errors_suspended_producers() {
        let mut inner: Inner<u32, &'static str> = Inner::new(false);
        let (outcome_a, _) = inner.yield_event(vec![1], id(0));
        let (outcome_b, _) = inner.yield_event(vec![2], id(1));
        let _rx_a = match outcome_a {
            YieldOutcome::Suspend(rx) => rx,
            _ => unreachable!(),
        };
        let _rx_b = match outcome_b {
            YieldOutcome::Suspend(rx) => rx,
            _ => unreachable!(),
        };
        let effects = inner.sink_finish(Some("boom"));
        assert_eq!(inner.phase_name(), "Finished");
        assert_eq!(effects.resumes.len(), 2);
        for (resumer, result) in effects.resumes {
            assert!(matches!(result, Err(YieldError::Sink("boom"))));
            let _ = resumer.send(result);
        }
    }
}
