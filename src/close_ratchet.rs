//! A two-half closure coordinator, independent of the writer/sink state
//! machine, but grouped with it because whatever duplex handler sits on top
//! of a [`crate::Writer`]/[`crate::SinkHandle`] pair almost always also owns
//! a read side, and needs exactly this kind of "whoever closes last tears
//! down" ratchet to know when the two halves are both done.
//!
//! Pure synchronous bookkeeping; no I/O, no delegate callouts, no async.

use tracing::error;

use crate::sync::Mutex;

/// What a half-close transition asks the caller to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// Nothing to do yet; the other half hasn't closed.
    Nothing,
    /// Both halves are now closed: perform a full close.
    Close,
    /// Half-closing is enabled and only the write side has closed so far:
    /// half-close the output (e.g. send `FIN`) without tearing down the
    /// read side.
    CloseOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Half {
    NotClosed { half_close_enabled: bool },
    ReadClosed,
    WriteClosed,
    BothClosed,
}

/// Coordinates the closure of two independent halves (read, write) of a
/// duplex entity, so that only the half that closes *last* triggers full
/// teardown.
///
/// Closing the same half twice is a programming error: the caller is
/// expected to track whether it has already closed its own half, so a
/// duplicate call indicates a bug in the caller, not a runtime condition to
/// recover from. Both [`CloseRatchet::close_read`] and
/// [`CloseRatchet::close_write`] panic in that case.
#[derive(Debug)]
pub struct CloseRatchet {
    state: Mutex<Half>,
}

impl CloseRatchet {
    /// Creates a ratchet. When `half_close_enabled` is `true`, closing the
    /// write half alone (before the read half closes) returns
    /// [`CloseAction::CloseOutput`] instead of waiting silently for the
    /// peer.
    pub fn new(half_close_enabled: bool) -> Self {
        CloseRatchet {
            state: Mutex::new(Half::NotClosed {
                half_close_enabled,
            }),
        }
    }

    /// Closes the read half. Panics if the read half was already closed.
    pub fn close_read(&self) -> CloseAction {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let (next, action) = match *state {
            Half::NotClosed { .. } => (Half::ReadClosed, CloseAction::Nothing),
            Half::WriteClosed => (Half::BothClosed, CloseAction::Close),
            Half::ReadClosed | Half::BothClosed => {
                error!("CloseRatchet::close_read called twice on the same half");
                panic!("CloseRatchet::close_read called twice on the same half")
            }
        };
        *state = next;
        action
    }

    /// Closes the write half. Panics if the write half was already closed.
    pub fn close_write(&self) -> CloseAction {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let (next, action) = match *state {
            Half::NotClosed {
                half_close_enabled: true,
            } => (Half::WriteClosed, CloseAction::CloseOutput),
            Half::NotClosed {
                half_close_enabled: false,
            } => (Half::WriteClosed, CloseAction::Nothing),
            Half::ReadClosed => (Half::BothClosed, CloseAction::Close),
            Half::WriteClosed | Half::BothClosed => {
                error!("CloseRatchet::close_write called twice on the same half");
                panic!("CloseRatchet::close_write called twice on the same half")
            }
        };
        *state = next;
        action
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_closer_waits_without_half_close() {
        let ratchet = CloseRatchet::new(false);
        assert_eq!(ratchet.close_write(), CloseAction::Nothing);
        assert_eq!(ratchet.close_read(), CloseAction::Close);
    }

    #[test]
    fn write_half_close_emits_close_output_when_enabled() {
        let ratchet = CloseRatchet::new(true);
        assert_eq!(ratchet.close_write(), CloseAction::CloseOutput);
        assert_eq!(ratchet.close_read(), CloseAction::Close);
    }

    #[test]
    fn read_first_then_write_closes_fully() {
        let ratchet = CloseRatchet::new(true);
        assert_eq!(ratchet.close_read(), CloseAction::Nothing);
        assert_eq!(ratchet.close_write(), CloseAction::Close);
    }

    #[test]
    #[should_panic(expected = "close_read called twice")]
    fn duplicate_read_close_panics() {
        let ratchet = CloseRatchet::new(false);
        ratchet.close_read();
        ratchet.close_read();
    }

    #[test]
    #[should_panic(expected = "close_write called twice")]
    fn duplicate_write_close_panics() {
        let ratchet = CloseRatchet::new(false);
        ratchet.close_write();
        ratchet.close_write();
    }
}
