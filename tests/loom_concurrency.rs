#![cfg(loom)]
//! Model-checks `CloseRatchet` under loom instead of just running it once.
//!
//! Grounded in the same idiom as `hlieu5402-collab-spark2026`'s
//! `tests/loom_concurrency.rs`: wrap the primitive under test in
//! `loom::model`, spawn `loom::thread`s that race its public methods, and
//! assert an invariant that must hold no matter which interleaving loom
//! picks. Run with:
//!
//! ```text
//! RUSTFLAGS="--cfg loom" cargo test --release --features loom-model --test loom_concurrency
//! ```
//!
//! `CloseRatchet` is pure synchronous bookkeeping (no delegate callouts, no
//! async), which is exactly what makes it loom-modelable directly through
//! its public API; the writer/sink state machine's suspension path relies on
//! `tokio::sync::oneshot`, which has no loom-shadow counterpart, so that side
//! is exercised by the `#[tokio::test]` scenarios in `tests/writer_sink.rs`
//! instead.

use loom::{model, sync::Arc, thread};

use async_writer_sink::{CloseAction, CloseRatchet};

#[test]
fn exactly_one_side_observes_the_full_close() {
    model(|| {
        let ratchet = Arc::new(CloseRatchet::new(false));

        let reader = {
            let ratchet = Arc::clone(&ratchet);
            thread::spawn(move || ratchet.close_read())
        };
        let writer = {
            let ratchet = Arc::clone(&ratchet);
            thread::spawn(move || ratchet.close_write())
        };

        let read_action = reader.join().expect("close_read must not panic");
        let write_action = writer.join().expect("close_write must not panic");

        // Whichever half closes last sees `Close`; the other always sees
        // `Nothing` (half-close is disabled in this model), never both and
        // never neither.
        let closes = [read_action, write_action]
            .iter()
            .filter(|a| **a == CloseAction::Close)
            .count();
        assert_eq!(closes, 1, "exactly one half must observe the full close");

        let nothings = [read_action, write_action]
            .iter()
            .filter(|a| **a == CloseAction::Nothing)
            .count();
        assert_eq!(nothings, 1, "the other half must see Nothing, not Close twice");
    });
}

#[test]
fn half_close_enabled_write_side_never_blocks_on_close() {
    model(|| {
        let ratchet = Arc::new(CloseRatchet::new(true));

        let reader = {
            let ratchet = Arc::clone(&ratchet);
            thread::spawn(move || ratchet.close_read())
        };
        let writer = {
            let ratchet = Arc::clone(&ratchet);
            thread::spawn(move || ratchet.close_write())
        };

        let read_action = reader.join().expect("close_read must not panic");
        let write_action = writer.join().expect("close_write must not panic");

        // With half-close enabled, `close_write` always returns something
        // actionable (`CloseOutput` if it runs first, `Close` if it runs
        // last) and `close_read` never double-fires the full close.
        match (read_action, write_action) {
            // write ran first: it always sees `CloseOutput` (half-close is
            // enabled), then read, running second, sees `Close`.
            (CloseAction::Close, CloseAction::CloseOutput) => {}
            // read ran first: it sees `Nothing`, then write, running
            // second, sees `Close`.
            (CloseAction::Nothing, CloseAction::Close) => {}
            other => panic!("unexpected action pair under half-close: {other:?}"),
        }
    });
}
