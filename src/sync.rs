//! Indirection over the synchronization primitives used by [`crate::storage`].
//!
//! Under the `loom-model` feature, `cfg(loom)` is set by loom's own test
//! harness and this module re-exports loom's shadow `Arc`/`Mutex` instead of
//! `std`'s, so that `cargo test --features loom-model` can exhaustively
//! explore interleavings of the state machine instead of just running one.
//!
//! This is the standard idiom used by concurrent/lock-free crates that ship
//! a loom model alongside a normal build: production code never mentions
//! `loom` directly, it only depends on this module.

#[cfg(loom)]
pub(crate) use loom::sync::{Arc, Mutex, MutexGuard};

#[cfg(not(loom))]
pub(crate) use std::sync::{Arc, Mutex, MutexGuard};
