//! Shared test delegate, recording every call it receives in order so tests
//! can assert both the content and the ordering of deliveries relative to
//! termination. Mirrors the teacher crate's `RecordingWritableStream`
//! pattern (`tests/js/mod.rs`'s recorded-event list) adapted to a plain
//! `std::sync::Mutex<Vec<RecordedEvent<E, Err>>>` instead of a JS object.

use std::sync::Mutex;

use async_writer_sink::Delegate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedEvent<E, Err> {
    Yield(Vec<E>),
    Terminate(Option<Err>),
}

pub struct RecordingDelegate<E, Err> {
    events: Mutex<Vec<RecordedEvent<E, Err>>>,
}

impl<E, Err> RecordingDelegate<E, Err> {
    pub fn new() -> Self {
        RecordingDelegate {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<RecordedEvent<E, Err>>
    where
        E: Clone,
        Err: Clone,
    {
        self.events.lock().unwrap().clone()
    }
}

impl<E, Err> Delegate<E, Err> for RecordingDelegate<E, Err>
where
    E: Send + Sync + 'static,
    Err: Send + Sync + 'static,
{
    fn did_yield(&self, elements: Vec<E>) {
        self.events
            .lock()
            .unwrap()
            .push(RecordedEvent::Yield(elements));
    }

    fn did_terminate(&self, error: Option<Err>) {
        self.events
            .lock()
            .unwrap()
            .push(RecordedEvent::Terminate(error));
    }
}
