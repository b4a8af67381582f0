//! Shared helpers for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// Records the target of every event it sees
#[derive(Clone, Default)]
pub struct EventRecorder {
    targets: Arc<Mutex<Vec<String>>>,
}

impl EventRecorder {
    /// Events whose target is exactly `target`
    pub fn count(&self, target: &str) -> usize {
        self.targets.lock().iter().filter(|t| *t == target).count()
    }

    pub fn total(&self) -> usize {
        self.targets.lock().len()
    }
}

impl<S: Subscriber> Layer<S> for EventRecorder {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        self.targets.lock().push(event.metadata().target().to_string());
    }
}

/// Run `f` with a recording subscriber installed on this thread
pub fn capture<R>(f: impl FnOnce() -> R) -> (R, EventRecorder) {
    let recorder = EventRecorder::default();
    let subscriber = tracing_subscriber::registry().with(recorder.clone());
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, recorder)
}
