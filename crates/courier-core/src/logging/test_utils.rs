//! In-memory capture of tracing events for test assertions.
//!
//! Router failures that have no caller to report to (subscriber errors,
//! handler panics, failed unsubscribe acknowledgements) are only observable
//! through logs; [`capture_logs`] lets tests assert on them.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::level_filters::LevelFilter;
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

/// One recorded event.
#[derive(Clone, Debug)]
pub struct CapturedEvent {
    /// Event level.
    pub level: Level,
    /// Emitting module.
    pub target: String,
    /// The `message` field.
    pub message: String,
    /// Every other field, in recording order.
    pub fields: Vec<(String, String)>,
}

impl CapturedEvent {
    /// Value of a structured field, if recorded.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find_map(|(key, value)| (key == name).then_some(value.as_str()))
    }

    fn matches(&self, level: Level, needle: &str) -> bool {
        self.level == level && self.message.contains(needle)
    }
}

/// Events recorded by a [`capture_logs`] subscriber.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl CapturedLogs {
    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().clone()
    }

    /// Whether an event at `level` mentions `needle` in its message.
    pub fn has_event(&self, level: Level, needle: &str) -> bool {
        self.events.lock().iter().any(|e| e.matches(level, needle))
    }

    /// Events at `level` that mention `needle` in their message.
    pub fn find(&self, level: Level, needle: &str) -> Vec<CapturedEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.matches(level, needle))
            .cloned()
            .collect()
    }
}

#[derive(Default)]
struct Recorder {
    message: String,
    fields: Vec<(String, String)>,
}

impl Visit for Recorder {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.store(field, value.to_owned());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.store(field, format!("{value:?}"));
    }
}

impl Recorder {
    fn store(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = value,
            name => self.fields.push((name.to_owned(), value)),
        }
    }
}

impl<S: tracing::Subscriber> Layer<S> for CapturedLogs {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut recorder = Recorder::default();
        event.record(&mut recorder);
        let metadata = event.metadata();
        self.events.lock().push(CapturedEvent {
            level: *metadata.level(),
            target: metadata.target().to_owned(),
            message: recorder.message,
            fields: recorder.fields,
        });
    }
}

/// Record every event emitted on this thread until the guard drops.
///
/// Events from other threads are missed, so async tests must stay on the
/// current-thread runtime (the `#[tokio::test]` default).
pub fn capture_logs() -> (CapturedLogs, DefaultGuard) {
    let logs = CapturedLogs::default();
    let guard = tracing_subscriber::registry()
        .with(logs.clone())
        .with(LevelFilter::TRACE)
        .set_default();
    (logs, guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_level_and_message() {
        let (logs, _guard) = capture_logs();
        tracing::warn!("Unhandled message");
        tracing::error!("Subscriber failed");

        assert!(logs.has_event(Level::WARN, "Unhandled"));
        assert!(logs.has_event(Level::ERROR, "Subscriber failed"));
        assert!(!logs.has_event(Level::INFO, "Unhandled"));
        assert_eq!(logs.events().len(), 2);
    }

    #[test]
    fn records_structured_fields() {
        let (logs, _guard) = capture_logs();
        tracing::error!(topic = "a/b", subscription = 7_u64, "Failed to unsubscribe");

        let events = logs.find(Level::ERROR, "unsubscribe");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].field("topic"), Some("a/b"));
        assert_eq!(events[0].field("subscription"), Some("7"));
        assert_eq!(events[0].field("missing"), None);
    }

    #[test]
    fn other_threads_are_not_captured() {
        let (logs, _guard) = capture_logs();
        std::thread::spawn(|| tracing::info!("elsewhere"))
            .join()
            .unwrap();
        assert!(logs.events().is_empty());
    }
}
