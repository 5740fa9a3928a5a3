//! Log Capture Utilities for Testing
//!
//! Collects tracing events so tests can assert on warnings and their fields.

use std::sync::{Arc, Mutex};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;

/// Captured log record
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: Level,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

impl LogRecord {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Log capture layer for testing
#[derive(Clone, Default)]
pub struct LogCapture {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install as the default subscriber for the current thread
    ///
    /// Events are captured until the returned guard drops. Tests using this
    /// must run on a current-thread runtime (the `#[tokio::test]` default).
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::registry().with(self.clone());
        tracing::subscriber::set_default(subscriber)
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Records at exactly `level`
    pub fn at_level(&self, level: Level) -> Vec<LogRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.level == level)
            .collect()
    }

    pub fn contains(&self, pattern: &str) -> bool {
        self.records().iter().any(|r| r.message.contains(pattern))
    }
}

impl<S> tracing_subscriber::Layer<S> for LogCapture
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        use tracing::field::Visit;

        #[derive(Default)]
        struct FieldVisitor {
            message: String,
            fields: Vec<(String, String)>,
        }

        impl Visit for FieldVisitor {
            fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
                if field.name() == "message" {
                    self.message = value.to_string();
                } else {
                    self.fields.push((field.name().to_string(), value.to_string()));
                }
            }

            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                let rendered = format!("{:?}", value);
                if field.name() == "message" {
                    self.message = rendered;
                } else {
                    self.fields.push((field.name().to_string(), rendered));
                }
            }
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        self.records.lock().unwrap().push(LogRecord {
            level: *event.metadata().level(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}
