//! Fire-and-forget analytics seam. The transport and backend behind `track`
//! live elsewhere; the core only calls it.

use serde_json::Value;
use tracing::debug;

pub trait AnalyticsSink: Send + Sync {
    fn track(&self, event: &str, properties: Value);
}

/// Used when analytics is disabled.
pub struct NoopAnalytics;

impl AnalyticsSink for NoopAnalytics {
    fn track(&self, _event: &str, _properties: Value) {}
}

/// Writes events to the log stream; the default sink in development.
pub struct LogAnalytics;

impl AnalyticsSink for LogAnalytics {
    fn track(&self, event: &str, properties: Value) {
        debug!("analytics: {} {}", event, properties);
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records tracked events for assertions.
    #[derive(Default)]
    pub struct RecordingAnalytics {
        pub events: Mutex<Vec<(String, Value)>>,
    }

    impl AnalyticsSink for RecordingAnalytics {
        fn track(&self, event: &str, properties: Value) {
            self.events
                .lock()
                .unwrap()
                .push((event.to_string(), properties));
        }
    }
}
