use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};
use utoipa::ToSchema;

pub const DIAGNOSTICS_CAPACITY: usize = 50;
const BODY_LIMIT: usize = 2000;

/// Bounded, newest-first log. Pushing past capacity evicts the oldest entry.
#[derive(Debug)]
pub struct RingLog<T> {
    capacity: usize,
    entries: Mutex<VecDeque<T>>,
}

impl<T: Clone> RingLog<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, entry: T) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push_front(entry);
        entries.truncate(self.capacity);
    }

    pub fn snapshot(&self) -> Vec<T> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ErrorEntry {
    pub at: DateTime<Utc>,
    pub source: String,
    pub api_version: Option<String>,
    pub model: Option<String>,
    pub status: Option<u16>,
    pub body: String,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EventEntry {
    pub at: DateTime<Utc>,
    pub event: String,
    #[schema(value_type = Object)]
    pub detail: Value,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DiagnosticsSnapshot {
    pub recent_errors: Vec<ErrorEntry>,
    pub recent_events: Vec<EventEntry>,
}

/// Failed attempts and notable events of the generation gateway.
#[derive(Debug)]
pub struct Diagnostics {
    errors: RingLog<ErrorEntry>,
    events: RingLog<EventEntry>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            errors: RingLog::new(DIAGNOSTICS_CAPACITY),
            events: RingLog::new(DIAGNOSTICS_CAPACITY),
        }
    }
}

impl Diagnostics {
    pub fn record_error(
        &self,
        source: &str,
        api_version: Option<&str>,
        model: Option<&str>,
        status: Option<u16>,
        body: &str,
        note: &str,
    ) {
        let entry = ErrorEntry {
            at: Utc::now(),
            source: source.to_string(),
            api_version: api_version.map(str::to_string),
            model: model.map(str::to_string),
            status,
            body: truncate_chars(body, BODY_LIMIT),
            note: note.to_string(),
        };
        error!(
            "AI error: source={} version={:?} model={:?} status={:?} note={}",
            entry.source, entry.api_version, entry.model, entry.status, entry.note
        );
        self.errors.push(entry);
    }

    pub fn record_event(&self, event: &str, detail: Value) {
        info!("AI event: {} {}", event, detail);
        self.events.push(EventEntry {
            at: Utc::now(),
            event: event.to_string(),
            detail,
        });
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            recent_errors: self.errors.snapshot(),
            recent_events: self.events.snapshot(),
        }
    }
}

pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ring_log_evicts_oldest_first() {
        let log = RingLog::new(3);
        for i in 0..5 {
            log.push(i);
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.snapshot(), vec![4, 3, 2]);
    }

    #[test]
    fn diagnostics_stay_bounded() {
        let diagnostics = Diagnostics::default();
        for i in 0..(DIAGNOSTICS_CAPACITY + 20) {
            diagnostics.record_error("server", Some("v1"), Some("m"), Some(500), "boom", "http error");
            diagnostics.record_event("tick", json!({ "i": i }));
        }
        let snapshot = diagnostics.snapshot();
        assert_eq!(snapshot.recent_errors.len(), DIAGNOSTICS_CAPACITY);
        assert_eq!(snapshot.recent_events.len(), DIAGNOSTICS_CAPACITY);
        assert_eq!(snapshot.recent_events[0].detail["i"], DIAGNOSTICS_CAPACITY + 19);
        assert_eq!(
            snapshot.recent_events[DIAGNOSTICS_CAPACITY - 1].detail["i"],
            20
        );
    }

    #[test]
    fn error_bodies_are_truncated() {
        let diagnostics = Diagnostics::default();
        diagnostics.record_error("caller", None, None, None, &"é".repeat(3000), "exception");
        let entry = &diagnostics.snapshot().recent_errors[0];
        assert_eq!(entry.body.chars().count(), BODY_LIMIT);
    }

    #[test]
    fn concurrent_appends_are_safe() {
        let diagnostics = std::sync::Arc::new(Diagnostics::default());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let diagnostics = diagnostics.clone();
                std::thread::spawn(move || {
                    for i in 0..20 {
                        diagnostics.record_event("append", json!({ "t": t, "i": i }));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(diagnostics.snapshot().recent_events.len(), DIAGNOSTICS_CAPACITY);
    }
}
