//! Step event model shared by every component.
//!
//! Each resolution stage, retry attempt, popup dismissal and verification
//! emits a [`StepEvent`]. The serialized form
//! `{ phase, step, status, detail?, timestamp }` is what reporting tooling
//! reads, so field names and the lowercase status strings must not change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Outcome status of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Step started
    Start,
    /// Step succeeded
    Success,
    /// Step did not succeed but the flow continues
    Warning,
    /// Step failed
    Error,
}

impl StepStatus {
    /// Lowercase wire name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single step-level audit event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEvent {
    /// Component phase (`resolve`, `retry`, `popup`, `verify`)
    pub phase: String,
    /// Step name within the phase
    pub step: String,
    /// Step status
    pub status: StepStatus,
    /// Optional human-readable detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// When the event was emitted
    pub timestamp: DateTime<Utc>,
}

impl StepEvent {
    /// Create a new event stamped with the current time
    #[must_use]
    pub fn new(phase: impl Into<String>, step: impl Into<String>, status: StepStatus) -> Self {
        Self {
            phase: phase.into(),
            step: step.into(),
            status,
            detail: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a `start` event
    #[must_use]
    pub fn start(phase: impl Into<String>, step: impl Into<String>) -> Self {
        Self::new(phase, step, StepStatus::Start)
    }

    /// Create a `success` event
    #[must_use]
    pub fn success(phase: impl Into<String>, step: impl Into<String>) -> Self {
        Self::new(phase, step, StepStatus::Success)
    }

    /// Create a `warning` event
    #[must_use]
    pub fn warning(phase: impl Into<String>, step: impl Into<String>) -> Self {
        Self::new(phase, step, StepStatus::Warning)
    }

    /// Create an `error` event
    #[must_use]
    pub fn error(phase: impl Into<String>, step: impl Into<String>) -> Self {
        Self::new(phase, step, StepStatus::Error)
    }

    /// Attach a detail string
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Consumer of step events
pub trait EventSink: Send + Sync {
    /// Receive one event
    fn emit(&self, event: StepEvent);
}

/// Forwards events to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: StepEvent) {
        let detail = event.detail.as_deref().unwrap_or("");
        match event.status {
            StepStatus::Start => {
                tracing::debug!(phase = %event.phase, step = %event.step, "{detail}");
            }
            StepStatus::Success => {
                tracing::info!(phase = %event.phase, step = %event.step, status = "success", "{detail}");
            }
            StepStatus::Warning => {
                tracing::warn!(phase = %event.phase, step = %event.step, "{detail}");
            }
            StepStatus::Error => {
                tracing::error!(phase = %event.phase, step = %event.step, "{detail}");
            }
        }
    }
}

/// Records events in memory, in emission order
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<StepEvent>>>,
}

impl MemorySink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events
    #[must_use]
    pub fn events(&self) -> Vec<StepEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Events for one phase
    #[must_use]
    pub fn with_phase(&self, phase: &str) -> Vec<StepEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.phase == phase)
            .collect()
    }

    /// Number of recorded events
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether nothing has been recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all recorded events
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: StepEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Forwards every event to several sinks
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl std::fmt::Debug for FanoutSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl FanoutSink {
    /// Create an empty fanout
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a downstream sink
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: StepEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

/// Writes one JSON object per line
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> std::fmt::Debug for JsonLinesSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesSink").finish_non_exhaustive()
    }
}

impl<W: Write + Send> JsonLinesSink<W> {
    /// Wrap a writer
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Recover the writer
    pub fn into_inner(self) -> W {
        match self.writer.into_inner() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl JsonLinesSink<std::fs::File> {
    /// Append to (or create) a file
    pub fn append_to(path: impl AsRef<std::path::Path>) -> crate::EngineResult<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self::new(file))
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn emit(&self, event: StepEvent) {
        let Ok(line) = serde_json::to_string(&event) else {
            return;
        };
        if let Ok(mut writer) = self.writer.lock() {
            if let Err(err) = writeln!(writer, "{line}").and_then(|()| writer.flush()) {
                tracing::debug!(error = %err, "failed to write step event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod step_event_tests {
        use super::*;

        #[test]
        fn test_serialized_shape() {
            let event = StepEvent::success("resolve", "primary").with_detail("text=保存");
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["phase"], "resolve");
            assert_eq!(value["step"], "primary");
            assert_eq!(value["status"], "success");
            assert_eq!(value["detail"], "text=保存");
            assert!(value["timestamp"].is_string());
        }

        #[test]
        fn test_detail_omitted_when_absent() {
            let value = serde_json::to_value(StepEvent::start("retry", "save")).unwrap();
            assert!(value.get("detail").is_none());
        }

        #[test]
        fn test_status_round_trips_lowercase() {
            let parsed: StepStatus = serde_json::from_str("\"warning\"").unwrap();
            assert_eq!(parsed, StepStatus::Warning);
            assert_eq!(StepStatus::Error.to_string(), "error");
        }
    }

    mod sink_tests {
        use super::*;

        #[test]
        fn test_memory_sink_preserves_order() {
            let sink = MemorySink::new();
            sink.emit(StepEvent::start("popup", "scan"));
            sink.emit(StepEvent::success("verify", "delete"));
            sink.emit(StepEvent::warning("popup", "scan"));

            assert_eq!(sink.len(), 3);
            let popup = sink.with_phase("popup");
            assert_eq!(popup.len(), 2);
            assert_eq!(popup[1].status, StepStatus::Warning);

            sink.clear();
            assert!(sink.is_empty());
        }

        #[test]
        fn test_memory_sink_clones_share_storage() {
            let sink = MemorySink::new();
            let other = sink.clone();
            other.emit(StepEvent::start("retry", "x"));
            assert_eq!(sink.len(), 1);
        }

        #[test]
        fn test_fanout_reaches_every_sink() {
            let a = MemorySink::new();
            let b = MemorySink::new();
            let fanout = FanoutSink::new()
                .with(Arc::new(a.clone()))
                .with(Arc::new(b.clone()));
            fanout.emit(StepEvent::error("resolve", "role"));
            assert_eq!(a.len(), 1);
            assert_eq!(b.len(), 1);
        }

        #[test]
        fn test_json_lines_sink_writes_one_line_per_event() {
            let sink = JsonLinesSink::new(Vec::new());
            sink.emit(StepEvent::start("retry", "publish"));
            sink.emit(StepEvent::error("retry", "publish").with_detail("flaky"));
            let out = String::from_utf8(sink.into_inner()).unwrap();
            let lines: Vec<_> = out.lines().collect();
            assert_eq!(lines.len(), 2);
            let second: StepEvent = serde_json::from_str(lines[1]).unwrap();
            assert_eq!(second.detail.as_deref(), Some("flaky"));
        }

        #[test]
        fn test_json_lines_sink_appends_to_file() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("steps.jsonl");
            {
                let sink = JsonLinesSink::append_to(&path).unwrap();
                sink.emit(StepEvent::success("verify", "add"));
            }
            {
                let sink = JsonLinesSink::append_to(&path).unwrap();
                sink.emit(StepEvent::success("verify", "move"));
            }
            let content = std::fs::read_to_string(&path).unwrap();
            assert_eq!(content.lines().count(), 2);
        }
    }
}
