//! Append-only offset log.
//!
//! One record per completed phase, human-readable, never rewritten. The
//! engine formats and appends; it never reads records back.

use chrono::{DateTime, Local};
use mes_math::RigidTransform;

/// Append-only text sink for phase records.
pub trait LogSink: Send {
    /// Append one complete record.
    fn append(&mut self, record: &str);
}

/// In-memory sink for tests and harnesses.
#[derive(Debug, Default)]
pub struct VecLogSink {
    /// Appended records, in order
    pub records: Vec<String>,
}

impl VecLogSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogSink for VecLogSink {
    fn append(&mut self, record: &str) {
        self.records.push(record.to_string());
    }
}

/// Format one phase record: tag header, timestamp, then the offsets.
pub fn format_phase_record(
    label: &str,
    transform: &RigidTransform,
    timestamp: DateTime<Local>,
) -> String {
    format!(
        "# {label}\n# {}\ndx = {:+.3} (px), dy = {:+.3} (px), rotate = {:+.4} (deg)\n",
        timestamp.format("%Y-%m-%d %H:%M:%S"),
        transform.dx,
        transform.dy,
        transform.theta_degrees(),
    )
}
