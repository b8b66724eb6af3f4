//! # Fall Core
//!
//! This crate provides the per-device fall detector: sample normalization,
//! the baseline pitch EMA, the time-bounded history buffer, the windowed
//! aggregates, and the four-phase state machine built on them.
//! It does no I/O; callers feed it [`TelemetryRecord`]s and act on the
//! returned [`Outcome`].

pub mod analytics;
pub mod baseline;
pub mod config;
pub mod detector;
pub mod error;
pub mod history;
pub mod machine;
pub mod sample;

use std::time::{SystemTime, UNIX_EPOCH};

pub use analytics::{has_shock, Window};
pub use baseline::BaselineTracker;
pub use config::DetectorConfig;
pub use detector::{DebugInfo, Detector, Outcome};
pub use error::{FallError, Result};
pub use history::HistoryBuffer;
pub use machine::{DetectorState, FallEvent, Phase};
pub use sample::{Sample, SampleIngest, TelemetryRecord};

/// Milliseconds since the Unix epoch, as used for telemetry timestamps.
///
/// A clock set before 1970 reads as 0.
pub fn wall_clock_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as f64)
        .unwrap_or(0.0)
}
