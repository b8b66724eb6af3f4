//! # Detector
//!
//! One per device. Each pushed record goes through ingest, baseline update,
//! history append + trim, and one state-machine check, in that order.

use log::debug;
use serde::Serialize;

use crate::baseline::BaselineTracker;
use crate::config::DetectorConfig;
use crate::error::Result;
use crate::history::HistoryBuffer;
use crate::machine::{self, DetectorState, FallEvent, Inputs, Phase};
use crate::sample::{SampleIngest, TelemetryRecord};
use crate::wall_clock_ms;

/// Values echoed back with every result for debugging a deployment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugInfo {
    pub pitch_now: Option<f64>,
    pub baseline_pitch: Option<f64>,
    pub pitch_delta_from_baseline: f64,
    pub baseline_at_downward: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flipped180: Option<bool>,
}

/// Result of pushing one sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub state: Phase,
    pub event: Option<FallEvent>,
    pub fall: bool,
    /// Timestamp the sample was processed at (ms).
    pub at: f64,
    pub debug: DebugInfo,
}

#[derive(Debug, Clone)]
pub struct Detector {
    config: DetectorConfig,
    ingest: SampleIngest,
    baseline: BaselineTracker,
    history: HistoryBuffer,
    state: DetectorState,
    last_fall_at: Option<f64>,
    last_seen_at: Option<f64>,
}

impl Default for Detector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector {
    /// Detector with the reference thresholds.
    pub fn new() -> Self {
        Self::build(DetectorConfig::default())
    }

    /// Detector with custom thresholds. Fails if `config` does not validate.
    pub fn with_config(config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: DetectorConfig) -> Self {
        Self {
            ingest: SampleIngest::new(),
            baseline: BaselineTracker::new(config.baseline_alpha),
            history: HistoryBuffer::new(config.sample_history_ms),
            state: DetectorState::Idle,
            last_fall_at: None,
            last_seen_at: None,
            config,
        }
    }

    /// Push a record, using the wall clock when it has no timestamp.
    ///
    /// # Examples
    ///
    /// ```
    /// use fall_core::{Detector, Phase, TelemetryRecord};
    ///
    /// let mut detector = Detector::new();
    /// let out = detector
    ///     .push(&TelemetryRecord::at("wrist-1", 1_000.0).with_pitch(2.0))
    ///     .unwrap();
    /// assert_eq!(out.state, Phase::Idle);
    /// assert!(!out.fall);
    /// ```
    pub fn push(&mut self, record: &TelemetryRecord) -> Result<Outcome> {
        self.push_at(record, wall_clock_ms())
    }

    /// Push a record, using `fallback_now` when it has no timestamp.
    ///
    /// On `Err` the sample is already in the history but the state did not
    /// change.
    pub fn push_at(&mut self, record: &TelemetryRecord, fallback_now: f64) -> Result<Outcome> {
        let sample = self.ingest.ingest(record, fallback_now);
        let now = sample.timestamp;
        let pitch_now = sample.pitch;

        self.baseline.update(pitch_now);
        self.history.push(sample);
        self.last_seen_at = Some(now);

        let pitch_delta_from_baseline = self.baseline.delta(pitch_now);
        let transition = machine::evaluate(
            &self.state,
            &Inputs {
                now,
                history: &self.history,
                pitch_now,
                baseline: self.baseline.value(),
                pitch_delta_from_baseline,
                config: &self.config,
            },
        )?;

        let mut event = None;
        if let Some(transition) = transition {
            debug!(
                "{} -> {} at {now} ({})",
                self.state.phase(),
                transition.next.phase(),
                transition.event.map_or("no event", |e| e.name()),
            );
            self.state = transition.next;
            event = transition.event;
            if event.is_some_and(|e| e.is_fall()) {
                self.last_fall_at = Some(now);
            }
        }

        Ok(Outcome {
            state: self.state.phase(),
            event,
            fall: event.is_some_and(|e| e.is_fall()),
            at: now,
            debug: DebugInfo {
                pitch_now,
                baseline_pitch: self.baseline.value(),
                pitch_delta_from_baseline,
                baseline_at_downward: self.state.baseline_at_entry(),
                flipped180: record.flipped180,
            },
        })
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn state(&self) -> &DetectorState {
        &self.state
    }

    pub fn last_fall_at(&self) -> Option<f64> {
        self.last_fall_at
    }

    /// Timestamp of the most recent sample pushed.
    pub fn last_seen_at(&self) -> Option<f64> {
        self.last_seen_at
    }

    pub fn baseline_pitch(&self) -> Option<f64> {
        self.baseline.value()
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }
}
