//! # Fall State Machine
//!
//! Four phases, cycled in one direction:
//!
//! ```text
//! idle -> downward -> stagger -> confirm -> idle
//!            |           |
//!            +-> idle    +-> idle        (timeouts)
//! ```
//!
//! [`evaluate`] runs exactly one check per sample, for the current phase only,
//! and returns the transition to apply (if any). It never mutates anything.

use std::fmt;

use log::trace;
use serde::{Deserialize, Serialize};

use crate::analytics::has_shock;
use crate::config::DetectorConfig;
use crate::error::{finite, Result};
use crate::history::HistoryBuffer;

/// Public label of the detector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Downward,
    Stagger,
    Confirm,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Downward => "downward",
            Phase::Stagger => "stagger",
            Phase::Confirm => "confirm",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detector state together with the entry time of the current phase.
///
/// `baseline_at_entry` is the baseline pitch in effect when `downward` was
/// entered; it follows the episode through `stagger` and `confirm`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum DetectorState {
    #[default]
    Idle,
    Downward {
        since: f64,
        baseline_at_entry: Option<f64>,
    },
    Stagger {
        since: f64,
        baseline_at_entry: Option<f64>,
    },
    Confirm {
        since: f64,
        baseline_at_entry: Option<f64>,
    },
}

impl DetectorState {
    pub fn phase(&self) -> Phase {
        match self {
            DetectorState::Idle => Phase::Idle,
            DetectorState::Downward { .. } => Phase::Downward,
            DetectorState::Stagger { .. } => Phase::Stagger,
            DetectorState::Confirm { .. } => Phase::Confirm,
        }
    }

    /// Timestamp at which the current phase was entered; `None` for idle.
    pub fn entered_at(&self) -> Option<f64> {
        match *self {
            DetectorState::Idle => None,
            DetectorState::Downward { since, .. }
            | DetectorState::Stagger { since, .. }
            | DetectorState::Confirm { since, .. } => Some(since),
        }
    }

    pub fn baseline_at_entry(&self) -> Option<f64> {
        match *self {
            DetectorState::Idle => None,
            DetectorState::Downward { baseline_at_entry, .. }
            | DetectorState::Stagger { baseline_at_entry, .. }
            | DetectorState::Confirm { baseline_at_entry, .. } => baseline_at_entry,
        }
    }
}

/// Events emitted on transitions. Serialized as `{"type": "downward-start", ...}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum FallEvent {
    DownwardStart,
    StaggerStart { rms: f64 },
    DownwardTimeout,
    StaggerTimeout,
    FallDetected,
}

impl FallEvent {
    pub fn name(&self) -> &'static str {
        match self {
            FallEvent::DownwardStart => "downward-start",
            FallEvent::StaggerStart { .. } => "stagger-start",
            FallEvent::DownwardTimeout => "downward-timeout",
            FallEvent::StaggerTimeout => "stagger-timeout",
            FallEvent::FallDetected => "fall-detected",
        }
    }

    pub fn is_fall(&self) -> bool {
        matches!(self, FallEvent::FallDetected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub next: DetectorState,
    pub event: Option<FallEvent>,
}

/// Everything a transition check may look at for one sample.
#[derive(Debug, Clone, Copy)]
pub struct Inputs<'a> {
    pub now: f64,
    pub history: &'a HistoryBuffer,
    pub pitch_now: Option<f64>,
    pub baseline: Option<f64>,
    pub pitch_delta_from_baseline: f64,
    pub config: &'a DetectorConfig,
}

/// Decide the transition for `state` given this sample's inputs.
///
/// Returns `Ok(None)` when the detector stays where it is. An `Err` means an
/// aggregate came out non-finite; callers must then leave the state as is.
pub fn evaluate(state: &DetectorState, inputs: &Inputs<'_>) -> Result<Option<Transition>> {
    let cfg = inputs.config;
    let now = inputs.now;
    let history = inputs.history;

    let transition = match *state {
        DetectorState::Idle => {
            let window = history.window(now, cfg.downward_window_ms);
            let span = finite("pitch span", window.pitch_span())?;
            let tilt = window.has_rapid_downward_tilt(cfg);
            let shock = has_shock(history.latest(), cfg);
            trace!("idle: span={span:.1} tilt={tilt} shock={shock}");

            (tilt || shock).then_some(Transition {
                next: DetectorState::Downward {
                    since: now,
                    baseline_at_entry: inputs.baseline,
                },
                event: Some(FallEvent::DownwardStart),
            })
        }
        DetectorState::Downward {
            since,
            baseline_at_entry,
        } => {
            let elapsed = now - since;
            let rms = finite(
                "instability rms",
                history.window(now, cfg.stagger_entry_window_ms).instability_rms(),
            )?;
            trace!("downward: rms={rms:.1} elapsed={elapsed}");

            if rms >= cfg.stagger_rms_thresh && elapsed >= cfg.stagger_entry_dwell_ms {
                Some(Transition {
                    next: DetectorState::Stagger {
                        since: now,
                        baseline_at_entry,
                    },
                    event: Some(FallEvent::StaggerStart { rms }),
                })
            } else if elapsed > cfg.max_down_to_stagger_ms {
                Some(Transition {
                    next: DetectorState::Idle,
                    event: Some(FallEvent::DownwardTimeout),
                })
            } else {
                None
            }
        }
        DetectorState::Stagger {
            since,
            baseline_at_entry,
        } => {
            let elapsed = now - since;
            let rms = finite(
                "instability rms",
                history.window(now, cfg.stagger_window_ms).instability_rms(),
            )?;
            let still = finite(
                "average angular rate",
                history.window(now, cfg.stillness_window_ms).avg_abs_velocity(),
            )?;

            let staggered_enough = rms >= cfg.stagger_rms_thresh && elapsed >= cfg.stagger_min_ms;
            let still_enough = still <= cfg.stillness_vel_deg_s && elapsed >= cfg.stillness_dwell_ms;
            let low_posture = inputs.pitch_delta_from_baseline >= cfg.low_pitch_delta_deg
                || inputs
                    .pitch_now
                    .is_some_and(|p| p.abs() >= cfg.low_pitch_abs_deg);
            trace!(
                "stagger: rms={rms:.1} still={still:.1} low={low_posture} elapsed={elapsed}"
            );

            if staggered_enough && still_enough && low_posture {
                Some(Transition {
                    next: DetectorState::Confirm {
                        since: now,
                        baseline_at_entry,
                    },
                    event: Some(FallEvent::FallDetected),
                })
            } else if elapsed > cfg.max_stagger_to_confirm_ms {
                Some(Transition {
                    next: DetectorState::Idle,
                    event: Some(FallEvent::StaggerTimeout),
                })
            } else {
                None
            }
        }
        DetectorState::Confirm { since, .. } => {
            (now - since > cfg.confirm_hold_ms).then_some(Transition {
                next: DetectorState::Idle,
                event: None,
            })
        }
    };

    Ok(transition)
}
