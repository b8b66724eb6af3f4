//! # Detector Configuration
//!
//! Every threshold used by the fall detector. Deserializing a partial JSON
//! object keeps the defaults for the fields it does not name, so a deployment
//! can override a single threshold without restating the rest.

use serde::{Deserialize, Serialize};

use crate::error::{FallError, Result};

/// Thresholds and window lengths for one detector. Times are milliseconds,
/// angles degrees, angular rates degrees per second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DetectorConfig {
    /// Retention of the per-device sample history.
    pub sample_history_ms: f64,
    /// Minimum absolute pitch change over the tilt window.
    pub downward_delta_deg: f64,
    /// Minimum peak |pitch velocity| over the tilt window.
    pub downward_vel_deg_s: f64,
    pub downward_window_ms: f64,
    /// Single-sample gyro magnitude counted as a shock.
    pub shock_gyro_deg_s: f64,
    /// Single-sample motion energy (0..100) counted as a shock.
    pub shock_motion_energy: f64,
    /// RMS instability that marks staggering.
    pub stagger_rms_thresh: f64,
    /// RMS window checked while in `downward`.
    pub stagger_entry_window_ms: f64,
    /// Minimum time in `downward` before `stagger` may begin.
    pub stagger_entry_dwell_ms: f64,
    /// RMS window checked while in `stagger`.
    pub stagger_window_ms: f64,
    pub stagger_min_ms: f64,
    /// Mean absolute angular rate at or below which the device is still.
    pub stillness_vel_deg_s: f64,
    pub stillness_window_ms: f64,
    /// Minimum time in `stagger` before stillness counts.
    pub stillness_dwell_ms: f64,
    /// Pitch distance from baseline that counts as a low posture.
    pub low_pitch_delta_deg: f64,
    /// Absolute pitch that counts as a low posture regardless of baseline.
    pub low_pitch_abs_deg: f64,
    pub max_down_to_stagger_ms: f64,
    pub max_stagger_to_confirm_ms: f64,
    /// How long `confirm` is held before returning to `idle`.
    pub confirm_hold_ms: f64,
    /// Smoothing factor of the baseline pitch EMA.
    pub baseline_alpha: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sample_history_ms: 4000.0,
            downward_delta_deg: 50.0,
            downward_vel_deg_s: 180.0,
            downward_window_ms: 800.0,
            shock_gyro_deg_s: 420.0,
            shock_motion_energy: 35.0,
            stagger_rms_thresh: 60.0,
            stagger_entry_window_ms: 800.0,
            stagger_entry_dwell_ms: 300.0,
            stagger_window_ms: 1200.0,
            stagger_min_ms: 1000.0,
            stillness_vel_deg_s: 20.0,
            stillness_window_ms: 1500.0,
            stillness_dwell_ms: 700.0,
            low_pitch_delta_deg: 35.0,
            low_pitch_abs_deg: 45.0,
            max_down_to_stagger_ms: 2500.0,
            max_stagger_to_confirm_ms: 5000.0,
            confirm_hold_ms: 5000.0,
            baseline_alpha: 0.05,
        }
    }
}

impl DetectorConfig {
    /// Check that every field is usable.
    ///
    /// Windows must be positive and fit inside the history retention,
    /// thresholds non-negative and finite, and the EMA factor inside `(0, 1]`.
    pub fn validate(&self) -> Result<()> {
        let windows = [
            ("sampleHistoryMs", self.sample_history_ms),
            ("downwardWindowMs", self.downward_window_ms),
            ("staggerEntryWindowMs", self.stagger_entry_window_ms),
            ("staggerWindowMs", self.stagger_window_ms),
            ("stillnessWindowMs", self.stillness_window_ms),
        ];
        for (name, value) in windows {
            if !value.is_finite() || value <= 0.0 {
                return Err(FallError::InvalidConfig(format!(
                    "{name} must be a positive number of milliseconds, got {value}"
                )));
            }
        }

        let (longest_name, longest) = windows[1..]
            .iter()
            .copied()
            .fold(("", 0.0), |a, b| if b.1 > a.1 { b } else { a });
        if self.sample_history_ms < longest {
            return Err(FallError::InvalidConfig(format!(
                "sampleHistoryMs ({}) must cover {longest_name} ({longest})",
                self.sample_history_ms
            )));
        }

        let thresholds = [
            ("downwardDeltaDeg", self.downward_delta_deg),
            ("downwardVelDegS", self.downward_vel_deg_s),
            ("shockGyroDegS", self.shock_gyro_deg_s),
            ("shockMotionEnergy", self.shock_motion_energy),
            ("staggerRmsThresh", self.stagger_rms_thresh),
            ("staggerEntryDwellMs", self.stagger_entry_dwell_ms),
            ("staggerMinMs", self.stagger_min_ms),
            ("stillnessVelDegS", self.stillness_vel_deg_s),
            ("stillnessDwellMs", self.stillness_dwell_ms),
            ("lowPitchDeltaDeg", self.low_pitch_delta_deg),
            ("lowPitchAbsDeg", self.low_pitch_abs_deg),
            ("maxDownToStaggerMs", self.max_down_to_stagger_ms),
            ("maxStaggerToConfirmMs", self.max_stagger_to_confirm_ms),
            ("confirmHoldMs", self.confirm_hold_ms),
        ];
        for (name, value) in thresholds {
            if !value.is_finite() || value < 0.0 {
                return Err(FallError::InvalidConfig(format!(
                    "{name} must be a non-negative finite number, got {value}"
                )));
            }
        }

        if !(self.baseline_alpha > 0.0 && self.baseline_alpha <= 1.0) {
            return Err(FallError::InvalidConfig(format!(
                "baselineAlpha must lie in (0, 1], got {}",
                self.baseline_alpha
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_thresholds() {
        let cfg = DetectorConfig::default();
        assert_eq!(cfg.sample_history_ms, 4000.0);
        assert_eq!(cfg.downward_delta_deg, 50.0);
        assert_eq!(cfg.downward_vel_deg_s, 180.0);
        assert_eq!(cfg.shock_gyro_deg_s, 420.0);
        assert_eq!(cfg.shock_motion_energy, 35.0);
        assert_eq!(cfg.stagger_rms_thresh, 60.0);
        assert_eq!(cfg.max_down_to_stagger_ms, 2500.0);
        assert_eq!(cfg.max_stagger_to_confirm_ms, 5000.0);
        assert_eq!(cfg.baseline_alpha, 0.05);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let cfg: DetectorConfig =
            serde_json::from_str(r#"{"shockGyroDegS": 300, "staggerMinMs": 1500}"#).unwrap();
        assert_eq!(cfg.shock_gyro_deg_s, 300.0);
        assert_eq!(cfg.stagger_min_ms, 1500.0);
        assert_eq!(cfg.downward_delta_deg, 50.0);
        assert_eq!(cfg.confirm_hold_ms, 5000.0);
    }

    #[test]
    fn validate_rejects_zero_window() {
        let cfg = DetectorConfig {
            stagger_window_ms: 0.0,
            ..DetectorConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, FallError::InvalidConfig(ref m) if m.contains("staggerWindowMs")));
    }

    #[test]
    fn validate_rejects_history_shorter_than_a_window() {
        let cfg = DetectorConfig {
            sample_history_ms: 1000.0,
            ..DetectorConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, FallError::InvalidConfig(ref m) if m.contains("stillnessWindowMs")));

        let exact = DetectorConfig {
            sample_history_ms: 1500.0,
            ..DetectorConfig::default()
        };
        assert!(exact.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_alpha_and_nan_thresholds() {
        let cfg = DetectorConfig {
            baseline_alpha: 1.5,
            ..DetectorConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = DetectorConfig {
            stillness_vel_deg_s: f64::NAN,
            ..DetectorConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
