//! # Window Analytics
//!
//! Pure aggregates over a time slice of the history. An empty window yields 0
//! for every aggregate.

use crate::config::DetectorConfig;
use crate::sample::Sample;

/// A borrowed, timestamp-filtered view of the history.
#[derive(Debug, Clone, Default)]
pub struct Window<'a> {
    samples: Vec<&'a Sample>,
}

impl<'a> Window<'a> {
    pub fn new(samples: Vec<&'a Sample>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[&'a Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// `|pitch(last) - pitch(first)|` over the samples that carry a pitch.
    pub fn pitch_span(&self) -> f64 {
        let mut pitches = self.samples.iter().filter_map(|s| s.pitch);
        let Some(first) = pitches.next() else {
            return 0.0;
        };
        let last = pitches.last().unwrap_or(first);
        (last - first).abs()
    }

    /// Largest `|velocityPitch|` in the window; missing velocities count as 0.
    pub fn max_abs_pitch_velocity(&self) -> f64 {
        self.samples
            .iter()
            .map(|s| s.velocity_pitch.unwrap_or(0.0).abs())
            .fold(0.0, f64::max)
    }

    /// Root-mean-square of the per-sample angular rate magnitude.
    pub fn instability_rms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mean_sq = self
            .samples
            .iter()
            .map(|s| {
                let m = s.rate_magnitude();
                m * m
            })
            .sum::<f64>()
            / self.samples.len() as f64;
        mean_sq.sqrt()
    }

    /// Mean absolute angular rate.
    pub fn avg_abs_velocity(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.abs_rate()).sum::<f64>() / self.samples.len() as f64
    }

    /// Large tilt change combined with a fast pitch rate. The direction of the
    /// change is ignored because mounting orientation differs between devices.
    pub fn has_rapid_downward_tilt(&self, config: &DetectorConfig) -> bool {
        !self.is_empty()
            && self.pitch_span() >= config.downward_delta_deg
            && self.max_abs_pitch_velocity() >= config.downward_vel_deg_s
    }
}

/// Whether the latest sample alone reports a shock.
pub fn has_shock(latest: Option<&Sample>, config: &DetectorConfig) -> bool {
    let Some(sample) = latest else {
        return false;
    };
    let gyro_hit = sample
        .gyro_magnitude
        .is_some_and(|g| g >= config.shock_gyro_deg_s);
    let motion_hit = sample
        .motion_energy
        .is_some_and(|m| m >= config.shock_motion_energy);
    gyro_hit || motion_hit
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample(timestamp: f64) -> Sample {
        Sample {
            timestamp,
            ..Sample::default()
        }
    }

    #[test]
    fn empty_window_aggregates_to_zero() {
        let w = Window::default();
        assert_eq!(w.pitch_span(), 0.0);
        assert_eq!(w.max_abs_pitch_velocity(), 0.0);
        assert_eq!(w.instability_rms(), 0.0);
        assert_eq!(w.avg_abs_velocity(), 0.0);
        assert!(!w.has_rapid_downward_tilt(&DetectorConfig::default()));
    }

    #[test]
    fn pitch_span_skips_samples_without_pitch() {
        let a = Sample { pitch: None, ..sample(0.0) };
        let b = Sample { pitch: Some(-10.0), ..sample(100.0) };
        let c = Sample { pitch: Some(45.0), ..sample(200.0) };
        let d = Sample { pitch: None, ..sample(300.0) };
        let w = Window::new(vec![&a, &b, &c, &d]);
        assert_relative_eq!(w.pitch_span(), 55.0);

        let single = Window::new(vec![&b]);
        assert_eq!(single.pitch_span(), 0.0);
    }

    #[test]
    fn rms_mixes_gyro_and_derived_rates() {
        let a = Sample { gyro_magnitude: Some(30.0), ..sample(0.0) };
        let b = Sample {
            velocity_pitch: Some(30.0),
            velocity_yaw: Some(40.0),
            ..sample(100.0)
        };
        let w = Window::new(vec![&a, &b]);
        // sqrt((900 + 2500) / 2)
        assert_relative_eq!(w.instability_rms(), 1700.0_f64.sqrt());
        // (30 + 70/3) / 2
        assert_relative_eq!(w.avg_abs_velocity(), (30.0 + 70.0 / 3.0) / 2.0);
    }

    #[test]
    fn tilt_needs_both_delta_and_velocity() {
        let cfg = DetectorConfig::default();
        let flat = Sample { pitch: Some(0.0), ..sample(0.0) };
        let slow = Sample {
            pitch: Some(-60.0),
            velocity_pitch: Some(-150.0),
            ..sample(400.0)
        };
        assert!(!Window::new(vec![&flat, &slow]).has_rapid_downward_tilt(&cfg));

        let fast = Sample {
            pitch: Some(-70.0),
            velocity_pitch: Some(-233.3),
            ..sample(300.0)
        };
        assert!(Window::new(vec![&flat, &fast]).has_rapid_downward_tilt(&cfg));

        let small = Sample {
            pitch: Some(-20.0),
            velocity_pitch: Some(-400.0),
            ..sample(50.0)
        };
        assert!(!Window::new(vec![&flat, &small]).has_rapid_downward_tilt(&cfg));
    }

    #[test]
    fn upward_tilt_also_counts() {
        let cfg = DetectorConfig::default();
        let a = Sample { pitch: Some(-10.0), ..sample(0.0) };
        let b = Sample {
            pitch: Some(50.0),
            velocity_pitch: Some(200.0),
            ..sample(300.0)
        };
        assert!(Window::new(vec![&a, &b]).has_rapid_downward_tilt(&cfg));
    }

    #[test]
    fn shock_from_gyro_or_motion_energy() {
        let cfg = DetectorConfig::default();
        assert!(!has_shock(None, &cfg));

        let gyro = Sample { gyro_magnitude: Some(420.0), ..sample(0.0) };
        assert!(has_shock(Some(&gyro), &cfg));

        let motion = Sample { motion_energy: Some(35.0), ..sample(0.0) };
        assert!(has_shock(Some(&motion), &cfg));

        let calm = Sample {
            gyro_magnitude: Some(419.9),
            motion_energy: Some(34.9),
            ..sample(0.0)
        };
        assert!(!has_shock(Some(&calm), &cfg));
    }
}
