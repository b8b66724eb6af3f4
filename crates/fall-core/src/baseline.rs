//! # Baseline Tracker
//!
//! Exponentially weighted moving average of pitch, used as the reference for
//! the wearer's normal posture.

/// EMA of pitch, seeded by the first pitch observed.
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineTracker {
    alpha: f64,
    value: Option<f64>,
}

impl BaselineTracker {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, value: None }
    }

    /// Fold one pitch reading into the baseline. Absent pitch leaves it untouched.
    pub fn update(&mut self, pitch: Option<f64>) {
        let Some(pitch) = pitch else {
            return;
        };
        let base = self.value.unwrap_or(pitch);
        self.value = Some(base + self.alpha * (pitch - base));
    }

    /// Current baseline, `None` until a pitch has been seen.
    pub fn value(&self) -> Option<f64> {
        self.value
    }

    /// `|pitch - baseline|`, or 0 when either side is unknown.
    pub fn delta(&self, pitch: Option<f64>) -> f64 {
        match (pitch, self.value) {
            (Some(p), Some(b)) => (p - b).abs(),
            _ => 0.0,
        }
    }
}
