//! # Sample Ingest
//!
//! Turns one raw telemetry record into a normalized [`Sample`]: optional
//! numeric fields are kept only when finite, a missing timestamp falls back to
//! the caller's clock, and per-axis angular velocities are derived against the
//! previous reading.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Floor applied to the time between two readings when deriving velocities.
pub const MIN_SAMPLE_INTERVAL_MS: f64 = 1.0;

/// One telemetry submission as it arrives from the transport.
///
/// Every field is optional at this level. Numeric fields that are present but
/// not finite numbers (strings, `null`, literals beyond `f64` range such as
/// `1e400`) deserialize to `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Milliseconds since the epoch.
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub t: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub pitch_deg: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub roll_deg: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub yaw_deg: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub gyro_deg_per_s: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub motion_energy: Option<f64>,
    /// Client-side orientation hint. Echoed back, never used for detection.
    #[serde(default, deserialize_with = "lenient_bool", skip_serializing_if = "Option::is_none")]
    pub flipped180: Option<bool>,
}

impl TelemetryRecord {
    /// Record for `device_id` at time `t` with nothing else set.
    pub fn at(device_id: &str, t: f64) -> Self {
        Self {
            device_id: Some(device_id.to_string()),
            t: Some(t),
            ..Self::default()
        }
    }

    pub fn with_pitch(mut self, pitch_deg: f64) -> Self {
        self.pitch_deg = Some(pitch_deg);
        self
    }

    pub fn with_roll(mut self, roll_deg: f64) -> Self {
        self.roll_deg = Some(roll_deg);
        self
    }

    pub fn with_yaw(mut self, yaw_deg: f64) -> Self {
        self.yaw_deg = Some(yaw_deg);
        self
    }

    pub fn with_gyro(mut self, gyro_deg_per_s: f64) -> Self {
        self.gyro_deg_per_s = Some(gyro_deg_per_s);
        self
    }

    pub fn with_motion_energy(mut self, motion_energy: f64) -> Self {
        self.motion_energy = Some(motion_energy);
        self
    }
}

// Numbers go through `Value` so that an out-of-range literal is kept as its
// digits (`arbitrary_precision`) and then dropped here, not failing the parse.
fn lenient_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        _ => None,
    })
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(flag) => Some(flag),
        _ => None,
    })
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// A normalized reading retained in the history buffer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub timestamp: f64,
    pub pitch: Option<f64>,
    pub yaw: Option<f64>,
    pub roll: Option<f64>,
    pub velocity_pitch: Option<f64>,
    pub velocity_yaw: Option<f64>,
    pub velocity_roll: Option<f64>,
    pub gyro_magnitude: Option<f64>,
    pub motion_energy: Option<f64>,
}

impl Sample {
    /// Angular rate magnitude: the reported gyro when present, otherwise the
    /// norm of the derived axis velocities (missing axes count as 0).
    pub fn rate_magnitude(&self) -> f64 {
        match self.gyro_magnitude {
            Some(gyro) => gyro,
            None => {
                let vp = self.velocity_pitch.unwrap_or(0.0);
                let vy = self.velocity_yaw.unwrap_or(0.0);
                let vr = self.velocity_roll.unwrap_or(0.0);
                (vp * vp + vy * vy + vr * vr).sqrt()
            }
        }
    }

    /// Mean absolute angular rate: `|gyro|` when present, otherwise the mean
    /// of the absolute axis velocities.
    pub fn abs_rate(&self) -> f64 {
        match self.gyro_magnitude {
            Some(gyro) => gyro.abs(),
            None => {
                let vp = self.velocity_pitch.unwrap_or(0.0).abs();
                let vy = self.velocity_yaw.unwrap_or(0.0).abs();
                let vr = self.velocity_roll.unwrap_or(0.0).abs();
                (vp + vy + vr) / 3.0
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct LastReading {
    timestamp: f64,
    pitch: Option<f64>,
    yaw: Option<f64>,
    roll: Option<f64>,
}

/// Normalizes records and remembers the previous reading for velocity math,
/// independently of what the history buffer still retains.
#[derive(Debug, Clone, Default)]
pub struct SampleIngest {
    last: Option<LastReading>,
}

impl SampleIngest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize `record`. `fallback_now` is used when the record carries no
    /// usable timestamp.
    pub fn ingest(&mut self, record: &TelemetryRecord, fallback_now: f64) -> Sample {
        let timestamp = finite(record.t).unwrap_or(fallback_now);
        let pitch = finite(record.pitch_deg);
        let yaw = finite(record.yaw_deg);
        let roll = finite(record.roll_deg);

        let (velocity_pitch, velocity_yaw, velocity_roll) = match self.last {
            Some(last) => {
                let dt_s = (timestamp - last.timestamp).max(MIN_SAMPLE_INTERVAL_MS) / 1000.0;
                (
                    axis_velocity(pitch, last.pitch, dt_s),
                    axis_velocity(yaw, last.yaw, dt_s),
                    axis_velocity(roll, last.roll, dt_s),
                )
            }
            None => (None, None, None),
        };

        self.last = Some(LastReading {
            timestamp,
            pitch,
            yaw,
            roll,
        });

        Sample {
            timestamp,
            pitch,
            yaw,
            roll,
            velocity_pitch,
            velocity_yaw,
            velocity_roll,
            gyro_magnitude: finite(record.gyro_deg_per_s),
            motion_energy: finite(record.motion_energy),
        }
    }
}

fn axis_velocity(current: Option<f64>, previous: Option<f64>, dt_s: f64) -> Option<f64> {
    let v = (current? - previous?) / dt_s;
    v.is_finite().then_some(v)
}
