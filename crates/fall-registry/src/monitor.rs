//! # Fall Monitor
//!
//! The request-level facade a transport talks to: ingest telemetry, query a
//! device's state, reset a device. Each call runs to completion on the
//! caller's thread.

use fall_core::{wall_clock_ms, FallError, Outcome, Phase, Result, TelemetryRecord};
use log::{error, info, warn};
use serde::Serialize;

use crate::notify::FallNotifier;
use crate::registry::{require_device_id, DeviceRegistry, RegistryConfig};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryResponse {
    pub device_id: String,
    pub ok: bool,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateResponse {
    pub device_id: String,
    pub state: Phase,
    pub last_fall_at: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResetResponse {
    pub ok: bool,
}

/// Body returned to clients for rejected requests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorResponse {
    pub error: bool,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: true,
            message: message.into(),
        }
    }
}

impl From<&FallError> for ErrorResponse {
    fn from(err: &FallError) -> Self {
        match err {
            FallError::InvalidArgument(msg) => Self::new(msg.clone()),
            other => Self::new(other.to_string()),
        }
    }
}

pub struct FallMonitor {
    registry: DeviceRegistry,
    notifiers: Vec<Box<dyn FallNotifier>>,
}

impl FallMonitor {
    pub fn new(config: RegistryConfig) -> Result<Self> {
        Ok(Self::with_registry(DeviceRegistry::new(config)?))
    }

    pub fn with_registry(registry: DeviceRegistry) -> Self {
        Self {
            registry,
            notifiers: Vec::new(),
        }
    }

    pub fn add_notifier(&mut self, notifier: Box<dyn FallNotifier>) {
        self.notifiers.push(notifier);
    }

    /// Process one telemetry record. A record without a timestamp is stamped
    /// with the wall clock.
    pub fn ingest(&self, record: &TelemetryRecord) -> Result<TelemetryResponse> {
        self.ingest_at(record, wall_clock_ms())
    }

    /// Like [`ingest`](Self::ingest) with an explicit fallback clock.
    pub fn ingest_at(&self, record: &TelemetryRecord, fallback_now: f64) -> Result<TelemetryResponse> {
        let device_id = require_device_id(record.device_id.as_deref())?;
        let outcome = self
            .registry
            .with_detector(device_id, |detector| detector.push_at(record, fallback_now))?;
        let outcome = outcome.inspect_err(|e| {
            error!("evaluation failed for device={device_id}: {e}");
        })?;

        if outcome.fall {
            warn!("[FALL] device={device_id} at={}", outcome.at);
            self.notify(device_id, &outcome);
        } else if let Some(event) = outcome.event {
            info!("device={device_id} {} -> {}", event.name(), outcome.state);
        }

        Ok(TelemetryResponse {
            device_id: device_id.to_string(),
            ok: true,
            outcome,
        })
    }

    pub fn state(&self, device_id: &str) -> Result<StateResponse> {
        let state = self.registry.query_state(device_id)?;
        Ok(StateResponse {
            device_id: device_id.to_string(),
            state: state.phase,
            last_fall_at: state.last_fall_at,
        })
    }

    pub fn reset(&self, device_id: &str) -> Result<ResetResponse> {
        self.registry.reset(device_id)?;
        Ok(ResetResponse { ok: true })
    }

    /// Evict idle detectors; see [`DeviceRegistry::sweep`].
    pub fn sweep(&self, now: f64) -> usize {
        let evicted = self.registry.sweep(now);
        if evicted > 0 {
            info!("evicted {evicted} idle detector(s)");
        }
        evicted
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    fn notify(&self, device_id: &str, outcome: &Outcome) {
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(device_id, outcome) {
                warn!("notifier {} failed for device={device_id}: {e:#}", notifier.name());
            }
        }
    }
}
