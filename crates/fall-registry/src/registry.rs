//! # Device Registry
//!
//! Maps device ids to their detectors. The map has its own lock; each
//! detector sits behind a separate mutex, so two devices never contend and
//! two submissions for the same device never interleave.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use fall_core::{Detector, DetectorConfig, FallError, Phase, Result};
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

pub type SharedDetector = Arc<Mutex<Detector>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RegistryConfig {
    /// Thresholds every new detector is built with.
    pub detector: DetectorConfig,
    /// Detectors idle for longer than this are dropped by [`DeviceRegistry::sweep`].
    /// `None` disables eviction.
    pub idle_ttl_ms: Option<f64>,
}

/// Read-only view of one device's detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceState {
    pub phase: Phase,
    pub last_fall_at: Option<f64>,
}

/// Rejects a missing or empty device id.
pub fn require_device_id(device_id: Option<&str>) -> Result<&str> {
    match device_id {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(FallError::InvalidArgument("deviceId required".to_string())),
    }
}

#[derive(Debug)]
pub struct DeviceRegistry {
    config: RegistryConfig,
    detectors: RwLock<HashMap<String, SharedDetector>>,
}

impl DeviceRegistry {
    pub fn new(config: RegistryConfig) -> Result<Self> {
        config.detector.validate()?;
        if let Some(ttl) = config.idle_ttl_ms {
            if !ttl.is_finite() || ttl <= 0.0 {
                return Err(FallError::InvalidConfig(format!(
                    "idleTtlMs must be a positive number of milliseconds, got {ttl}"
                )));
            }
        }
        Ok(Self {
            config,
            detectors: RwLock::new(HashMap::new()),
        })
    }

    /// Detector for `device_id`, created on first use.
    pub fn get_or_create(&self, device_id: &str) -> Result<SharedDetector> {
        let id = require_device_id(Some(device_id))?;

        if let Some(detector) = self.detectors.read().get(id) {
            return Ok(Arc::clone(detector));
        }

        let mut detectors = self.detectors.write();
        match detectors.entry(id.to_string()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let detector = Detector::with_config(self.config.detector.clone())?;
                info!("created detector for device={id}");
                Ok(Arc::clone(entry.insert(Arc::new(Mutex::new(detector)))))
            }
        }
    }

    /// Run `f` on the detector for `device_id` while holding its lock.
    ///
    /// If a reset or sweep removed the detector between lookup and lock, the
    /// lookup is repeated, so `f` never runs on a detector the map no longer
    /// holds.
    pub fn with_detector<T>(&self, device_id: &str, f: impl FnOnce(&mut Detector) -> T) -> Result<T> {
        loop {
            let shared = self.get_or_create(device_id)?;
            let mut detector = shared.lock();
            let live = self
                .detectors
                .read()
                .get(device_id)
                .is_some_and(|current| Arc::ptr_eq(current, &shared));
            if live {
                return Ok(f(&mut detector));
            }
            debug!("detector for device={device_id} was removed before use, retrying");
        }
    }

    /// Drop the detector for `device_id`. Returns whether one existed.
    pub fn reset(&self, device_id: &str) -> Result<bool> {
        let id = require_device_id(Some(device_id))?;
        let removed = self.detectors.write().remove(id).is_some();
        if removed {
            info!("reset detector for device={id}");
        }
        Ok(removed)
    }

    /// Phase and last fall of `device_id`. Unknown devices get a fresh detector.
    pub fn query_state(&self, device_id: &str) -> Result<DeviceState> {
        let detector = self.get_or_create(device_id)?;
        let detector = detector.lock();
        Ok(DeviceState {
            phase: detector.phase(),
            last_fall_at: detector.last_fall_at(),
        })
    }

    /// Evict detectors whose last sample is older than `now - idle_ttl_ms`.
    /// Detectors that never saw a sample are evicted too; detectors locked by
    /// an in-flight request are kept. Returns the number removed; always 0
    /// when no TTL is configured.
    pub fn sweep(&self, now: f64) -> usize {
        let Some(ttl) = self.config.idle_ttl_ms else {
            return 0;
        };
        let cutoff = now - ttl;
        let mut detectors = self.detectors.write();
        let before = detectors.len();
        detectors.retain(|id, detector| {
            let keep = match detector.try_lock() {
                Some(detector) => detector.last_seen_at().is_some_and(|seen| seen >= cutoff),
                None => true,
            };
            if !keep {
                debug!("evicting idle detector for device={id}");
            }
            keep
        });
        before - detectors.len()
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.detectors.read().contains_key(device_id)
    }

    pub fn len(&self) -> usize {
        self.detectors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.read().is_empty()
    }

    /// Known device ids, sorted.
    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.detectors.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }
}
