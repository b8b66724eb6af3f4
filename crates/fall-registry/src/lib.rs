//! # Fall Registry
//!
//! Owns one detector per device and exposes the three request-level
//! operations a transport needs: ingest telemetry, query state, reset.
//! Falls are handed to every registered [`FallNotifier`].

pub mod monitor;
pub mod notify;
pub mod registry;

pub use monitor::{ErrorResponse, FallMonitor, ResetResponse, StateResponse, TelemetryResponse};
pub use notify::{BackgroundNotifier, ChannelNotifier, FallNotice, FallNotifier, LogNotifier};
pub use registry::{require_device_id, DeviceRegistry, DeviceState, RegistryConfig, SharedDetector};
