use thiserror::Error;

/// Errors surfaced by the detector and the layers built on it.
///
/// Malformed numeric telemetry is deliberately absent here: such fields are
/// read as missing and never abort processing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FallError {
    /// A required request field (the device id) is missing or empty.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Detector configuration rejected at construction.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An aggregate evaluated to a non-finite value. The detector keeps its state.
    #[error("internal error: {0}")]
    Internal(String),
}

impl FallError {
    /// Whether the caller sent a bad request, as opposed to a server-side fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, FallError::InvalidArgument(_))
    }
}

pub type Result<T> = std::result::Result<T, FallError>;

/// Rejects NaN and infinities produced while aggregating a window.
pub(crate) fn finite(what: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(FallError::Internal(format!("{what} is not finite ({value})")))
    }
}
