//! Quota value type and validation.

use thiserror::Error;

/// Errors raised when constructing a quota from raw values.
///
/// Callers map this to the crate error that fits the surface: request paths
/// report `InvalidInput`, administrative paths report `InvalidConfig`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuotaError {
    #[error("max_requests must be positive")]
    NonPositiveLimit,
    #[error("window_duration_seconds must be positive")]
    NonPositiveWindow,
}

/// An admission rate: at most `max_requests` admits per sliding window.
///
/// Both fields are validated at construction, so a `Quota` in hand is
/// always enforceable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quota {
    max_requests: u32,
    window_seconds: f64,
}

impl Quota {
    /// Create a quota, rejecting non-positive values.
    pub fn new(max_requests: u32, window_seconds: f64) -> Result<Self, QuotaError> {
        if max_requests == 0 {
            return Err(QuotaError::NonPositiveLimit);
        }
        if !(window_seconds > 0.0) || !window_seconds.is_finite() {
            return Err(QuotaError::NonPositiveWindow);
        }

        Ok(Self {
            max_requests,
            window_seconds,
        })
    }

    /// Maximum admits per window.
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Window duration in seconds.
    pub fn window_seconds(&self) -> f64 {
        self.window_seconds
    }
}

impl std::fmt::Display for Quota {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}s", self.max_requests, self.window_seconds)
    }
}
