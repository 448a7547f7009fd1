//! Location provider seam.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LocationError {
    #[error("no fix within the request timeout")]
    Timeout,
    #[error("location is currently unavailable")]
    Unavailable,
    #[error("location permission denied")]
    PermissionDenied,
}

impl LocationError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, LocationError::PermissionDenied)
    }
}

/// Raw reading returned by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: f64,
    pub source_id: String,
}

impl Fix {
    pub fn new(latitude: f64, longitude: f64, accuracy_m: f64, source_id: impl Into<String>) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_m,
            source_id: source_id.into(),
        }
    }

    /// Finite coordinates inside WGS84 bounds and a non-negative accuracy.
    pub fn is_plausible(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.accuracy_m.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
            && self.accuracy_m >= 0.0
    }
}

/// Supplies one fix on demand.
///
/// Implementations should honour `timeout`; the tracker also drops the request future
/// once the deadline passes, which cancels whatever the provider was awaiting.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn request_fix(&self, timeout: Duration) -> Result<Fix, LocationError>;
}
