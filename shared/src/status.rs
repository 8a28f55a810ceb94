//! Status-service seam for telescope telemetry scalars.
//!
//! Queries degrade to a NaN "unknown" sentinel instead of failing the phase;
//! the operator can always key the value in by hand.

use std::collections::HashMap;
use thiserror::Error;

/// A status item that could not be fetched.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("status item {name} unavailable: {reason}")]
pub struct StatusError {
    /// The queried item name
    pub name: String,
    /// Service-reported reason
    pub reason: String,
}

/// Provider of named telemetry scalars.
pub trait StatusService: Send + Sync {
    /// Fetch one scalar by name.
    fn fetch_scalar(&self, name: &str) -> Result<f64, StatusError>;
}

/// Fetch a scalar, degrading to the NaN sentinel on failure.
pub fn scalar_or_unknown(service: &dyn StatusService, name: &str) -> f64 {
    match service.fetch_scalar(name) {
        Ok(value) => value,
        Err(e) => {
            log::warn!("status query failed, value unknown: {e}");
            f64::NAN
        }
    }
}

/// Fixed-value status service for tests and harnesses.
#[derive(Debug, Default)]
pub struct StaticStatusService {
    values: HashMap<String, f64>,
}

impl StaticStatusService {
    /// Create an empty service; every query fails.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the value returned for `name`.
    pub fn set(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_string(), value);
    }
}

impl StatusService for StaticStatusService {
    fn fetch_scalar(&self, name: &str) -> Result<f64, StatusError> {
        self.values
            .get(name)
            .copied()
            .ok_or_else(|| StatusError {
                name: name.to_string(),
                reason: "no such item".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_scalar_is_returned() {
        let mut service = StaticStatusService::new();
        service.set("TSCS.EL", 63.2);

        assert_eq!(scalar_or_unknown(&service, "TSCS.EL"), 63.2);
    }

    #[test]
    fn test_unknown_scalar_degrades_to_nan() {
        let service = StaticStatusService::new();
        assert!(scalar_or_unknown(&service, "TSCS.EL").is_nan());
    }
}
