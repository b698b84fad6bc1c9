//! Device geolocation.

use std::time::Duration;

use punchcard_core::GeoPoint;
use thiserror::Error;

/// Default bound on a single position fix.
pub const DEFAULT_LOCATION_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("position unavailable: {0}")]
    Unavailable(String),
    #[error("no position fix within {0:?}")]
    Timeout(Duration),
    #[error("geolocation not supported on this device")]
    Unsupported,
}

/// Single-shot position source.
pub trait LocationProvider: Send {
    fn locate(&mut self, timeout: Duration) -> Result<GeoPoint, LocationError>;
}

/// Operator-configured coordinates (fixed kiosk installations).
pub struct FixedLocation(pub GeoPoint);

impl LocationProvider for FixedLocation {
    fn locate(&mut self, _timeout: Duration) -> Result<GeoPoint, LocationError> {
        if self.0.is_valid() {
            Ok(self.0)
        } else {
            Err(LocationError::Unavailable(format!(
                "invalid configured coordinate ({}, {})",
                self.0.latitude, self.0.longitude
            )))
        }
    }
}

/// Device without any position source.
pub struct NoLocation;

impl LocationProvider for NoLocation {
    fn locate(&mut self, _timeout: Duration) -> Result<GeoPoint, LocationError> {
        Err(LocationError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_location() {
        let mut provider = FixedLocation(GeoPoint::new(23.81, 90.41));
        assert_eq!(
            provider.locate(DEFAULT_LOCATION_TIMEOUT),
            Ok(GeoPoint::new(23.81, 90.41))
        );
    }

    #[test]
    fn test_fixed_location_rejects_invalid() {
        let mut provider = FixedLocation(GeoPoint::new(123.0, 0.0));
        assert!(matches!(
            provider.locate(DEFAULT_LOCATION_TIMEOUT),
            Err(LocationError::Unavailable(_))
        ));
    }

    #[test]
    fn test_no_location_is_unsupported() {
        assert_eq!(
            NoLocation.locate(DEFAULT_LOCATION_TIMEOUT),
            Err(LocationError::Unsupported)
        );
    }
}
