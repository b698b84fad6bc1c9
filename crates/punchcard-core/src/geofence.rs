//! Circular geofence around an approved capture location.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::GeoPoint;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Admin-managed geofence settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeofenceConfig {
    pub enabled: bool,
    pub center: Option<GeoPoint>,
    pub radius_m: Option<f64>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeofenceError {
    #[error("geofence center is not a valid coordinate: ({0}, {1})")]
    InvalidCenter(f64, f64),
    #[error("geofence radius must be a positive number of meters, got {0}")]
    InvalidRadius(f64),
}

impl GeofenceConfig {
    /// An enabled geofence with the given center and radius.
    pub fn around(center: GeoPoint, radius_m: f64) -> Self {
        Self {
            enabled: true,
            center: Some(center),
            radius_m: Some(radius_m),
        }
    }

    /// Check admin input before it is stored. An incomplete config is
    /// accepted (it simply blocks capture), a nonsensical one is not.
    pub fn check(&self) -> Result<(), GeofenceError> {
        if let Some(center) = self.center {
            if !center.is_valid() {
                return Err(GeofenceError::InvalidCenter(center.latitude, center.longitude));
            }
        }
        if let Some(radius) = self.radius_m {
            if !(radius.is_finite() && radius > 0.0) {
                return Err(GeofenceError::InvalidRadius(radius));
            }
        }
        Ok(())
    }
}

/// Result of checking a device position against the geofence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GeofenceDecision {
    Allowed { distance_m: f64 },
    Denied { distance_m: f64 },
    /// Disabled or incomplete configuration. Capture must be blocked.
    NotConfigured,
}

impl GeofenceDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GeofenceDecision::Allowed { .. })
    }
}

/// Great-circle distance between two points (Haversine).
pub fn haversine_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Decide whether capture is permitted at `point`.
///
/// Points exactly on the boundary are allowed.
pub fn validate(point: GeoPoint, config: &GeofenceConfig) -> GeofenceDecision {
    let (true, Some(center), Some(radius)) = (config.enabled, config.center, config.radius_m) else {
        return GeofenceDecision::NotConfigured;
    };

    let distance_m = haversine_distance(point, center);
    if distance_m <= radius {
        GeofenceDecision::Allowed { distance_m }
    } else {
        GeofenceDecision::Denied { distance_m }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOP: GeoPoint = GeoPoint {
        latitude: 23.8103,
        longitude: 90.4125,
    };

    /// Point `meters` due north of `origin`.
    fn north_of(origin: GeoPoint, meters: f64) -> GeoPoint {
        GeoPoint::new(
            origin.latitude + (meters / EARTH_RADIUS_M).to_degrees(),
            origin.longitude,
        )
    }

    #[test]
    fn test_haversine_zero_distance() {
        assert_eq!(haversine_distance(SHOP, SHOP), 0.0);
    }

    #[test]
    fn test_haversine_along_meridian() {
        let p = north_of(SHOP, 250.0);
        assert!((haversine_distance(SHOP, p) - 250.0).abs() < 1e-3);
    }

    #[test]
    fn test_haversine_known_city_pair() {
        // Dhaka to Chittagong is roughly 215 km great-circle.
        let chittagong = GeoPoint::new(22.3569, 91.7832);
        let d = haversine_distance(SHOP, chittagong);
        assert!((200_000.0..230_000.0).contains(&d), "got {d}");
    }

    #[test]
    fn test_point_on_boundary_is_allowed() {
        let p = north_of(SHOP, 100.0);
        let radius = haversine_distance(p, SHOP);
        let decision = validate(p, &GeofenceConfig::around(SHOP, radius));
        assert!(decision.is_allowed(), "{decision:?}");
    }

    #[test]
    fn test_one_meter_beyond_radius_is_denied() {
        let p = north_of(SHOP, 101.0);
        match validate(p, &GeofenceConfig::around(SHOP, 100.0)) {
            GeofenceDecision::Denied { distance_m } => assert!(distance_m > 100.0),
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[test]
    fn test_disabled_is_not_configured() {
        let mut config = GeofenceConfig::around(SHOP, 100.0);
        config.enabled = false;
        assert_eq!(validate(SHOP, &config), GeofenceDecision::NotConfigured);
    }

    #[test]
    fn test_incomplete_is_not_configured() {
        let config = GeofenceConfig {
            enabled: true,
            center: Some(SHOP),
            radius_m: None,
        };
        assert_eq!(validate(SHOP, &config), GeofenceDecision::NotConfigured);

        let config = GeofenceConfig {
            enabled: true,
            center: None,
            radius_m: Some(50.0),
        };
        assert_eq!(validate(SHOP, &config), GeofenceDecision::NotConfigured);
    }

    #[test]
    fn test_check_rejects_bad_settings() {
        assert!(GeofenceConfig::around(SHOP, 50.0).check().is_ok());
        assert!(GeofenceConfig::default().check().is_ok());
        assert_eq!(
            GeofenceConfig::around(SHOP, 0.0).check(),
            Err(GeofenceError::InvalidRadius(0.0))
        );
        assert!(GeofenceConfig::around(GeoPoint::new(95.0, 0.0), 10.0)
            .check()
            .is_err());
    }
}
