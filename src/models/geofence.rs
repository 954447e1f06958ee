use serde::{Deserialize, Serialize};

/// Circular virtual boundary, held for the lifetime of a vehicle session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeofenceConfig {
    pub center_latitude: f64,
    pub center_longitude: f64,
    pub radius_meters: f64,
    pub enabled: bool,
}

impl GeofenceConfig {
    pub fn new(center_latitude: f64, center_longitude: f64, radius_meters: f64) -> Self {
        Self {
            center_latitude,
            center_longitude,
            radius_meters,
            enabled: true,
        }
    }
}
