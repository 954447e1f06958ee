use serde::Serialize;
use sqlx::FromRow;

use super::position::{PositionSample, SampleSource};

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Vehicle {
    pub id: i64, // bigserial
    pub nickname: String,
    pub phone_number: String,
    pub device_id: Option<String>, // NULL when unpaired
    pub is_immobilized: bool,
    pub last_latitude: Option<f64>,
    pub last_longitude: Option<f64>,
    pub last_position_at: Option<i64>,
    pub last_position_source: Option<String>,
    pub is_online: bool,
    pub last_connection: i64,
}

impl Vehicle {
    /// Paired companion device, treating an empty id as unpaired.
    pub fn paired_device(&self) -> Option<&str> {
        self.device_id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn fallback_phone(&self) -> Option<&str> {
        Some(self.phone_number.as_str()).filter(|p| !p.trim().is_empty())
    }

    pub fn last_known_position(&self) -> Option<PositionSample> {
        let source = self
            .last_position_source
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(SampleSource::Realtime);
        Some(PositionSample::new(
            self.last_latitude?,
            self.last_longitude?,
            self.last_position_at?,
            source,
        ))
    }
}

#[cfg(test)]
pub fn test_vehicle(id: i64, device_id: Option<&str>) -> Vehicle {
    Vehicle {
        id,
        nickname: format!("vehicle-{}", id),
        phone_number: "+15550001111".to_string(),
        device_id: device_id.map(str::to_string),
        is_immobilized: false,
        last_latitude: None,
        last_longitude: None,
        last_position_at: None,
        last_position_source: None,
        is_online: false,
        last_connection: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_known_position_requires_all_fields() {
        let mut vehicle = test_vehicle(1, Some(""));
        assert!(vehicle.paired_device().is_none());
        assert!(vehicle.last_known_position().is_none());

        vehicle.last_latitude = Some(14.5995);
        vehicle.last_longitude = Some(120.9842);
        assert!(vehicle.last_known_position().is_none());

        vehicle.last_position_at = Some(1_000);
        vehicle.last_position_source = Some("SMS".to_string());
        let position = vehicle.last_known_position().unwrap();
        assert_eq!(position.timestamp, 1_000);
        assert_eq!(position.source, SampleSource::Sms);
    }
}
