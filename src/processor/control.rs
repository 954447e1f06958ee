use serde::Deserialize;
use thiserror::Error;

use crate::models::command::DeviceCommand;

/// Requests published on the control topic, tagged by `action`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlRequest {
    RegisterVehicle {
        nickname: String,
        phone_number: String,
    },
    OpenSession {
        vehicle_id: i64,
    },
    CloseSession {
        vehicle_id: i64,
    },
    PairDevice {
        vehicle_id: i64,
        device_id: String,
    },
    UnpairDevice {
        vehicle_id: i64,
    },
    SetImmobilized {
        vehicle_id: i64,
        immobilized: bool,
    },
    SendCommand {
        vehicle_id: i64,
        command: DeviceCommand,
    },
    EnableGeofence {
        vehicle_id: i64,
        radius_meters: Option<f64>,
        center_latitude: Option<f64>,
        center_longitude: Option<f64>,
    },
    SetGeofenceRadius {
        vehicle_id: i64,
        radius_meters: f64,
    },
    DisableGeofence {
        vehicle_id: i64,
    },
    ClearHistory {
        vehicle_id: i64,
    },
    TripHistory {
        vehicle_id: i64,
        #[serde(default = "default_history_limit")]
        limit: i64,
    },
    ListDevices,
}

fn default_history_limit() -> i64 {
    100
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("invalid control request: {0}")]
    Invalid(#[from] serde_json::Error),
    #[error("vehicle {0} not found")]
    UnknownVehicle(i64),
    #[error("vehicle {0} has no open session")]
    NoSession(i64),
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl ControlRequest {
    pub fn parse(payload: &[u8]) -> Result<Self, ControlError> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn vehicle_id(&self) -> Option<i64> {
        match self {
            ControlRequest::RegisterVehicle { .. } | ControlRequest::ListDevices => None,
            ControlRequest::OpenSession { vehicle_id }
            | ControlRequest::CloseSession { vehicle_id }
            | ControlRequest::PairDevice { vehicle_id, .. }
            | ControlRequest::UnpairDevice { vehicle_id }
            | ControlRequest::SetImmobilized { vehicle_id, .. }
            | ControlRequest::SendCommand { vehicle_id, .. }
            | ControlRequest::EnableGeofence { vehicle_id, .. }
            | ControlRequest::SetGeofenceRadius { vehicle_id, .. }
            | ControlRequest::DisableGeofence { vehicle_id }
            | ControlRequest::ClearHistory { vehicle_id }
            | ControlRequest::TripHistory { vehicle_id, .. } => Some(*vehicle_id),
        }
    }

    /// Geofence center, only when both coordinates are given.
    pub fn geofence_center(&self) -> Option<(f64, f64)> {
        match self {
            ControlRequest::EnableGeofence {
                center_latitude: Some(lat),
                center_longitude: Some(lng),
                ..
            } => Some((*lat, *lng)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_requests() {
        let request =
            ControlRequest::parse(br#"{"action": "send_command", "vehicle_id": 4, "command": "START_TRACKING"}"#)
                .unwrap();
        assert_eq!(
            request,
            ControlRequest::SendCommand {
                vehicle_id: 4,
                command: DeviceCommand::StartTracking
            }
        );
        assert_eq!(request.vehicle_id(), Some(4));

        let request = ControlRequest::parse(
            br#"{"action": "enable_geofence", "vehicle_id": 4, "center_latitude": 14.6, "center_longitude": 120.98}"#,
        )
        .unwrap();
        assert_eq!(request.geofence_center(), Some((14.6, 120.98)));

        let request =
            ControlRequest::parse(br#"{"action": "enable_geofence", "vehicle_id": 4, "center_latitude": 14.6}"#)
                .unwrap();
        assert_eq!(request.geofence_center(), None);

        let request = ControlRequest::parse(br#"{"action": "trip_history", "vehicle_id": 2}"#).unwrap();
        assert_eq!(
            request,
            ControlRequest::TripHistory {
                vehicle_id: 2,
                limit: 100
            }
        );

        let request = ControlRequest::parse(br#"{"action": "list_devices"}"#).unwrap();
        assert_eq!(request, ControlRequest::ListDevices);
        assert_eq!(request.vehicle_id(), None);
    }

    #[test]
    fn test_rejects_unknown_action_and_command() {
        assert!(matches!(
            ControlRequest::parse(br#"{"action": "self_destruct", "vehicle_id": 1}"#),
            Err(ControlError::Invalid(_))
        ));
        assert!(ControlRequest::parse(
            br#"{"action": "send_command", "vehicle_id": 1, "command": "PAIR:1"}"#
        )
        .is_err());
    }
}
