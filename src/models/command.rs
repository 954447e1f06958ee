use serde::{Deserialize, Serialize};
use std::fmt;

/// Commands a user may send to the companion device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceCommand {
    Track,
    StartTracking,
    Stop,
    Immobilize,
    Unlock,
}

impl DeviceCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceCommand::Track => "TRACK",
            DeviceCommand::StartTracking => "START_TRACKING",
            DeviceCommand::Stop => "STOP",
            DeviceCommand::Immobilize => "IMMOBILIZE",
            DeviceCommand::Unlock => "UNLOCK",
        }
    }

    pub fn immobilization(immobilized: bool) -> Self {
        if immobilized {
            DeviceCommand::Immobilize
        } else {
            DeviceCommand::Unlock
        }
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn pair_command(vehicle_id: i64) -> String {
    format!("PAIR:{}", vehicle_id)
}

/// Wire format written to the per-device command slot.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CommandEnvelope {
    #[prost(string, tag = "1")]
    pub command_id: String,
    #[prost(string, tag = "2")]
    pub device_id: String,
    #[prost(string, tag = "3")]
    pub command: String,
    #[prost(int64, tag = "4")]
    pub issued_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchChannel {
    Primary,
    Sms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchState {
    Pending,
    Success,
    Timeout,
    PrimaryFailed,
    FallbackSent,
    FallbackSuccess,
    FallbackFailed,
    FallbackRefused,
    PermissionDenied,
}

/// Result of one logical command dispatch. Only logged, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub command_id: uuid::Uuid,
    pub device_id: Option<String>,
    pub command: String,
    pub channel: DispatchChannel,
    pub history: Vec<DispatchState>,
}

impl DispatchReport {
    pub fn outcome(&self) -> DispatchState {
        self.history
            .last()
            .copied()
            .unwrap_or(DispatchState::Pending)
    }

    pub fn sms_attempted(&self) -> bool {
        self.history.contains(&DispatchState::FallbackSent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_command_wire_names() {
        assert_eq!(DeviceCommand::StartTracking.as_str(), "START_TRACKING");
        assert_eq!(DeviceCommand::immobilization(false).as_str(), "UNLOCK");
        assert_eq!(pair_command(42), "PAIR:42");
        let parsed: DeviceCommand = serde_json::from_str("\"TRACK\"").unwrap();
        assert_eq!(parsed, DeviceCommand::Track);
    }

    #[test]
    fn test_envelope_encodes_command() {
        let envelope = CommandEnvelope {
            command_id: "c-1".to_string(),
            device_id: "deviceA".to_string(),
            command: "TRACK".to_string(),
            issued_at_ms: 1_700_000_000_000,
        };
        let bytes = envelope.encode_to_vec();
        let decoded = CommandEnvelope::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded.device_id, "deviceA");
        assert_eq!(decoded.command, "TRACK");
    }
}
