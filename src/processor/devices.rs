use serde::Serialize;
use std::collections::HashMap;

use crate::models::message::DeviceStatus;

/// Last status a companion device reported.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub online: bool,
    pub last_seen: Option<i64>,
    pub reported_at_ms: i64,
}

/// Companion devices seen on the status feed since startup.
#[derive(Debug, Default)]
pub struct DeviceDirectory {
    devices: HashMap<String, DeviceInfo>,
}

impl DeviceDirectory {
    pub fn record(&mut self, device_id: &str, status: &DeviceStatus, online: bool, now_ms: i64) {
        self.devices.insert(
            device_id.to_string(),
            DeviceInfo {
                device_id: device_id.to_string(),
                online,
                last_seen: status.last_seen,
                reported_at_ms: now_ms,
            },
        );
    }

    pub fn get(&self, device_id: &str) -> Option<&DeviceInfo> {
        self.devices.get(device_id)
    }

    /// Online devices, ordered by id.
    pub fn available(&self) -> Vec<DeviceInfo> {
        let mut online: Vec<DeviceInfo> = self
            .devices
            .values()
            .filter(|d| d.online)
            .cloned()
            .collect();
        online.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        online
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_lists_online_devices_only() {
        let mut directory = DeviceDirectory::default();
        let status = DeviceStatus::default();
        directory.record("deviceB", &status, true, 10);
        directory.record("deviceA", &status, true, 11);
        directory.record("deviceC", &status, false, 12);

        let ids: Vec<String> = directory
            .available()
            .into_iter()
            .map(|d| d.device_id)
            .collect();
        assert_eq!(ids, vec!["deviceA", "deviceB"]);

        directory.record("deviceA", &status, false, 20);
        assert_eq!(directory.available().len(), 1);
        assert_eq!(directory.get("deviceA").unwrap().reported_at_ms, 20);
        assert!(directory.get("deviceZ").is_none());
    }
}
