//! In-memory `TrackingStore` for tests.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::store::TrackingStore;
use crate::models::trip_history::{TripHistoryPoint, TripPointDraft};
use crate::models::vehicle::{test_vehicle, Vehicle};

#[derive(Default)]
pub struct MemoryState {
    pub vehicles: HashMap<i64, Vehicle>,
    pub history: Vec<TripHistoryPoint>,
    pub batches: Vec<Vec<TripPointDraft>>,
    pub connection_updates: Vec<(i64, bool)>,
    pub failing_appends: usize,
    next_vehicle_id: i64,
    next_point_id: i64,
}

pub struct MemoryStore {
    pub state: Mutex<MemoryState>,
    retention: usize,
}

impl MemoryStore {
    pub fn new(retention: usize) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            retention,
        }
    }

    pub async fn insert_vehicle(&self, vehicle: Vehicle) {
        let mut state = self.state.lock().await;
        state.next_vehicle_id = state.next_vehicle_id.max(vehicle.id);
        state.vehicles.insert(vehicle.id, vehicle);
    }

    /// Makes the next `count` batch writes fail.
    pub async fn fail_appends(&self, count: usize) {
        self.state.lock().await.failing_appends = count;
    }
}

#[async_trait]
impl TrackingStore for MemoryStore {
    async fn register_vehicle(&self, nickname: &str, phone_number: &str) -> Result<Vehicle> {
        let mut state = self.state.lock().await;
        state.next_vehicle_id += 1;
        let mut vehicle = test_vehicle(state.next_vehicle_id, None);
        vehicle.nickname = nickname.to_string();
        vehicle.phone_number = phone_number.to_string();
        state.vehicles.insert(vehicle.id, vehicle.clone());
        Ok(vehicle)
    }

    async fn vehicle(&self, vehicle_id: i64) -> Result<Option<Vehicle>> {
        Ok(self.state.lock().await.vehicles.get(&vehicle_id).cloned())
    }

    async fn vehicle_by_device(&self, device_id: &str) -> Result<Option<Vehicle>> {
        let state = self.state.lock().await;
        Ok(state
            .vehicles
            .values()
            .find(|v| v.device_id.as_deref() == Some(device_id))
            .cloned())
    }

    async fn set_device_id(&self, vehicle_id: i64, device_id: Option<&str>) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(device) = device_id {
            if state
                .vehicles
                .values()
                .any(|v| v.id != vehicle_id && v.device_id.as_deref() == Some(device))
            {
                bail!("device {} is already paired", device);
            }
        }
        if let Some(v) = state.vehicles.get_mut(&vehicle_id) {
            v.device_id = device_id.map(str::to_string);
        }
        Ok(())
    }

    async fn set_immobilized(&self, vehicle_id: i64, immobilized: bool) -> Result<()> {
        if let Some(v) = self.state.lock().await.vehicles.get_mut(&vehicle_id) {
            v.is_immobilized = immobilized;
        }
        Ok(())
    }

    async fn update_connection_status(
        &self,
        vehicle_id: i64,
        online: bool,
        at_ms: i64,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.connection_updates.push((vehicle_id, online));
        if let Some(v) = state.vehicles.get_mut(&vehicle_id) {
            v.is_online = online;
            v.last_connection = at_ms;
        }
        Ok(())
    }

    async fn append_trip_points(&self, vehicle_id: i64, points: &[TripPointDraft]) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.failing_appends > 0 {
            state.failing_appends -= 1;
            bail!("simulated write failure");
        }
        let Some(last) = points.last() else {
            return Ok(());
        };

        for point in points {
            state.next_point_id += 1;
            let id = state.next_point_id;
            state.history.push(TripHistoryPoint {
                id,
                vehicle_id,
                latitude: point.sample.latitude,
                longitude: point.sample.longitude,
                timestamp: point.sample.timestamp,
                event_type: point.event_type.to_string(),
            });
        }
        state.batches.push(points.to_vec());

        if let Some(v) = state.vehicles.get_mut(&vehicle_id) {
            v.last_latitude = Some(last.sample.latitude);
            v.last_longitude = Some(last.sample.longitude);
            v.last_position_at = Some(last.sample.timestamp);
            v.last_position_source = Some(last.sample.source.as_str().to_string());
        }

        let kept = state
            .history
            .iter()
            .filter(|p| p.vehicle_id == vehicle_id)
            .count();
        if kept > self.retention {
            let mut excess = kept - self.retention;
            state.history.sort_by_key(|p| (p.timestamp, p.id));
            state.history.retain(|p| {
                if p.vehicle_id == vehicle_id && excess > 0 {
                    excess -= 1;
                    false
                } else {
                    true
                }
            });
        }
        Ok(())
    }

    async fn recent_history(&self, vehicle_id: i64, limit: i64) -> Result<Vec<TripHistoryPoint>> {
        let state = self.state.lock().await;
        let mut points: Vec<_> = state
            .history
            .iter()
            .filter(|p| p.vehicle_id == vehicle_id)
            .cloned()
            .collect();
        points.sort_by_key(|p| std::cmp::Reverse((p.timestamp, p.id)));
        points.truncate(limit.max(0) as usize);
        Ok(points)
    }

    async fn clear_history(&self, vehicle_id: i64) -> Result<u64> {
        let mut state = self.state.lock().await;
        let before = state.history.len();
        state.history.retain(|p| p.vehicle_id != vehicle_id);
        Ok((before - state.history.len()) as u64)
    }
}
