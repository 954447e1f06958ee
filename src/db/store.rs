use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::queries;
use super::DbPool;
use crate::models::trip_history::{TripHistoryPoint, TripPointDraft};
use crate::models::vehicle::Vehicle;

/// Durable state behind vehicle sessions and control requests.
#[async_trait]
pub trait TrackingStore: Send + Sync + 'static {
    async fn register_vehicle(&self, nickname: &str, phone_number: &str) -> Result<Vehicle>;

    async fn vehicle(&self, vehicle_id: i64) -> Result<Option<Vehicle>>;

    async fn vehicle_by_device(&self, device_id: &str) -> Result<Option<Vehicle>>;

    async fn set_device_id(&self, vehicle_id: i64, device_id: Option<&str>) -> Result<()>;

    async fn set_immobilized(&self, vehicle_id: i64, immobilized: bool) -> Result<()>;

    async fn update_connection_status(&self, vehicle_id: i64, online: bool, at_ms: i64)
        -> Result<()>;

    /// Writes the whole batch atomically, moves the vehicle's last-position
    /// summary to the final point and trims history to the retention limit.
    async fn append_trip_points(&self, vehicle_id: i64, points: &[TripPointDraft]) -> Result<()>;

    async fn recent_history(&self, vehicle_id: i64, limit: i64) -> Result<Vec<TripHistoryPoint>>;

    async fn clear_history(&self, vehicle_id: i64) -> Result<u64>;
}

pub struct PgStore {
    pool: DbPool,
    retention: i64,
}

impl PgStore {
    pub fn new(pool: DbPool, retention: i64) -> Self {
        Self { pool, retention }
    }
}

#[async_trait]
impl TrackingStore for PgStore {
    async fn register_vehicle(&self, nickname: &str, phone_number: &str) -> Result<Vehicle> {
        let vehicle = sqlx::query_as::<_, Vehicle>(queries::INSERT_VEHICLE)
            .bind(nickname)
            .bind(phone_number)
            .fetch_one(&self.pool)
            .await?;
        Ok(vehicle)
    }

    async fn vehicle(&self, vehicle_id: i64) -> Result<Option<Vehicle>> {
        let vehicle = sqlx::query_as::<_, Vehicle>(queries::SELECT_VEHICLE)
            .bind(vehicle_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(vehicle)
    }

    async fn vehicle_by_device(&self, device_id: &str) -> Result<Option<Vehicle>> {
        let vehicle = sqlx::query_as::<_, Vehicle>(queries::SELECT_VEHICLE_BY_DEVICE)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(vehicle)
    }

    async fn set_device_id(&self, vehicle_id: i64, device_id: Option<&str>) -> Result<()> {
        sqlx::query(queries::UPDATE_DEVICE_ID)
            .bind(vehicle_id)
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_immobilized(&self, vehicle_id: i64, immobilized: bool) -> Result<()> {
        sqlx::query(queries::UPDATE_IMMOBILIZED)
            .bind(vehicle_id)
            .bind(immobilized)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_connection_status(
        &self,
        vehicle_id: i64,
        online: bool,
        at_ms: i64,
    ) -> Result<()> {
        sqlx::query(queries::UPDATE_CONNECTION_STATUS)
            .bind(vehicle_id)
            .bind(online)
            .bind(at_ms)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_trip_points(&self, vehicle_id: i64, points: &[TripPointDraft]) -> Result<()> {
        let Some(last) = points.last() else {
            return Ok(());
        };

        let mut tx = self.pool.begin().await?;

        for point in points {
            sqlx::query(queries::INSERT_TRIP_POINT)
                .bind(vehicle_id)
                .bind(point.sample.latitude)
                .bind(point.sample.longitude)
                .bind(point.sample.timestamp)
                .bind(point.event_type)
                .execute(&mut *tx)
                .await
                .context("insert trip point")?;
        }

        sqlx::query(queries::UPDATE_LAST_POSITION)
            .bind(vehicle_id)
            .bind(last.sample.latitude)
            .bind(last.sample.longitude)
            .bind(last.sample.timestamp)
            .bind(last.sample.source.as_str())
            .execute(&mut *tx)
            .await
            .context("update last position")?;

        let trimmed = sqlx::query(queries::TRIM_HISTORY)
            .bind(vehicle_id)
            .bind(self.retention)
            .execute(&mut *tx)
            .await
            .context("trim history")?
            .rows_affected();

        tx.commit().await?;

        debug!(
            vehicle_id = %vehicle_id,
            points = points.len(),
            trimmed = trimmed,
            "trip points committed"
        );
        Ok(())
    }

    async fn recent_history(&self, vehicle_id: i64, limit: i64) -> Result<Vec<TripHistoryPoint>> {
        let points = sqlx::query_as::<_, TripHistoryPoint>(queries::SELECT_RECENT_HISTORY)
            .bind(vehicle_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(points)
    }

    async fn clear_history(&self, vehicle_id: i64) -> Result<u64> {
        let deleted = sqlx::query(queries::DELETE_HISTORY)
            .bind(vehicle_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted)
    }
}
