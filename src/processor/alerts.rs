use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::dispatch::dispatcher::CommandDispatcher;
use crate::models::command::DispatchState;
use crate::processor::session::GeofenceAlert;

/// Delivers geofence alerts by SMS. Failures are logged and never reach the
/// sessions that raised them.
pub async fn run_alert_worker(
    mut alerts: mpsc::Receiver<GeofenceAlert>,
    dispatcher: Arc<CommandDispatcher>,
) {
    while let Some(alert) = alerts.recv().await {
        let state = dispatcher
            .send_alert(&alert.phone_number, &alert.message())
            .await;
        match state {
            DispatchState::FallbackSuccess => info!(
                vehicle_id = %alert.vehicle_id,
                distance = alert.distance_meters,
                lat = alert.sample.latitude,
                lng = alert.sample.longitude,
                "geofence alert delivered"
            ),
            other => warn!(
                vehicle_id = %alert.vehicle_id,
                distance = alert.distance_meters,
                state = ?other,
                "geofence alert not delivered"
            ),
        }
    }
    info!("alert worker stopped");
}
