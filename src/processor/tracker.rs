use anyhow::anyhow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::TrackingSettings;
use crate::db::store::TrackingStore;
use crate::dispatch::allow_list::{mask_number, matches_number};
use crate::dispatch::dispatcher::CommandDispatcher;
use crate::models::command::{pair_command, DeviceCommand, DispatchState};
use crate::models::message::{self, InboundSms, SmsEvent};
use crate::models::position::now_millis;
use crate::models::trip_history::TripHistoryPoint;
use crate::models::vehicle::Vehicle;
use crate::processor::control::{ControlError, ControlRequest};
use crate::processor::devices::{DeviceDirectory, DeviceInfo};
use crate::processor::live_view::LiveViewSink;
use crate::processor::registry::SessionRegistry;
use crate::processor::session::{GeofenceAlert, GeofenceRequest, SessionInput};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Location,
    DeviceStatus,
    Control,
    InboundSms,
}

#[derive(Debug)]
pub enum ControlOutcome {
    Registered(Vehicle),
    SessionOpened(i64),
    SessionClosed(i64),
    Updated(i64),
    Dispatching(JoinHandle<()>),
    HistoryCleared(u64),
    History(Vec<TripHistoryPoint>),
    Devices(Vec<DeviceInfo>),
}

impl ControlOutcome {
    fn log(&self) {
        match self {
            ControlOutcome::Registered(vehicle) => debug!(
                vehicle_id = %vehicle.id,
                phone = %mask_number(&vehicle.phone_number),
                "vehicle registered"
            ),
            ControlOutcome::SessionOpened(vehicle_id) => {
                debug!(vehicle_id = %vehicle_id, "session opened on request")
            }
            ControlOutcome::SessionClosed(vehicle_id) => {
                debug!(vehicle_id = %vehicle_id, "session closed on request")
            }
            ControlOutcome::Updated(vehicle_id) => debug!(vehicle_id = %vehicle_id, "vehicle updated"),
            ControlOutcome::Dispatching(task) => {
                debug!(finished = task.is_finished(), "command dispatch started")
            }
            ControlOutcome::HistoryCleared(deleted) => debug!(deleted, "trip history cleared"),
            ControlOutcome::History(points) => debug!(points = points.len(), "trip history read"),
            ControlOutcome::Devices(devices) => info!(
                available = devices.len(),
                devices = ?devices.iter().map(|d| d.device_id.as_str()).collect::<Vec<_>>(),
                "Available companion devices"
            ),
        }
    }
}

/// Routes every inbound feed message to the owning vehicle session, in order.
pub struct Tracker<S: ?Sized> {
    store: Arc<S>,
    registry: SessionRegistry<S>,
    devices: DeviceDirectory,
    dispatcher: Arc<CommandDispatcher>,
    tracking: TrackingSettings,
    command_timeout: Duration,
}

impl<S: TrackingStore + ?Sized> Tracker<S> {
    pub fn new(
        store: Arc<S>,
        dispatcher: Arc<CommandDispatcher>,
        tracking: TrackingSettings,
        command_timeout: Duration,
        alerts: mpsc::Sender<GeofenceAlert>,
    ) -> Self {
        let registry = SessionRegistry::new(store.clone(), tracking.clone(), alerts);
        Self {
            store,
            registry,
            devices: DeviceDirectory::default(),
            dispatcher,
            tracking,
            command_timeout,
        }
    }

    pub fn with_live_view_sink(mut self, sink: Arc<dyn LiveViewSink>) -> Self {
        self.registry = self.registry.with_live_view_sink(sink);
        self
    }

    pub fn registry(&self) -> &SessionRegistry<S> {
        &self.registry
    }

    pub async fn handle(
        &mut self,
        kind: FeedKind,
        key: Option<&str>,
        payload: &[u8],
    ) -> anyhow::Result<()> {
        match kind {
            FeedKind::Location => self.on_location(key, payload).await,
            FeedKind::DeviceStatus => self.on_device_status(key, payload).await,
            FeedKind::InboundSms => self.on_inbound_sms(payload).await,
            FeedKind::Control => {
                let request = match ControlRequest::parse(payload) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!("Skipping control message: {}", e);
                        return Ok(());
                    }
                };
                let vehicle_id = request.vehicle_id();
                match self.apply(request).await {
                    Ok(outcome) => outcome.log(),
                    Err(e) => warn!(vehicle_id = ?vehicle_id, "control request failed: {}", e),
                }
                Ok(())
            }
        }
    }

    /// Releases sessions opened by feed traffic that went quiet.
    pub async fn evict_idle_sessions(&mut self) -> usize {
        self.registry.evict_idle().await
    }

    async fn on_location(&mut self, key: Option<&str>, payload: &[u8]) -> anyhow::Result<()> {
        let Some(device_id) = key.filter(|k| !k.is_empty()) else {
            warn!("Location update without device key, skipping");
            return Ok(());
        };

        let sample = match message::parse_location(payload, self.tracking.max_feed_fields) {
            Ok(sample) => sample,
            Err(e) => {
                warn!(device_id = %device_id, "Skipping location update: {}", e);
                return Ok(());
            }
        };

        match self.session_for_device(device_id).await? {
            Some(vehicle_id) => {
                self.registry
                    .send(vehicle_id, SessionInput::Sample(sample))
                    .await?;
            }
            None => warn!(device_id = %device_id, "Location update for unpaired device, skipping"),
        }
        Ok(())
    }

    async fn on_device_status(&mut self, key: Option<&str>, payload: &[u8]) -> anyhow::Result<()> {
        let Some(device_id) = key.filter(|k| !k.is_empty()) else {
            warn!("Device status without device key, skipping");
            return Ok(());
        };
        let status = match message::parse_device_status(payload) {
            Ok(status) => status,
            Err(e) => {
                warn!(device_id = %device_id, "Skipping device status: {}", e);
                return Ok(());
            }
        };

        let now = now_millis();
        let online = status.is_online(now, self.tracking.device_online_window_ms);
        self.devices.record(device_id, &status, online, now);

        if let Some(vehicle_id) = self.registry.vehicle_for_device(device_id) {
            self.registry
                .send(vehicle_id, SessionInput::DeviceStatus { online })
                .await?;
        } else if let Some(vehicle) = self.store.vehicle_by_device(device_id).await? {
            self.store
                .update_connection_status(vehicle.id, online, now)
                .await?;
        }
        Ok(())
    }

    async fn on_inbound_sms(&mut self, payload: &[u8]) -> anyhow::Result<()> {
        let sms: InboundSms = match serde_json::from_slice(payload) {
            Ok(sms) => sms,
            Err(e) => {
                warn!("Skipping inbound SMS: {}", e);
                return Ok(());
            }
        };

        match message::parse_sms_body(&sms.body) {
            SmsEvent::Location { vehicle_id, sample } => {
                let Some(vehicle) = self.store.vehicle(vehicle_id).await? else {
                    warn!(vehicle_id = %vehicle_id, "SMS location for unknown vehicle");
                    return Ok(());
                };
                if !matches_number(&sms.from, &vehicle.phone_number) {
                    warn!(
                        vehicle_id = %vehicle_id,
                        from = %mask_number(&sms.from),
                        "SMS location from a number not registered to the vehicle, dropped"
                    );
                    return Ok(());
                }
                self.registry.open(vehicle, false);
                self.registry
                    .send(vehicle_id, SessionInput::Sample(sample))
                    .await?;
            }
            SmsEvent::CompanionError(text) => {
                error!(from = %mask_number(&sms.from), "Error from companion: {}", text)
            }
            SmsEvent::Ignored => debug!(from = %mask_number(&sms.from), "Ignoring SMS"),
        }
        Ok(())
    }

    pub async fn apply(&mut self, request: ControlRequest) -> Result<ControlOutcome, ControlError> {
        let center = request.geofence_center();
        match request {
            ControlRequest::RegisterVehicle {
                nickname,
                phone_number,
            } => {
                if nickname.trim().is_empty() || phone_number.trim().is_empty() {
                    return Err(ControlError::Rejected(
                        "nickname and phone number are required".to_string(),
                    ));
                }
                let vehicle = self
                    .store
                    .register_vehicle(nickname.trim(), phone_number.trim())
                    .await?;
                info!(vehicle_id = %vehicle.id, "Registered vehicle {}", vehicle.nickname);
                Ok(ControlOutcome::Registered(vehicle))
            }
            ControlRequest::OpenSession { vehicle_id } => {
                let vehicle = self.require_vehicle(vehicle_id).await?;
                self.registry.open(vehicle, true);
                Ok(ControlOutcome::SessionOpened(vehicle_id))
            }
            ControlRequest::CloseSession { vehicle_id } => {
                if self.registry.close(vehicle_id).await {
                    Ok(ControlOutcome::SessionClosed(vehicle_id))
                } else {
                    Err(ControlError::NoSession(vehicle_id))
                }
            }
            ControlRequest::PairDevice {
                vehicle_id,
                device_id,
            } => {
                let device_id = device_id.trim().to_string();
                if device_id.is_empty() {
                    return Err(ControlError::Rejected("device id is required".to_string()));
                }
                self.require_vehicle(vehicle_id).await?;
                if let Some(owner) = self.store.vehicle_by_device(&device_id).await? {
                    if owner.id != vehicle_id {
                        return Err(ControlError::Rejected(format!(
                            "device {} is already paired with vehicle {}",
                            device_id, owner.id
                        )));
                    }
                }
                match self.devices.get(&device_id) {
                    Some(info) if info.online => {}
                    Some(_) => warn!(device_id = %device_id, "Pairing with a device that reports offline"),
                    None => warn!(device_id = %device_id, "Pairing with a device not seen on the status feed"),
                }

                self.store.set_device_id(vehicle_id, Some(&device_id)).await?;
                self.registry
                    .repair(vehicle_id, Some(device_id.clone()))
                    .await?;

                let dispatcher = self.dispatcher.clone();
                let handle = tokio::spawn(async move {
                    match dispatcher
                        .send_primary(&device_id, &pair_command(vehicle_id))
                        .await
                    {
                        Ok(()) => info!(vehicle_id = %vehicle_id, device_id = %device_id, "Paired with device"),
                        Err(e) => error!(vehicle_id = %vehicle_id, "Pairing command failed: {}", e),
                    }
                });
                Ok(ControlOutcome::Dispatching(handle))
            }
            ControlRequest::UnpairDevice { vehicle_id } => {
                self.require_vehicle(vehicle_id).await?;
                self.store.set_device_id(vehicle_id, None).await?;
                self.registry.repair(vehicle_id, None).await?;
                info!(vehicle_id = %vehicle_id, "Device unpaired");
                Ok(ControlOutcome::Updated(vehicle_id))
            }
            ControlRequest::SetImmobilized {
                vehicle_id,
                immobilized,
            } => {
                let mut vehicle = self.require_vehicle(vehicle_id).await?;
                self.store.set_immobilized(vehicle_id, immobilized).await?;
                vehicle.is_immobilized = immobilized;
                Ok(ControlOutcome::Dispatching(self.spawn_dispatch(
                    vehicle,
                    DeviceCommand::immobilization(immobilized),
                )))
            }
            ControlRequest::SendCommand {
                vehicle_id,
                command,
            } => {
                let vehicle = self.require_vehicle(vehicle_id).await?;
                Ok(ControlOutcome::Dispatching(self.spawn_dispatch(vehicle, command)))
            }
            ControlRequest::EnableGeofence {
                vehicle_id,
                radius_meters,
                ..
            } => {
                self.geofence(
                    vehicle_id,
                    GeofenceRequest::Enable {
                        center,
                        radius_meters,
                    },
                )
                .await
            }
            ControlRequest::SetGeofenceRadius {
                vehicle_id,
                radius_meters,
            } => {
                self.geofence(vehicle_id, GeofenceRequest::SetRadius(radius_meters))
                    .await
            }
            ControlRequest::DisableGeofence { vehicle_id } => {
                self.geofence(vehicle_id, GeofenceRequest::Disable).await
            }
            ControlRequest::ClearHistory { vehicle_id } => {
                self.require_vehicle(vehicle_id).await?;
                let deleted = if self.registry.get(vehicle_id).is_some() {
                    // the session writer drops its buffer before deleting
                    let (reply_tx, reply_rx) = oneshot::channel();
                    self.registry
                        .send(vehicle_id, SessionInput::ClearHistory(reply_tx))
                        .await?;
                    let result = reply_rx.await.map_err(|_| {
                        anyhow!("session for vehicle {} closed before clearing history", vehicle_id)
                    })?;
                    result?
                } else {
                    self.store.clear_history(vehicle_id).await?
                };
                info!(vehicle_id = %vehicle_id, deleted, "Trip history cleared");
                Ok(ControlOutcome::HistoryCleared(deleted))
            }
            ControlRequest::TripHistory { vehicle_id, limit } => {
                self.require_vehicle(vehicle_id).await?;
                let points = self.store.recent_history(vehicle_id, limit).await?;
                info!(
                    vehicle_id = %vehicle_id,
                    points = points.len(),
                    newest = ?points.first().map(|p| p.timestamp),
                    "Trip history loaded"
                );
                Ok(ControlOutcome::History(points))
            }
            ControlRequest::ListDevices => Ok(ControlOutcome::Devices(self.devices.available())),
        }
    }

    pub async fn shutdown(&mut self) {
        self.registry.shutdown().await;
    }

    /// Geofences live in the session, so configuring one pins it open.
    async fn geofence(
        &mut self,
        vehicle_id: i64,
        request: GeofenceRequest,
    ) -> Result<ControlOutcome, ControlError> {
        let vehicle = self.require_vehicle(vehicle_id).await?;
        self.registry.open(vehicle, true);
        self.registry
            .send(vehicle_id, SessionInput::Geofence(request))
            .await?;
        Ok(ControlOutcome::Updated(vehicle_id))
    }

    fn spawn_dispatch(&self, vehicle: Vehicle, command: DeviceCommand) -> JoinHandle<()> {
        let dispatcher = self.dispatcher.clone();
        let timeout = self.command_timeout;
        tokio::spawn(async move {
            let result = dispatcher
                .dispatch(
                    vehicle.paired_device(),
                    command.as_str(),
                    vehicle.fallback_phone(),
                    timeout,
                )
                .await;
            match result {
                Ok(report) => match report.outcome() {
                    DispatchState::Success | DispatchState::FallbackSuccess => info!(
                        vehicle_id = %vehicle.id,
                        command_id = %report.command_id,
                        command = %command,
                        channel = ?report.channel,
                        "Command dispatched"
                    ),
                    outcome => warn!(
                        vehicle_id = %vehicle.id,
                        command_id = %report.command_id,
                        command = %command,
                        sms_attempted = report.sms_attempted(),
                        outcome = ?outcome,
                        "Command not delivered"
                    ),
                },
                Err(e) => error!(vehicle_id = %vehicle.id, "{}", e),
            }
        })
    }

    async fn require_vehicle(&self, vehicle_id: i64) -> Result<Vehicle, ControlError> {
        self.store
            .vehicle(vehicle_id)
            .await?
            .ok_or(ControlError::UnknownVehicle(vehicle_id))
    }

    /// Vehicle paired with `device_id`, opening its session on first traffic.
    async fn session_for_device(&mut self, device_id: &str) -> anyhow::Result<Option<i64>> {
        if let Some(vehicle_id) = self.registry.vehicle_for_device(device_id) {
            return Ok(Some(vehicle_id));
        }
        match self.store.vehicle_by_device(device_id).await? {
            Some(vehicle) => {
                let vehicle_id = vehicle.id;
                self.registry.open(vehicle, false);
                Ok(Some(vehicle_id))
            }
            None => Ok(None),
        }
    }
}
