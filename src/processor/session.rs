use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::TrackingSettings;
use crate::db::store::TrackingStore;
use crate::models::geofence::GeofenceConfig;
use crate::models::position::{now_millis, PositionSample, SampleSource};
use crate::models::trip_history::TripPointDraft;
use crate::models::vehicle::Vehicle;
use crate::processor::geofence::GeofenceMonitor;
use crate::processor::liveness::LivenessMonitor;
use crate::processor::persister::BatchedPersister;
use crate::processor::throttle::RefreshThrottle;
use crate::processor::update_gate::UpdateGate;

const INPUT_CAPACITY: usize = 256;
const WRITER_CAPACITY: usize = 256;
const FINAL_FLUSH_ATTEMPTS: usize = 3;

#[derive(Debug)]
pub enum SessionInput {
    Sample(PositionSample),
    DeviceStatus { online: bool },
    Paired(Option<String>),
    Geofence(GeofenceRequest),
    /// Deletes persisted history after discarding anything still buffered.
    ClearHistory(oneshot::Sender<anyhow::Result<u64>>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeofenceRequest {
    /// Without an explicit center the last accepted position is used.
    Enable {
        center: Option<(f64, f64)>,
        radius_meters: Option<f64>,
    },
    SetRadius(f64),
    Disable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Unpaired,
    Connected,
    Offline,
}

/// What a live consumer of the vehicle sees.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveView {
    pub vehicle_id: i64,
    pub position: Option<PositionSample>,
    pub inside_geofence: Option<bool>,
    pub connection: ConnectionState,
    pub updated_at_ms: i64,
}

#[derive(Debug, Clone)]
pub struct GeofenceAlert {
    pub vehicle_id: i64,
    pub nickname: String,
    pub phone_number: String,
    pub distance_meters: f64,
    pub sample: PositionSample,
}

impl GeofenceAlert {
    pub fn message(&self) -> String {
        format!(
            "Alert: Your vehicle '{}' has left the virtual area!",
            self.nickname
        )
    }
}

enum WriterOp {
    Point(TripPointDraft),
    Connection { online: bool, at_ms: i64 },
    ClearHistory(oneshot::Sender<anyhow::Result<u64>>),
}

/// Owned handle to a running vehicle session. Dropping it cancels the session;
/// `close` additionally waits until buffered points are written.
pub struct SessionHandle {
    vehicle_id: i64,
    inputs: mpsc::Sender<SessionInput>,
    view: watch::Receiver<LiveView>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub async fn send(&self, input: SessionInput) -> anyhow::Result<()> {
        self.inputs
            .send(input)
            .await
            .map_err(|_| anyhow::anyhow!("session for vehicle {} is closed", self.vehicle_id))
    }

    pub fn subscribe(&self) -> watch::Receiver<LiveView> {
        self.view.clone()
    }

    #[cfg(test)]
    pub fn view(&self) -> LiveView {
        self.view.borrow().clone()
    }

    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(vehicle_id = %self.vehicle_id, "session task failed: {}", e);
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub fn spawn_session<S>(
    vehicle: Vehicle,
    settings: TrackingSettings,
    store: Arc<S>,
    alerts: mpsc::Sender<GeofenceAlert>,
) -> SessionHandle
where
    S: TrackingStore + ?Sized,
{
    let vehicle_id = vehicle.id;
    let (input_tx, input_rx) = mpsc::channel(INPUT_CAPACITY);
    let (writer_tx, writer_rx) = mpsc::channel(WRITER_CAPACITY);

    let connection = if vehicle.paired_device().is_some() {
        ConnectionState::Offline
    } else {
        ConnectionState::Unpaired
    };
    let last_position = vehicle.last_known_position();
    let (view_tx, view_rx) = watch::channel(LiveView {
        vehicle_id,
        position: last_position,
        inside_geofence: None,
        connection,
        updated_at_ms: now_millis(),
    });

    let persister = BatchedPersister::new(
        store.clone(),
        vehicle_id,
        settings.batch_size,
        settings.history_retention.max(0) as usize,
    );
    let writer = tokio::spawn(run_writer(store, persister, writer_rx, vehicle_id));

    let session = VehicleSession {
        gate: UpdateGate::new(settings.min_interval_ms, settings.min_distance_meters),
        geofence: GeofenceMonitor::new(),
        throttle: RefreshThrottle::new(settings.refresh_interval()),
        liveness: LivenessMonitor::new(settings.stale_after()),
        vehicle,
        settings,
        connection,
        last_position,
        inside: None,
        view_tx,
        writer_tx,
        alerts,
    };

    let cancel = CancellationToken::new();
    let task = tokio::spawn(session.run(input_rx, cancel.clone(), writer));
    info!(vehicle_id = %vehicle_id, "vehicle session opened");

    SessionHandle {
        vehicle_id,
        inputs: input_tx,
        view: view_rx,
        cancel,
        task: Some(task),
    }
}

/// Single writer of all mutable state for one vehicle.
struct VehicleSession {
    vehicle: Vehicle,
    settings: TrackingSettings,
    gate: UpdateGate,
    geofence: GeofenceMonitor,
    throttle: RefreshThrottle,
    liveness: LivenessMonitor,
    connection: ConnectionState,
    last_position: Option<PositionSample>,
    inside: Option<bool>,
    view_tx: watch::Sender<LiveView>,
    writer_tx: mpsc::Sender<WriterOp>,
    alerts: mpsc::Sender<GeofenceAlert>,
}

impl VehicleSession {
    async fn run(
        mut self,
        mut inputs: mpsc::Receiver<SessionInput>,
        cancel: CancellationToken,
        writer: JoinHandle<()>,
    ) {
        let vehicle_id = self.vehicle.id;
        let mut liveness_tick = tokio::time::interval(self.settings.liveness_interval());
        liveness_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        liveness_tick.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                input = inputs.recv() => match input {
                    Some(input) => self.handle(input).await,
                    None => break,
                },
                _ = liveness_tick.tick() => self.check_liveness().await,
            }
        }

        // Anything already queued was accepted by the ingest loop; finish it.
        inputs.close();
        while let Some(input) = inputs.recv().await {
            self.handle(input).await;
        }

        drop(self);
        if let Err(e) = writer.await {
            error!(vehicle_id = %vehicle_id, "writer task failed: {}", e);
        }
        info!(vehicle_id = %vehicle_id, "vehicle session closed");
    }

    async fn handle(&mut self, input: SessionInput) {
        match input {
            SessionInput::Sample(sample) => self.on_sample(sample).await,
            SessionInput::DeviceStatus { online } => {
                if self.vehicle.paired_device().is_some() {
                    let state = if online {
                        ConnectionState::Connected
                    } else {
                        ConnectionState::Offline
                    };
                    self.set_connection(state).await;
                }
            }
            SessionInput::Paired(device_id) => {
                self.vehicle.device_id = device_id;
                let state = if self.vehicle.paired_device().is_some() {
                    ConnectionState::Offline
                } else {
                    ConnectionState::Unpaired
                };
                self.set_connection(state).await;
            }
            SessionInput::Geofence(request) => self.on_geofence(request),
            SessionInput::ClearHistory(reply) => {
                if let Err(mpsc::error::SendError(WriterOp::ClearHistory(reply))) =
                    self.writer_tx.send(WriterOp::ClearHistory(reply)).await
                {
                    let _ = reply.send(Err(anyhow::anyhow!("trip writer stopped")));
                }
            }
        }
    }

    async fn on_sample(&mut self, sample: PositionSample) {
        let now = Instant::now();
        let realtime = sample.source == SampleSource::Realtime;
        if realtime {
            self.liveness.record(now);
            if self.vehicle.paired_device().is_some() {
                self.set_connection(ConnectionState::Connected).await;
            }
        }

        let accepted = if realtime && self.settings.capture_all_realtime {
            self.gate.force(sample);
            true
        } else {
            self.gate.offer(sample)
        };
        if !accepted {
            debug!(
                vehicle_id = %self.vehicle.id,
                timestamp = sample.timestamp,
                "sample below time/distance threshold, skipped"
            );
            return;
        }

        self.last_position = Some(sample);
        self.observe_geofence(&sample);

        if self.writer_tx.send(WriterOp::Point(sample.into())).await.is_err() {
            error!(vehicle_id = %self.vehicle.id, "trip writer stopped, point lost");
        }

        if self.throttle.ready(now) {
            self.publish();
        }
    }

    fn on_geofence(&mut self, request: GeofenceRequest) {
        match request {
            GeofenceRequest::Enable {
                center,
                radius_meters,
            } => {
                let radius = radius_meters.unwrap_or(self.settings.geofence_radius_meters);
                if radius <= 0.0 {
                    warn!(vehicle_id = %self.vehicle.id, radius, "ignoring non-positive geofence radius");
                    return;
                }
                let center = center.or_else(|| {
                    self.last_position
                        .map(|p| (p.latitude, p.longitude))
                });
                let Some((lat, lng)) = center else {
                    warn!(vehicle_id = %self.vehicle.id, "no known position to center geofence on");
                    return;
                };
                self.geofence.configure(GeofenceConfig::new(lat, lng, radius));
                info!(vehicle_id = %self.vehicle.id, lat, lng, radius, "geofence enabled");
            }
            GeofenceRequest::SetRadius(radius) => {
                if radius <= 0.0 || !self.geofence.set_radius(radius) {
                    warn!(vehicle_id = %self.vehicle.id, radius, "geofence radius not applied");
                    return;
                }
            }
            GeofenceRequest::Disable => {
                self.geofence.disable();
                self.inside = None;
                info!(vehicle_id = %self.vehicle.id, "geofence disabled");
                self.publish();
                return;
            }
        }

        if let Some(position) = self.last_position {
            self.observe_geofence(&position);
        }
        self.publish();
    }

    fn observe_geofence(&mut self, sample: &PositionSample) {
        let Some(observation) = self.geofence.observe(sample) else {
            return;
        };
        self.inside = Some(observation.verdict.inside);
        if observation.verdict.transitioned {
            debug!(
                vehicle_id = %self.vehicle.id,
                inside = observation.verdict.inside,
                distance = observation.verdict.distance_meters,
                "geofence transition"
            );
        }
        if observation.alert {
            self.raise_alert(*sample, observation.verdict.distance_meters);
        }
    }

    fn raise_alert(&self, sample: PositionSample, distance_meters: f64) {
        let alert = GeofenceAlert {
            vehicle_id: self.vehicle.id,
            nickname: self.vehicle.nickname.clone(),
            phone_number: self.vehicle.phone_number.clone(),
            distance_meters,
            sample,
        };
        warn!(
            vehicle_id = %self.vehicle.id,
            distance = distance_meters,
            "geofence alarm triggered: {}",
            alert.message()
        );
        match self.alerts.try_send(alert) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(vehicle_id = %self.vehicle.id, "alert queue full, alert dropped")
            }
            Err(TrySendError::Closed(_)) => {
                debug!(vehicle_id = %self.vehicle.id, "no alert consumer")
            }
        }
    }

    async fn check_liveness(&mut self) {
        if self.connection == ConnectionState::Connected && self.liveness.is_stale(Instant::now()) {
            warn!(vehicle_id = %self.vehicle.id, "location feed stale, marking offline");
            self.set_connection(ConnectionState::Offline).await;
        }
    }

    async fn set_connection(&mut self, state: ConnectionState) {
        if self.connection == state {
            return;
        }
        self.connection = state;
        if state != ConnectionState::Unpaired {
            let op = WriterOp::Connection {
                online: state == ConnectionState::Connected,
                at_ms: now_millis(),
            };
            if self.writer_tx.send(op).await.is_err() {
                error!(vehicle_id = %self.vehicle.id, "trip writer stopped, status lost");
            }
        }
        self.publish();
    }

    fn publish(&self) {
        self.view_tx.send_replace(LiveView {
            vehicle_id: self.vehicle.id,
            position: self.last_position,
            inside_geofence: self.inside,
            connection: self.connection,
            updated_at_ms: now_millis(),
        });
    }
}

async fn run_writer<S>(
    store: Arc<S>,
    mut persister: BatchedPersister<S>,
    mut ops: mpsc::Receiver<WriterOp>,
    vehicle_id: i64,
) where
    S: TrackingStore + ?Sized,
{
    while let Some(op) = ops.recv().await {
        match op {
            WriterOp::Point(point) => {
                if let Err(e) = persister.submit(point).await {
                    error!("{:#}", e);
                }
            }
            WriterOp::Connection { online, at_ms } => {
                if let Err(e) = store.update_connection_status(vehicle_id, online, at_ms).await {
                    error!(vehicle_id = %vehicle_id, "connection status update failed: {}", e);
                }
            }
            WriterOp::ClearHistory(reply) => {
                let discarded = persister.discard();
                let result = store.clear_history(vehicle_id).await;
                debug!(vehicle_id = %vehicle_id, discarded, "buffered trip points discarded");
                let _ = reply.send(result);
            }
        }
    }

    debug!(vehicle_id = %vehicle_id, buffered = persister.buffered(), "final flush");

    for attempt in 1..=FINAL_FLUSH_ATTEMPTS {
        match persister.flush().await {
            Ok(_) => return,
            Err(e) if attempt < FINAL_FLUSH_ATTEMPTS => {
                warn!(attempt, "final flush failed, retrying: {:#}", e);
                tokio::time::sleep(std::time::Duration::from_millis(200 * attempt as u64)).await;
            }
            Err(e) => error!("final flush failed, {} points lost: {:#}", e.buffered, e),
        }
    }
}
