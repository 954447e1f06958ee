use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::TrackingSettings;
use crate::db::store::TrackingStore;
use crate::models::vehicle::Vehicle;
use crate::processor::live_view::{forward_live_views, LiveViewSink};
use crate::processor::session::{spawn_session, GeofenceAlert, SessionHandle, SessionInput};

struct OpenSession {
    handle: SessionHandle,
    /// Opened by an explicit request; never evicted for idleness.
    pinned: bool,
    last_used: Instant,
}

/// Open vehicle sessions, owned by the ingest loop.
pub struct SessionRegistry<S: ?Sized> {
    store: Arc<S>,
    settings: TrackingSettings,
    alerts: mpsc::Sender<GeofenceAlert>,
    live_views: Option<Arc<dyn LiveViewSink>>,
    sessions: HashMap<i64, OpenSession>,
    devices: HashMap<String, i64>,
}

impl<S: TrackingStore + ?Sized> SessionRegistry<S> {
    pub fn new(
        store: Arc<S>,
        settings: TrackingSettings,
        alerts: mpsc::Sender<GeofenceAlert>,
    ) -> Self {
        Self {
            store,
            settings,
            alerts,
            live_views: None,
            sessions: HashMap::new(),
            devices: HashMap::new(),
        }
    }

    pub fn with_live_view_sink(mut self, sink: Arc<dyn LiveViewSink>) -> Self {
        self.live_views = Some(sink);
        self
    }

    /// Opens the vehicle's session if needed. `pinned` sticks once set.
    pub fn open(&mut self, vehicle: Vehicle, pinned: bool) -> &SessionHandle {
        let vehicle_id = vehicle.id;
        if let Some(device) = vehicle.paired_device() {
            self.devices.insert(device.to_string(), vehicle_id);
        }
        let store = self.store.clone();
        let settings = self.settings.clone();
        let alerts = self.alerts.clone();
        let live_views = self.live_views.clone();
        let now = Instant::now();

        let entry = self.sessions.entry(vehicle_id).or_insert_with(|| {
            let handle = spawn_session(vehicle, settings, store, alerts);
            if let Some(sink) = live_views {
                tokio::spawn(forward_live_views(handle.subscribe(), sink));
            }
            OpenSession {
                handle,
                pinned,
                last_used: now,
            }
        });
        entry.pinned |= pinned;
        entry.last_used = now;
        &entry.handle
    }

    pub fn get(&self, vehicle_id: i64) -> Option<&SessionHandle> {
        self.sessions.get(&vehicle_id).map(|s| &s.handle)
    }

    /// Vehicle whose open session owns `device_id`.
    pub fn vehicle_for_device(&self, device_id: &str) -> Option<i64> {
        self.devices
            .get(device_id)
            .copied()
            .filter(|vehicle_id| self.sessions.contains_key(vehicle_id))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Queues `input` for the vehicle's session. `Ok(false)` when none is open.
    pub async fn send(&mut self, vehicle_id: i64, input: SessionInput) -> anyhow::Result<bool> {
        match self.sessions.get_mut(&vehicle_id) {
            Some(session) => {
                session.last_used = Instant::now();
                session.handle.send(input).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Re-keys the device index and tells the session about the new pairing.
    pub async fn repair(&mut self, vehicle_id: i64, device_id: Option<String>) -> anyhow::Result<()> {
        self.devices.retain(|_, v| *v != vehicle_id);
        if let Some(device) = device_id.as_deref().filter(|d| !d.is_empty()) {
            self.devices.insert(device.to_string(), vehicle_id);
        }
        self.send(vehicle_id, SessionInput::Paired(device_id)).await?;
        Ok(())
    }

    pub async fn close(&mut self, vehicle_id: i64) -> bool {
        self.devices.retain(|_, v| *v != vehicle_id);
        match self.sessions.remove(&vehicle_id) {
            Some(session) => {
                session.handle.close().await;
                true
            }
            None => {
                debug!(vehicle_id = %vehicle_id, "no open session to close");
                false
            }
        }
    }

    /// Closes unpinned sessions that have had no input for the idle window.
    pub async fn evict_idle(&mut self) -> usize {
        if self.is_empty() {
            return 0;
        }
        let idle_after = self.settings.session_idle_after();
        let now = Instant::now();
        let idle: Vec<i64> = self
            .sessions
            .iter()
            .filter(|(_, s)| !s.pinned && now.saturating_duration_since(s.last_used) >= idle_after)
            .map(|(vehicle_id, _)| *vehicle_id)
            .collect();

        for vehicle_id in &idle {
            info!(vehicle_id = %vehicle_id, "closing idle vehicle session");
            self.close(*vehicle_id).await;
        }
        if !idle.is_empty() {
            debug!(evicted = idle.len(), open = self.len(), "idle sessions evicted");
        }
        idle.len()
    }

    pub async fn shutdown(&mut self) {
        let count = self.len();
        self.devices.clear();
        join_all(self.sessions.drain().map(|(_, session)| session.handle.close())).await;
        info!("closed {} vehicle sessions", count);
    }
}
