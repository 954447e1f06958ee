pub mod alerts;
pub mod control;
pub mod devices;
pub mod geo;
pub mod geofence;
pub mod live_view;
pub mod liveness;
pub mod persister;
pub mod registry;
pub mod session;
pub mod throttle;
pub mod tracker;
pub mod update_gate;
