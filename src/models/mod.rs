pub mod command;
pub mod geofence;
pub mod message;
pub mod position;
pub mod trip_history;
pub mod vehicle;
