use serde::Serialize;
use sqlx::FromRow;

use super::position::{PositionSample, SampleSource};

pub const LOCATION_UPDATE: &str = "LOCATION_UPDATE";
pub const SMS_LOCATION: &str = "SMS_LOCATION";

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TripHistoryPoint {
    pub id: i64, // bigserial
    pub vehicle_id: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: i64,
    pub event_type: String,
}

/// A point waiting in the persister buffer; it gets an id once written.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TripPointDraft {
    pub sample: PositionSample,
    pub event_type: &'static str,
}

impl From<PositionSample> for TripPointDraft {
    fn from(sample: PositionSample) -> Self {
        let event_type = match sample.source {
            SampleSource::Realtime => LOCATION_UPDATE,
            SampleSource::Sms => SMS_LOCATION,
        };
        Self { sample, event_type }
    }
}
