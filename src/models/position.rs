use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::processor::geo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SampleSource {
    Realtime,
    Sms,
}

impl SampleSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleSource::Realtime => "REALTIME",
            SampleSource::Sms => "SMS",
        }
    }
}

impl fmt::Display for SampleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SampleSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REALTIME" => Ok(SampleSource::Realtime),
            "SMS" => Ok(SampleSource::Sms),
            other => Err(anyhow::anyhow!("unknown sample source: {}", other)),
        }
    }
}

/// A single position fix reported for a vehicle. `timestamp` is epoch millis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: i64,
    pub source: SampleSource,
}

impl PositionSample {
    pub fn new(latitude: f64, longitude: f64, timestamp: i64, source: SampleSource) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
            source,
        }
    }

    pub fn distance_to(&self, other: &PositionSample) -> f64 {
        geo::haversine_meters(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
