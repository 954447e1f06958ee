use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

use super::position::{PositionSample, SampleSource};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("payload is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("payload has {fields} fields, limit is {limit}")]
    Oversized { fields: usize, limit: usize },
    #[error("payload is missing {0}")]
    Incomplete(&'static str),
    #[error("coordinates out of range: {latitude}, {longitude}")]
    OutOfRange { latitude: f64, longitude: f64 },
}

/// Location record as written by the companion device.
#[derive(Debug, Deserialize)]
pub struct LocationRecord {
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub longitude: Option<f64>,
    #[serde(default, deserialize_with = "parse_i64_option")]
    pub timestamp: Option<i64>,
}

/// Online/offline flag published by the companion device.
#[derive(Debug, Default, Deserialize)]
pub struct DeviceStatus {
    pub active: Option<bool>,
    #[serde(default, deserialize_with = "parse_i64_option")]
    pub last_seen: Option<i64>,
}

impl DeviceStatus {
    /// A recent `last_seen` wins; otherwise fall back to the `active` flag.
    pub fn is_online(&self, now_ms: i64, online_window_ms: i64) -> bool {
        match self.last_seen {
            Some(last_seen) => now_ms - last_seen < online_window_ms,
            None => self.active.unwrap_or(false),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct InboundSms {
    pub from: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SmsEvent {
    Location {
        vehicle_id: i64,
        sample: PositionSample,
    },
    CompanionError(String),
    Ignored,
}

/// Decodes a realtime location payload, rejecting oversized or partial records.
pub fn parse_location(payload: &[u8], max_fields: usize) -> Result<PositionSample, FeedError> {
    let value: Value = serde_json::from_slice(payload)?;
    let fields = value.as_object().ok_or(FeedError::NotAnObject)?.len();
    if fields > max_fields {
        return Err(FeedError::Oversized {
            fields,
            limit: max_fields,
        });
    }

    let record: LocationRecord = serde_json::from_value(value)?;
    let latitude = record.latitude.ok_or(FeedError::Incomplete("latitude"))?;
    let longitude = record.longitude.ok_or(FeedError::Incomplete("longitude"))?;
    let timestamp = record.timestamp.ok_or(FeedError::Incomplete("timestamp"))?;
    check_range(latitude, longitude)?;

    Ok(PositionSample::new(
        latitude,
        longitude,
        timestamp,
        SampleSource::Realtime,
    ))
}

pub fn parse_device_status(payload: &[u8]) -> Result<DeviceStatus, FeedError> {
    Ok(serde_json::from_slice(payload)?)
}

/// Body format: `LOCATION:<vehicleId>:<lat>,<lng>:<timestamp>` or `ERROR:<text>`.
pub fn parse_sms_body(body: &str) -> SmsEvent {
    let body = body.trim();
    if let Some(rest) = body.strip_prefix("LOCATION:") {
        return match parse_sms_location(rest) {
            Some((vehicle_id, sample)) => SmsEvent::Location { vehicle_id, sample },
            None => SmsEvent::Ignored,
        };
    }
    if let Some(error) = body.strip_prefix("ERROR:") {
        return SmsEvent::CompanionError(error.trim().to_string());
    }
    SmsEvent::Ignored
}

fn parse_sms_location(rest: &str) -> Option<(i64, PositionSample)> {
    let mut parts = rest.splitn(3, ':');
    let vehicle_id = parts.next()?.trim().parse().ok()?;
    let (lat, lng) = parts.next()?.split_once(',')?;
    let timestamp = parts.next()?.trim().parse().ok()?;
    let latitude: f64 = lat.trim().parse().ok()?;
    let longitude: f64 = lng.trim().parse().ok()?;
    check_range(latitude, longitude).ok()?;
    Some((
        vehicle_id,
        PositionSample::new(latitude, longitude, timestamp, SampleSource::Sms),
    ))
}

fn check_range(latitude: f64, longitude: f64) -> Result<(), FeedError> {
    if (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude) {
        Ok(())
    } else {
        Err(FeedError::OutOfRange {
            latitude,
            longitude,
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Int(i64),
    Float(f64),
}

fn parse_f64_option<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v: Option<StringOrNumber> = Option::deserialize(deserializer)?;
    match v {
        Some(StringOrNumber::Float(f)) => Ok(Some(f)),
        Some(StringOrNumber::Int(i)) => Ok(Some(i as f64)),
        Some(StringOrNumber::String(s)) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                s.trim().parse::<f64>().map(Some).map_err(serde::de::Error::custom)
            }
        }
        None => Ok(None),
    }
}

fn parse_i64_option<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v: Option<StringOrNumber> = Option::deserialize(deserializer)?;
    match v {
        Some(StringOrNumber::Int(i)) => Ok(Some(i)),
        Some(StringOrNumber::Float(f)) if f.fract() == 0.0 => Ok(Some(f as i64)),
        Some(StringOrNumber::Float(f)) => Err(serde::de::Error::custom(format!(
            "expected integer millis, got {}",
            f
        ))),
        Some(StringOrNumber::String(s)) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                s.trim().parse::<i64>().map(Some).map_err(serde::de::Error::custom)
            }
        }
        None => Ok(None),
    }
}
