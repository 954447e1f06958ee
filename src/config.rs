use anyhow::Result;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub kafka_bootstrap_servers: String,
    pub kafka_group_id: String,
    pub kafka_auto_offset_reset: String,
    pub kafka_sasl_mechanism: String,
    pub kafka_username: String,
    pub kafka_password: String,
    pub kafka_security_protocol: String,
    pub kafka_max_retries: u32,
    pub kafka_circuit_breaker_cooldown: u64,
    pub kafka_location_topic: String,
    pub kafka_status_topic: String,
    pub kafka_control_topic: String,
    pub kafka_sms_inbound_topic: String,
    pub kafka_command_topic: String,
    pub kafka_live_view_topic: String,
    pub database_url: String,
    pub log_level: String,
    pub tracking: TrackingSettings,
    pub commands: CommandSettings,
}

/// Thresholds for the per-vehicle reconciliation pipeline.
#[derive(Debug, Deserialize, Clone)]
pub struct TrackingSettings {
    pub min_interval_ms: i64,
    pub min_distance_meters: f64,
    pub refresh_interval_ms: u64,
    pub batch_size: usize,
    pub history_retention: i64,
    pub liveness_interval_ms: u64,
    pub stale_after_ms: u64,
    pub device_online_window_ms: i64,
    pub max_feed_fields: usize,
    pub geofence_radius_meters: f64,
    pub capture_all_realtime: bool,
    pub session_idle_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CommandSettings {
    pub timeout_ms: u64,
    pub sms_gateway_url: String,
    pub sms_gateway_token: String,
    pub sms_command_prefix: String,
    pub sms_approved_numbers: Vec<String>,
    pub sms_send_permitted: bool,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            min_interval_ms: 5_000,
            min_distance_meters: 10.0,
            refresh_interval_ms: 1_000,
            batch_size: 10,
            history_retention: 1_000,
            liveness_interval_ms: 5_000,
            stale_after_ms: 30_000,
            device_online_window_ms: 120_000,
            max_feed_fields: 100,
            geofence_radius_meters: 50.0,
            capture_all_realtime: false,
            session_idle_ms: 120_000,
        }
    }
}

impl TrackingSettings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    /// How long a session opened by feed traffic may sit without input.
    pub fn session_idle_after(&self) -> Duration {
        Duration::from_millis(self.session_idle_ms)
    }
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            sms_gateway_url: "http://localhost:8085/sms".to_string(),
            sms_gateway_token: String::new(),
            sms_command_prefix: "PIN:1234:".to_string(),
            sms_approved_numbers: Vec::new(),
            sms_send_permitted: true,
        }
    }
}

impl CommandSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let kafka_bootstrap_servers =
            env::var("KAFKA_BOOTSTRAP_SERVERS").unwrap_or_else(|_| "localhost:9092".to_string());
        let kafka_group_id =
            env::var("KAFKA_GROUP_ID").unwrap_or_else(|_| "vehicle-tracker".to_string());
        let kafka_auto_offset_reset =
            env::var("KAFKA_AUTO_OFFSET_RESET").unwrap_or_else(|_| "latest".to_string());
        let kafka_sasl_mechanism =
            env::var("KAFKA_SASL_MECHANISM").unwrap_or_else(|_| "SCRAM-SHA-256".to_string());
        let kafka_username = env::var("KAFKA_USERNAME").unwrap_or_default();
        let kafka_password = env::var("KAFKA_PASSWORD").unwrap_or_default();
        let kafka_security_protocol =
            env::var("KAFKA_SECURITY_PROTOCOL").unwrap_or_else(|_| "SASL_PLAINTEXT".to_string());
        let kafka_max_retries = env_or("KAFKA_MAX_RETRIES", 5);
        let kafka_circuit_breaker_cooldown = env_or("KAFKA_CIRCUIT_BREAKER_COOLDOWN", 300);

        let kafka_location_topic = env::var("KAFKA_LOCATION_TOPIC")
            .unwrap_or_else(|_| "tracker.locations".to_string());
        let kafka_status_topic =
            env::var("KAFKA_STATUS_TOPIC").unwrap_or_else(|_| "tracker.devices".to_string());
        let kafka_control_topic =
            env::var("KAFKA_CONTROL_TOPIC").unwrap_or_else(|_| "tracker.control".to_string());
        let kafka_sms_inbound_topic = env::var("KAFKA_SMS_INBOUND_TOPIC")
            .unwrap_or_else(|_| "tracker.sms-inbound".to_string());
        let kafka_command_topic =
            env::var("KAFKA_COMMAND_TOPIC").unwrap_or_else(|_| "tracker.commands".to_string());
        let kafka_live_view_topic =
            env::var("KAFKA_LIVE_VIEW_TOPIC").unwrap_or_else(|_| "tracker.live-view".to_string());

        let db_host = env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string());
        let db_port = env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());
        let db_name = env::var("DB_DATABASE").unwrap_or_else(|_| "vehicle_tracker".to_string());
        let db_user = env::var("DB_USER").unwrap_or_else(|_| "tracker".to_string());
        let db_pwd = env::var("DB_PWD").unwrap_or_else(|_| "tracker".to_string());

        let database_url = format!(
            "postgres://{}:{}@{}:{}/{}",
            db_user, db_pwd, db_host, db_port, db_name
        );

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let defaults = TrackingSettings::default();
        let tracking = TrackingSettings {
            min_interval_ms: env_or("TRACK_MIN_INTERVAL_MS", defaults.min_interval_ms),
            min_distance_meters: env_or("TRACK_MIN_DISTANCE_METERS", defaults.min_distance_meters),
            refresh_interval_ms: env_or("TRACK_REFRESH_INTERVAL_MS", defaults.refresh_interval_ms),
            batch_size: env_or("TRACK_BATCH_SIZE", defaults.batch_size).max(1),
            history_retention: env_or("TRACK_HISTORY_RETENTION", defaults.history_retention),
            liveness_interval_ms: env_or(
                "TRACK_LIVENESS_INTERVAL_MS",
                defaults.liveness_interval_ms,
            ),
            stale_after_ms: env_or("TRACK_STALE_AFTER_MS", defaults.stale_after_ms),
            device_online_window_ms: env_or(
                "TRACK_DEVICE_ONLINE_WINDOW_MS",
                defaults.device_online_window_ms,
            ),
            max_feed_fields: env_or("TRACK_MAX_FEED_FIELDS", defaults.max_feed_fields),
            geofence_radius_meters: env_or(
                "TRACK_GEOFENCE_RADIUS_METERS",
                defaults.geofence_radius_meters,
            ),
            capture_all_realtime: env_or(
                "TRACK_CAPTURE_ALL_REALTIME",
                defaults.capture_all_realtime,
            ),
            session_idle_ms: env_or("TRACK_SESSION_IDLE_MS", defaults.session_idle_ms),
        };

        let command_defaults = CommandSettings::default();
        let commands = CommandSettings {
            timeout_ms: env_or("COMMAND_TIMEOUT_MS", command_defaults.timeout_ms),
            sms_gateway_url: env::var("SMS_GATEWAY_URL")
                .unwrap_or(command_defaults.sms_gateway_url),
            sms_gateway_token: env::var("SMS_GATEWAY_TOKEN").unwrap_or_default(),
            sms_command_prefix: env::var("SMS_COMMAND_PREFIX")
                .unwrap_or(command_defaults.sms_command_prefix),
            sms_approved_numbers: parse_number_list(
                &env::var("SMS_APPROVED_NUMBERS").unwrap_or_default(),
            ),
            sms_send_permitted: env_or("SMS_SEND_PERMITTED", command_defaults.sms_send_permitted),
        };

        Ok(Self {
            kafka_bootstrap_servers,
            kafka_group_id,
            kafka_auto_offset_reset,
            kafka_sasl_mechanism,
            kafka_username,
            kafka_password,
            kafka_security_protocol,
            kafka_max_retries,
            kafka_circuit_breaker_cooldown,
            kafka_location_topic,
            kafka_status_topic,
            kafka_control_topic,
            kafka_sms_inbound_topic,
            kafka_command_topic,
            kafka_live_view_topic,
            database_url,
            log_level,
            tracking,
            commands,
        })
    }

    pub fn topics(&self) -> [&str; 4] {
        [
            self.kafka_location_topic.as_str(),
            self.kafka_status_topic.as_str(),
            self.kafka_control_topic.as_str(),
            self.kafka_sms_inbound_topic.as_str(),
        ]
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

/// Splits a comma separated phone number list, skipping blanks.
pub fn parse_number_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number_list() {
        let numbers = parse_number_list(" +15550001111, ,+15550002222,");
        assert_eq!(numbers, vec!["+15550001111", "+15550002222"]);
        assert!(parse_number_list("").is_empty());
    }

    #[test]
    fn test_tracking_defaults() {
        let tracking = TrackingSettings::default();
        assert_eq!(tracking.min_interval_ms, 5_000);
        assert_eq!(tracking.batch_size, 10);
        assert_eq!(tracking.history_retention, 1_000);
        assert_eq!(tracking.stale_after(), Duration::from_secs(30));
        assert_eq!(tracking.liveness_interval(), Duration::from_secs(5));
        assert_eq!(tracking.session_idle_after(), Duration::from_secs(120));
        assert_eq!(CommandSettings::default().timeout(), Duration::from_secs(5));
    }
}
