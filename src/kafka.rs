use crate::config::AppConfig;
use crate::db::store::TrackingStore;
use crate::dispatch::PrimaryChannel;
use crate::models::command::CommandEnvelope;
use crate::processor::live_view::LiveViewSink;
use crate::processor::session::LiveView;
use crate::processor::tracker::{FeedKind, Tracker};
use anyhow::anyhow;
use async_trait::async_trait;
use prost::Message as _;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Base client settings with SASL/SCRAM authentication, shared by consumer and producer.
fn client_config(config: &AppConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_bootstrap_servers)
        // SASL Configuration
        .set("security.protocol", &config.kafka_security_protocol)
        .set("sasl.mechanism", &config.kafka_sasl_mechanism)
        .set("sasl.username", &config.kafka_username)
        .set("sasl.password", &config.kafka_password);
    client_config
}

fn feed_kind(config: &AppConfig, topic: &str) -> Option<FeedKind> {
    if topic == config.kafka_location_topic {
        Some(FeedKind::Location)
    } else if topic == config.kafka_status_topic {
        Some(FeedKind::DeviceStatus)
    } else if topic == config.kafka_control_topic {
        Some(FeedKind::Control)
    } else if topic == config.kafka_sms_inbound_topic {
        Some(FeedKind::InboundSms)
    } else {
        None
    }
}

/// Consumes every inbound feed with a circuit breaker, handing messages to the
/// tracker one at a time so per-vehicle order matches partition order.
/// Idle sessions are released between messages.
pub async fn run_consumer<S>(
    config: &AppConfig,
    tracker: &mut Tracker<S>,
    shutdown: CancellationToken,
) -> anyhow::Result<()>
where
    S: TrackingStore + ?Sized,
{
    let topics = config.topics();
    info!("Initializing Kafka consumer for topics: {:?}", topics);

    let consumer: StreamConsumer = client_config(config)
        .set("group.id", &config.kafka_group_id)
        .set("auto.offset.reset", &config.kafka_auto_offset_reset)
        .create()?;

    consumer.subscribe(&topics)?;
    info!("Subscribed to topics: {:?}", topics);

    let mut consecutive_failures = 0;
    let max_retries = config.kafka_max_retries;
    let cooldown_duration = Duration::from_secs(config.kafka_circuit_breaker_cooldown);
    let mut eviction_tick = tokio::time::interval(config.tracking.liveness_interval());

    loop {
        // Circuit Breaker Check
        if consecutive_failures >= max_retries {
            warn!(
                "Circuit breaker tripped ({} consecutive failures)! Sleeping for {} seconds...",
                consecutive_failures, config.kafka_circuit_breaker_cooldown
            );
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(cooldown_duration) => {}
            }
            consecutive_failures = 0;
            info!("Circuit breaker reset. Resuming consumption.");
        }

        let received = tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = eviction_tick.tick() => {
                tracker.evict_idle_sessions().await;
                continue;
            }
            received = consumer.recv() => received,
        };

        match received {
            Ok(m) => {
                // Success: Reset failure counter
                consecutive_failures = 0;

                let Some(kind) = feed_kind(config, m.topic()) else {
                    debug!("Ignoring message from topic {}", m.topic());
                    continue;
                };
                let payload = match m.payload() {
                    None => {
                        warn!("Received empty payload from Kafka on {}", m.topic());
                        continue;
                    }
                    Some(p) => p,
                };
                let key = m.key().and_then(|k| std::str::from_utf8(k).ok());

                if let Err(e) = tracker.handle(kind, key, payload).await {
                    error!("Error processing {:?} message: {}", kind, e);
                }
            }
            Err(e) => {
                error!(
                    "Kafka error: {}. Incrementing failure count ({} / {})",
                    e,
                    consecutive_failures + 1,
                    max_retries
                );
                consecutive_failures += 1;

                // Small delay to prevent tight loop in case of minor network glitches
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }

    info!("Kafka consumer stopped");
    Ok(())
}

/// Outbound producer shared by the primary command channel and the live view
/// topic. Commands are protobuf envelopes keyed by device id, so each device
/// reads its own command slot from the compacted topic. Live views are JSON
/// keyed by vehicle id.
pub struct KafkaOutbound {
    producer: FutureProducer,
    command_topic: String,
    live_view_topic: String,
}

impl KafkaOutbound {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let producer: FutureProducer = client_config(config)
            .set("message.timeout.ms", config.commands.timeout_ms.to_string())
            .create()?;
        info!(
            "Producer ready for topics: {}, {}",
            config.kafka_command_topic, config.kafka_live_view_topic
        );
        Ok(Self {
            producer,
            command_topic: config.kafka_command_topic.clone(),
            live_view_topic: config.kafka_live_view_topic.clone(),
        })
    }

    async fn produce(&self, topic: &str, key: &str, payload: &[u8]) -> anyhow::Result<(i32, i64)> {
        let record = FutureRecord::to(topic).key(key).payload(payload);
        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| anyhow!("failed to publish to {}: {}", topic, e))
    }
}

#[async_trait]
impl PrimaryChannel for KafkaOutbound {
    async fn send_command(&self, device_id: &str, envelope: &CommandEnvelope) -> anyhow::Result<()> {
        let payload = envelope.encode_to_vec();
        let (partition, offset) = self
            .produce(&self.command_topic, device_id, &payload)
            .await
            .map_err(|e| anyhow!("command {}: {}", envelope.command_id, e))?;
        debug!(
            device_id = %device_id,
            command_id = %envelope.command_id,
            partition,
            offset,
            "command published"
        );
        Ok(())
    }
}

#[async_trait]
impl LiveViewSink for KafkaOutbound {
    async fn publish(&self, view: &LiveView) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(view)?;
        let key = view.vehicle_id.to_string();
        self.produce(&self.live_view_topic, &key, &payload).await?;
        Ok(())
    }
}
