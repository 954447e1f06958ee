mod config;
mod db;
mod dispatch;
mod kafka;
mod models;
mod processor;
mod sms;

use config::AppConfig;
use db::store::PgStore;
use dispatch::dispatcher::CommandDispatcher;
use processor::alerts::run_alert_worker;
use processor::tracker::Tracker;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const ALERT_QUEUE_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    let config = AppConfig::load()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    info!("Starting Vehicle Tracker Service (Kafka Edition)...");

    // Init DB
    let pool = db::init_pool(&config.database_url).await?;
    db::ensure_schema(&pool).await?;
    info!("Connected to database");
    let store = Arc::new(PgStore::new(pool, config.tracking.history_retention));

    // Command channels
    let outbound = Arc::new(kafka::KafkaOutbound::new(&config)?);
    let sms = Arc::new(sms::HttpSmsGateway::new(&config.commands)?);
    let dispatcher = Arc::new(CommandDispatcher::new(
        outbound.clone(),
        sms,
        &config.commands,
    ));

    let (alert_tx, alert_rx) = mpsc::channel(ALERT_QUEUE_CAPACITY);
    let alert_worker = tokio::spawn(run_alert_worker(alert_rx, dispatcher.clone()));

    let mut tracker = Tracker::new(
        store,
        dispatcher,
        config.tracking.clone(),
        config.commands.timeout(),
        alert_tx,
    )
    .with_live_view_sink(outbound);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutdown requested");
        signal.cancel();
    });

    // Start Kafka
    let result = kafka::run_consumer(&config, &mut tracker, shutdown).await;

    // Flush every open session before exiting
    tracker.shutdown().await;
    drop(tracker);
    if let Err(e) = alert_worker.await {
        error!("Alert worker failed: {}", e);
    }

    result
}
