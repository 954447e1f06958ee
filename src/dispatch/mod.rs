use anyhow::Result;
use async_trait::async_trait;

use crate::models::command::CommandEnvelope;

pub mod allow_list;
pub mod dispatcher;

/// Realtime command slot of the paired companion device.
#[async_trait]
pub trait PrimaryChannel: Send + Sync + 'static {
    async fn send_command(&self, device_id: &str, envelope: &CommandEnvelope) -> Result<()>;
}

/// Outbound text messages to a phone number.
#[async_trait]
pub trait SmsGateway: Send + Sync + 'static {
    async fn send_text(&self, phone_number: &str, body: &str) -> Result<()>;
}
