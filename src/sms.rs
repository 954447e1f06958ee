//! Outbound SMS through an HTTP gateway.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::config::CommandSettings;
use crate::dispatch::allow_list::mask_number;
use crate::dispatch::SmsGateway;

#[derive(Debug, Serialize)]
struct OutboundSms<'a> {
    to: &'a str,
    body: &'a str,
}

pub struct HttpSmsGateway {
    url: String,
    token: String,
    client: reqwest::Client,
}

impl HttpSmsGateway {
    pub fn new(settings: &CommandSettings) -> Result<Self> {
        // Create HTTP client once for reuse (connection pooling)
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .context("failed to build SMS gateway client")?;
        Ok(Self {
            url: settings.sms_gateway_url.clone(),
            token: settings.sms_gateway_token.clone(),
            client,
        })
    }
}

#[async_trait]
impl SmsGateway for HttpSmsGateway {
    async fn send_text(&self, phone_number: &str, body: &str) -> Result<()> {
        if self.url.is_empty() {
            bail!("SMS gateway URL is not configured");
        }

        let mut request = self.client.post(&self.url).json(&OutboundSms {
            to: phone_number,
            body,
        });
        if !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }

        let response = request
            .send()
            .await
            .context("SMS gateway unreachable")?
            .error_for_status()
            .context("SMS gateway rejected message")?;
        debug!(
            to = %mask_number(phone_number),
            status = %response.status(),
            "SMS accepted by gateway"
        );
        Ok(())
    }
}
