use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::allow_list::{mask_number, AllowList};
use super::{PrimaryChannel, SmsGateway};
use crate::config::CommandSettings;
use crate::models::command::{CommandEnvelope, DispatchChannel, DispatchReport, DispatchState};
use crate::models::position::now_millis;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("command {command} could not fall back to SMS: vehicle has no phone number")]
    NoPhoneNumber { command: String },
}

/// Settles a dispatch exactly once, whichever of primary completion or
/// timeout gets there first.
#[derive(Debug, Default)]
struct DispatchTicket {
    settled: AtomicBool,
}

impl DispatchTicket {
    fn settle(&self) -> bool {
        !self.settled.swap(true, Ordering::AcqRel)
    }
}

enum PrimaryOutcome {
    Delivered,
    Failed(anyhow::Error),
    TimedOut,
}

pub struct CommandDispatcher {
    primary: Arc<dyn PrimaryChannel>,
    sms: Arc<dyn SmsGateway>,
    allow_list: AllowList,
    sms_prefix: String,
    sms_permitted: bool,
}

impl CommandDispatcher {
    pub fn new(
        primary: Arc<dyn PrimaryChannel>,
        sms: Arc<dyn SmsGateway>,
        settings: &CommandSettings,
    ) -> Self {
        let allow_list = AllowList::new(settings.sms_approved_numbers.iter().cloned());
        if allow_list.is_empty() {
            warn!("SMS_APPROVED_NUMBERS is empty, SMS fallback will be refused");
        } else {
            info!(approved = allow_list.len(), "SMS allow-list loaded");
        }
        Self {
            primary,
            sms,
            allow_list,
            sms_prefix: settings.sms_command_prefix.clone(),
            sms_permitted: settings.sms_send_permitted,
        }
    }

    /// Sends `command` over the primary channel when a device is paired, falling
    /// back to an SMS to `phone_fallback` on failure or after `timeout`.
    pub async fn dispatch(
        &self,
        device_id: Option<&str>,
        command: &str,
        phone_fallback: Option<&str>,
        timeout: Duration,
    ) -> Result<DispatchReport, DispatchError> {
        let command_id = Uuid::new_v4();
        let device_id = device_id.filter(|d| !d.is_empty());
        let mut history = vec![DispatchState::Pending];

        if let Some(device) = device_id {
            match self.try_primary(command_id, device, command, timeout).await {
                PrimaryOutcome::Delivered => {
                    history.push(DispatchState::Success);
                    info!(
                        command_id = %command_id,
                        device_id = %device,
                        command = %command,
                        "command delivered on primary channel"
                    );
                    return Ok(DispatchReport {
                        command_id,
                        device_id: Some(device.to_string()),
                        command: command.to_string(),
                        channel: DispatchChannel::Primary,
                        history,
                    });
                }
                PrimaryOutcome::TimedOut => {
                    warn!(
                        command_id = %command_id,
                        device_id = %device,
                        "primary channel timed out after {}ms, falling back to SMS",
                        timeout.as_millis()
                    );
                    history.push(DispatchState::Timeout);
                }
                PrimaryOutcome::Failed(e) => {
                    warn!(
                        command_id = %command_id,
                        device_id = %device,
                        "primary channel failed, falling back to SMS: {}",
                        e
                    );
                    history.push(DispatchState::PrimaryFailed);
                }
            }
        }

        let Some(phone) = phone_fallback.filter(|p| !p.trim().is_empty()) else {
            error!(command_id = %command_id, command = %command, "no phone number for SMS fallback");
            return Err(DispatchError::NoPhoneNumber {
                command: command.to_string(),
            });
        };

        let body = format!("{}{}", self.sms_prefix, command);
        let outcome = self.send_sms(phone, &body, &mut history).await;
        debug!(command_id = %command_id, outcome = ?outcome, "SMS fallback finished");

        Ok(DispatchReport {
            command_id,
            device_id: device_id.map(str::to_string),
            command: command.to_string(),
            channel: DispatchChannel::Sms,
            history,
        })
    }

    /// Primary channel only, no timeout or fallback. Used for pairing handshakes.
    pub async fn send_primary(&self, device_id: &str, command: &str) -> anyhow::Result<()> {
        let envelope = envelope(Uuid::new_v4(), device_id, command);
        self.primary.send_command(device_id, &envelope).await
    }

    /// Free-form SMS (no command prefix) through the same permission and
    /// allow-list gate as command fallbacks.
    pub async fn send_alert(&self, phone_number: &str, message: &str) -> DispatchState {
        let mut history = Vec::new();
        self.send_sms(phone_number, message, &mut history).await
    }

    async fn try_primary(
        &self,
        command_id: Uuid,
        device_id: &str,
        command: &str,
        timeout: Duration,
    ) -> PrimaryOutcome {
        let ticket = Arc::new(DispatchTicket::default());
        let (tx, mut rx) = oneshot::channel();

        let primary = self.primary.clone();
        let primary_ticket = ticket.clone();
        let device = device_id.to_string();
        let envelope = envelope(command_id, device_id, command);
        let task = tokio::spawn(async move {
            let result = primary.send_command(&device, &envelope).await;
            if primary_ticket.settle() {
                let _ = tx.send(result);
            } else {
                info!(
                    command_id = %envelope.command_id,
                    delivered = result.is_ok(),
                    "primary channel completed after fallback, ignoring"
                );
            }
        });

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(result) => primary_outcome(result),
            Err(_) => {
                if ticket.settle() {
                    task.abort();
                    PrimaryOutcome::TimedOut
                } else {
                    // primary settled just before the timer; its result is in flight
                    primary_outcome(rx.await)
                }
            }
        }
    }

    async fn send_sms(
        &self,
        phone_number: &str,
        body: &str,
        history: &mut Vec<DispatchState>,
    ) -> DispatchState {
        let state = if !self.sms_permitted {
            warn!("SMS permission required to send commands, message dropped");
            DispatchState::PermissionDenied
        } else if !self.allow_list.is_approved(phone_number) {
            warn!(to = %mask_number(phone_number), "SMS to unapproved number blocked");
            DispatchState::FallbackRefused
        } else {
            history.push(DispatchState::FallbackSent);
            match self.sms.send_text(phone_number, body).await {
                Ok(()) => {
                    info!(to = %mask_number(phone_number), "SMS sent");
                    DispatchState::FallbackSuccess
                }
                Err(e) => {
                    error!(to = %mask_number(phone_number), "SMS send failed: {}", e);
                    DispatchState::FallbackFailed
                }
            }
        };
        history.push(state);
        state
    }
}

fn envelope(command_id: Uuid, device_id: &str, command: &str) -> CommandEnvelope {
    CommandEnvelope {
        command_id: command_id.to_string(),
        device_id: device_id.to_string(),
        command: command.to_string(),
        issued_at_ms: now_millis(),
    }
}

fn primary_outcome(
    result: Result<anyhow::Result<()>, oneshot::error::RecvError>,
) -> PrimaryOutcome {
    match result {
        Ok(Ok(())) => PrimaryOutcome::Delivered,
        Ok(Err(e)) => PrimaryOutcome::Failed(e),
        Err(_) => PrimaryOutcome::Failed(anyhow::anyhow!("primary channel task dropped")),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex;
    use tokio::time::Instant;

    pub(crate) const APPROVED: &str = "+15550001111";

    /// `delay: None` never answers.
    pub(crate) struct FakePrimary {
        pub delay: Option<Duration>,
        pub fail: bool,
        pub calls: Mutex<Vec<CommandEnvelope>>,
        pub delivered: AtomicBool,
    }

    impl FakePrimary {
        pub(crate) fn answering_after(ms: u64) -> Arc<Self> {
            Arc::new(Self {
                delay: Some(Duration::from_millis(ms)),
                fail: false,
                calls: Mutex::new(Vec::new()),
                delivered: AtomicBool::new(false),
            })
        }

        pub(crate) fn silent() -> Arc<Self> {
            Arc::new(Self {
                delay: None,
                fail: false,
                calls: Mutex::new(Vec::new()),
                delivered: AtomicBool::new(false),
            })
        }

        pub(crate) fn failing() -> Arc<Self> {
            Arc::new(Self {
                delay: Some(Duration::from_millis(100)),
                fail: true,
                calls: Mutex::new(Vec::new()),
                delivered: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl PrimaryChannel for FakePrimary {
        async fn send_command(&self, _device_id: &str, envelope: &CommandEnvelope) -> anyhow::Result<()> {
            self.calls.lock().await.push(envelope.clone());
            match self.delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => std::future::pending::<()>().await,
            }
            if self.fail {
                anyhow::bail!("write rejected");
            }
            self.delivered.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeSms {
        pub sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl SmsGateway for FakeSms {
        async fn send_text(&self, phone_number: &str, body: &str) -> anyhow::Result<()> {
            self.sent
                .lock()
                .await
                .push((phone_number.to_string(), body.to_string()));
            Ok(())
        }
    }

    pub(crate) fn dispatcher(
        primary: Arc<FakePrimary>,
        sms: Arc<FakeSms>,
        permitted: bool,
    ) -> CommandDispatcher {
        let settings = CommandSettings {
            sms_approved_numbers: vec![APPROVED.to_string()],
            sms_send_permitted: permitted,
            ..CommandSettings::default()
        };
        CommandDispatcher::new(primary, sms, &settings)
    }

    const TIMEOUT: Duration = Duration::from_millis(5_000);

    fn assert_elapsed(start: Instant, expected_ms: u64) {
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(expected_ms)
                && elapsed < Duration::from_millis(expected_ms + 50),
            "elapsed {:?}, expected ~{}ms",
            elapsed,
            expected_ms
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_success_before_timeout_sends_no_sms() {
        let primary = FakePrimary::answering_after(3_000);
        let sms = Arc::new(FakeSms::default());
        let dispatcher = dispatcher(primary.clone(), sms.clone(), true);

        let start = Instant::now();
        let report = dispatcher
            .dispatch(Some("deviceA"), "TRACK", Some(APPROVED), TIMEOUT)
            .await
            .unwrap();
        assert_elapsed(start, 3_000);
        assert_eq!(report.outcome(), DispatchState::Success);
        assert_eq!(report.channel, DispatchChannel::Primary);

        // the disarmed timer must not fire a late fallback
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(sms.sent.lock().await.is_empty());
        assert_eq!(primary.calls.lock().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_back_to_sms_once() {
        let primary = FakePrimary::silent();
        let sms = Arc::new(FakeSms::default());
        let dispatcher = dispatcher(primary, sms.clone(), true);

        let start = Instant::now();
        let report = dispatcher
            .dispatch(Some("deviceB"), "TRACK", Some(APPROVED), TIMEOUT)
            .await
            .unwrap();
        assert_elapsed(start, 5_000);
        assert_eq!(
            report.history,
            vec![
                DispatchState::Pending,
                DispatchState::Timeout,
                DispatchState::FallbackSent,
                DispatchState::FallbackSuccess
            ]
        );
        let sent = sms.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], (APPROVED.to_string(), "PIN:1234:TRACK".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_primary_completion_is_ignored() {
        let primary = FakePrimary::answering_after(7_000);
        let sms = Arc::new(FakeSms::default());
        let dispatcher = dispatcher(primary.clone(), sms.clone(), true);

        let report = dispatcher
            .dispatch(Some("deviceB"), "STOP", Some(APPROVED), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(report.outcome(), DispatchState::FallbackSuccess);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(sms.sent.lock().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_primary_send_is_aborted() {
        let primary = FakePrimary::answering_after(7_000);
        let sms = Arc::new(FakeSms::default());
        let dispatcher = dispatcher(primary.clone(), sms.clone(), true);

        let report = dispatcher
            .dispatch(Some("deviceB"), "STOP", Some(APPROVED), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(report.history[1], DispatchState::Timeout);
        assert_eq!(primary.calls.lock().await.len(), 1);

        // the send would have finished at 7s had it kept running
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!primary.delivered.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_failure_falls_back_immediately() {
        let sms = Arc::new(FakeSms::default());
        let dispatcher = dispatcher(FakePrimary::failing(), sms.clone(), true);

        let start = Instant::now();
        let report = dispatcher
            .dispatch(Some("deviceA"), "IMMOBILIZE", Some(APPROVED), TIMEOUT)
            .await
            .unwrap();
        assert_elapsed(start, 100);
        assert!(report.history.contains(&DispatchState::PrimaryFailed));
        assert_eq!(report.outcome(), DispatchState::FallbackSuccess);
        assert_eq!(sms.sent.lock().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unapproved_number_is_refused() {
        let sms = Arc::new(FakeSms::default());
        let dispatcher = dispatcher(FakePrimary::silent(), sms.clone(), true);

        let report = dispatcher
            .dispatch(Some("deviceB"), "TRACK", Some("+15559999999"), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(report.outcome(), DispatchState::FallbackRefused);
        assert!(!report.sms_attempted());
        assert!(sms.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_unpaired_vehicle_goes_straight_to_sms() {
        let primary = FakePrimary::silent();
        let sms = Arc::new(FakeSms::default());
        let dispatcher = dispatcher(primary.clone(), sms.clone(), true);

        let report = dispatcher
            .dispatch(Some(""), "START_TRACKING", Some(APPROVED), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(report.channel, DispatchChannel::Sms);
        assert_eq!(report.outcome(), DispatchState::FallbackSuccess);
        assert!(primary.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_permission_drops_command() {
        let sms = Arc::new(FakeSms::default());
        let dispatcher = dispatcher(FakePrimary::silent(), sms.clone(), false);

        let report = dispatcher
            .dispatch(None, "TRACK", Some(APPROVED), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(report.outcome(), DispatchState::PermissionDenied);
        assert!(sms.sent.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_phone_number_is_an_error() {
        let sms = Arc::new(FakeSms::default());
        let dispatcher = dispatcher(FakePrimary::silent(), sms, true);

        let err = dispatcher
            .dispatch(Some("deviceB"), "TRACK", Some("  "), TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoPhoneNumber { .. }));
    }

    #[tokio::test]
    async fn test_empty_allow_list_refuses_every_number() {
        let sms = Arc::new(FakeSms::default());
        let settings = CommandSettings {
            sms_approved_numbers: Vec::new(),
            sms_send_permitted: true,
            ..CommandSettings::default()
        };
        let dispatcher = CommandDispatcher::new(FakePrimary::silent(), sms.clone(), &settings);

        assert_eq!(
            dispatcher.send_alert(APPROVED, "left the area").await,
            DispatchState::FallbackRefused
        );
        assert!(sms.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_alert_sms_has_no_prefix() {
        let sms = Arc::new(FakeSms::default());
        let dispatcher = dispatcher(FakePrimary::silent(), sms.clone(), true);

        let state = dispatcher.send_alert(APPROVED, "left the area").await;
        assert_eq!(state, DispatchState::FallbackSuccess);
        assert_eq!(sms.sent.lock().await[0].1, "left the area");
        assert_eq!(
            dispatcher.send_alert("+15559999999", "left the area").await,
            DispatchState::FallbackRefused
        );
    }
}
