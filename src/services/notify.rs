use anyhow::Context;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyEvent {
    BookingRequested,
    BookingConfirmed,
    BookingRejected,
    CancellationRequested,
    CancellationRejected,
    BookingCancelled,
    AttendanceMarked,
}

impl NotifyEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyEvent::BookingRequested => "booking_requested",
            NotifyEvent::BookingConfirmed => "booking_confirmed",
            NotifyEvent::BookingRejected => "booking_rejected",
            NotifyEvent::CancellationRequested => "cancellation_requested",
            NotifyEvent::CancellationRejected => "cancellation_rejected",
            NotifyEvent::BookingCancelled => "booking_cancelled",
            NotifyEvent::AttendanceMarked => "attendance_marked",
        }
    }
}

/// Fire-and-forget notification collaborator. Failures are logged by the
/// caller and never surface to the booking flow.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, event: NotifyEvent, payload: serde_json::Value) -> anyhow::Result<()>;
}

/// Default notifier: structured log lines only.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, event: NotifyEvent, payload: serde_json::Value) -> anyhow::Result<()> {
        tracing::info!(event = event.as_str(), %payload, "notification");
        Ok(())
    }
}

/// Posts notifications to an external webhook (messaging bridge, admin bot).
pub struct WebhookNotifier {
    url: String,
    token: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: String, token: String) -> Self {
        Self {
            url,
            token,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, event: NotifyEvent, payload: serde_json::Value) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "event": event.as_str(),
            "payload": payload,
        });

        let mut req = self.client.post(&self.url).json(&body);
        if !self.token.is_empty() {
            req = req.bearer_auth(&self.token);
        }

        req.send()
            .await
            .context("failed to reach notify webhook")?
            .error_for_status()
            .context("notify webhook returned error")?;

        Ok(())
    }
}
