use anyhow::Context;
use async_trait::async_trait;

use crate::models::Booking;

/// External calendar collaborator. Best-effort: callers log failures and
/// never let them fail a committed booking transaction.
#[async_trait]
pub trait CalendarSync: Send + Sync {
    async fn create_event(&self, booking: &Booking) -> anyhow::Result<Option<String>>;
    async fn delete_event(&self, booking: &Booking) -> anyhow::Result<()>;
}

/// No-op sync used when no calendar webhook is configured.
pub struct NoopCalendar;

#[async_trait]
impl CalendarSync for NoopCalendar {
    async fn create_event(&self, _booking: &Booking) -> anyhow::Result<Option<String>> {
        Ok(None)
    }

    async fn delete_event(&self, _booking: &Booking) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Pushes events to an external calendar bridge over HTTP.
pub struct WebhookCalendar {
    base_url: String,
    client: reqwest::Client,
}

impl WebhookCalendar {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CalendarSync for WebhookCalendar {
    async fn create_event(&self, booking: &Booking) -> anyhow::Result<Option<String>> {
        let payload = serde_json::json!({
            "booking_id": booking.id,
            "teacher_id": booking.teacher_id,
            "session_type": booking.session_type.as_str(),
            "start_time": booking.start_time.format("%Y-%m-%d %H:%M:%S").to_string(),
            "end_time": booking.end_time.format("%Y-%m-%d %H:%M:%S").to_string(),
        });

        let resp = self
            .client
            .post(format!("{}/events", self.base_url))
            .json(&payload)
            .send()
            .await
            .context("failed to reach calendar webhook")?
            .error_for_status()
            .context("calendar webhook returned error")?;

        let body: serde_json::Value = resp.json().await.unwrap_or(serde_json::json!({}));
        Ok(body
            .get("event_id")
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }

    async fn delete_event(&self, booking: &Booking) -> anyhow::Result<()> {
        let Some(event_id) = booking.calendar_event_id.as_deref() else {
            return Ok(());
        };

        self.client
            .delete(format!("{}/events/{event_id}", self.base_url))
            .send()
            .await
            .context("failed to reach calendar webhook")?
            .error_for_status()
            .context("calendar webhook returned error")?;

        Ok(())
    }
}

// ── ICS rendering ──

fn ics_event(booking: &Booking, studio_name: &str) -> String {
    let dtstart = booking.start_time.format("%Y%m%dT%H%M%S").to_string();
    let dtend = booking.end_time.format("%Y%m%dT%H%M%S").to_string();
    let dtstamp = booking.created_at.format("%Y%m%dT%H%M%S").to_string();
    let uid = format!("{}@studiobook", booking.id);

    let summary = format!(
        "{} session at {} ({})",
        capitalize(booking.session_type.as_str()),
        studio_name,
        booking.teacher_id
    );
    let description = booking.notes.as_deref().unwrap_or("No additional notes");

    format!(
        "BEGIN:VEVENT\r\n\
         UID:{uid}\r\n\
         DTSTAMP:{dtstamp}\r\n\
         DTSTART:{dtstart}\r\n\
         DTEND:{dtend}\r\n\
         SUMMARY:{summary}\r\n\
         DESCRIPTION:{description}\r\n\
         END:VEVENT\r\n"
    )
}

pub fn generate_ics(booking: &Booking, studio_name: &str) -> String {
    format!(
        "BEGIN:VCALENDAR\r\n\
         VERSION:2.0\r\n\
         PRODID:-//Studiobook//Booking Engine//EN\r\n\
         {}\
         END:VCALENDAR\r\n",
        ics_event(booking, studio_name)
    )
}

/// Feed of confirmed bookings, one VEVENT each.
pub fn generate_feed(bookings: &[Booking], studio_name: &str) -> String {
    let events: String = bookings.iter().map(|b| ics_event(b, studio_name)).collect();
    format!(
        "BEGIN:VCALENDAR\r\n\
         VERSION:2.0\r\n\
         PRODID:-//Studiobook//Booking Engine//EN\r\n\
         {events}\
         END:VCALENDAR\r\n"
    )
}

fn capitalize(s: &str) -> String {
    let mut c = s.chars();
    match c.next() {
        None => String::new(),
        Some(f) => f.to_uppercase().to_string() + c.as_str(),
    }
}
