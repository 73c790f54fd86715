use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    pub studio_name: String,
    /// Outbound calendar-sync webhook base URL. Empty = sync disabled.
    pub calendar_webhook_url: String,
    /// Outbound notification webhook URL. Empty = log-only notifier.
    pub notify_webhook_url: String,
    pub notify_webhook_token: String,
    /// How far ahead a booking request may start.
    pub max_advance_days: i64,
    /// Granularity of the availability grid.
    pub slot_minutes: i64,
    pub sweep_interval_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "studiobook.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            studio_name: env::var("STUDIO_NAME").unwrap_or_else(|_| "Studio".to_string()),
            calendar_webhook_url: env::var("CALENDAR_WEBHOOK_URL").unwrap_or_default(),
            notify_webhook_url: env::var("NOTIFY_WEBHOOK_URL").unwrap_or_default(),
            notify_webhook_token: env::var("NOTIFY_WEBHOOK_TOKEN").unwrap_or_default(),
            max_advance_days: env::var("MAX_ADVANCE_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            slot_minutes: env::var("SLOT_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            sweep_interval_secs: env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
        }
    }
}
