use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use studiobook::clock::SystemClock;
use studiobook::config::AppConfig;
use studiobook::db;
use studiobook::handlers;
use studiobook::services::calendar::{CalendarSync, NoopCalendar, WebhookCalendar};
use studiobook::services::notify::{LogNotifier, Notifier, WebhookNotifier};
use studiobook::services::sweep;
use studiobook::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;

    let calendar: Box<dyn CalendarSync> = if config.calendar_webhook_url.is_empty() {
        tracing::info!("calendar sync disabled");
        Box::new(NoopCalendar)
    } else {
        tracing::info!(url = %config.calendar_webhook_url, "using webhook calendar sync");
        Box::new(WebhookCalendar::new(config.calendar_webhook_url.clone()))
    };

    let notifier: Box<dyn Notifier> = if config.notify_webhook_url.is_empty() {
        tracing::info!("using log-only notifier");
        Box::new(LogNotifier)
    } else {
        tracing::info!(url = %config.notify_webhook_url, "using webhook notifier");
        Box::new(WebhookNotifier::new(
            config.notify_webhook_url.clone(),
            config.notify_webhook_token.clone(),
        ))
    };

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        calendar,
        notifier,
        clock: Box::new(SystemClock),
    });

    // Periodic sweep: elapsed confirmed sessions become completed, lapsed
    // packages become expired. Safe to run alongside live requests.
    let sweep_state = Arc::clone(&state);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(
            sweep_state.config.sweep_interval_secs.max(1),
        ));
        loop {
            ticker.tick().await;
            let now = sweep_state.clock.now();
            let result = {
                let db = sweep_state.db.lock().unwrap();
                sweep::run_sweep(&db, now)
            };
            match result {
                Ok(report)
                    if report.completed_bookings + report.expired_packages
                        + report.deleted_blocks
                        > 0 =>
                {
                    tracing::info!(
                        completed = report.completed_bookings,
                        expired = report.expired_packages,
                        deleted_blocks = report.deleted_blocks,
                        "sweep finished"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "sweep failed"),
            }
        }
    });

    let app = handlers::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
