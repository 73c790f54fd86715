use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Duration;

use crate::db::queries;
use crate::services::calendar::{generate_feed, generate_ics};
use crate::state::AppState;

const FEED_WINDOW_DAYS: i64 = 60;

// GET /calendar/feed.ics
pub async fn calendar_feed(State(state): State<Arc<AppState>>) -> Response {
    let now = state.clock.now();
    let until = now + Duration::days(FEED_WINDOW_DAYS);

    let bookings = {
        let db = state.db.lock().unwrap();
        match queries::get_confirmed_in_range(&db, &now, &until) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(error = %e, "failed to load bookings for calendar feed");
                return (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response();
            }
        }
    };

    let feed = generate_feed(&bookings, &state.config.studio_name);

    (
        [(header::CONTENT_TYPE, "text/calendar; charset=utf-8")],
        feed,
    )
        .into_response()
}

// GET /calendar/:booking_id
pub async fn download_ics(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> Response {
    // Strip .ics suffix if present
    let booking_id = raw_id.strip_suffix(".ics").unwrap_or(&raw_id);

    let booking = {
        let db = state.db.lock().unwrap();
        match queries::get_booking_by_id(&db, booking_id) {
            Ok(Some(b)) => b,
            Ok(None) => {
                return (StatusCode::NOT_FOUND, "Booking not found").into_response();
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to load booking for .ics");
                return (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response();
            }
        }
    };

    let ics = generate_ics(&booking, &state.config.studio_name);
    let filename = format!("booking-{booking_id}.ics");

    (
        [
            (header::CONTENT_TYPE, "text/calendar; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                &format!("attachment; filename=\"{filename}\""),
            ),
        ],
        ics,
    )
        .into_response()
}
