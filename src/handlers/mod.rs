pub mod admin;
pub mod availability;
pub mod bookings;
pub mod calendar;
pub mod health;
pub mod packages;

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::routing::{delete, get, post};
use axum::Router;
use chrono::NaiveDateTime;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::models::SessionType;
use crate::state::AppState;

pub(crate) fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

pub(crate) fn parse_datetime(s: &str) -> Result<NaiveDateTime, AppError> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M"))
        .map_err(|_| AppError::Validation(format!("invalid datetime: {s}")))
}

/// Strict session-type parsing for API input; unknown values are rejected
/// rather than defaulted.
pub(crate) fn parse_session_type(s: &str) -> Result<SessionType, AppError> {
    match s {
        "private" => Ok(SessionType::Private),
        "duo" => Ok(SessionType::Duo),
        "group" => Ok(SessionType::Group),
        "blocked" => Ok(SessionType::Blocked),
        _ => Err(AppError::Validation(format!("unknown session type: {s}"))),
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route(
            "/api/bookings",
            post(bookings::create_booking).get(bookings::list_bookings),
        )
        .route("/api/bookings/:id", get(bookings::get_booking))
        .route("/api/bookings/:id/confirm", post(bookings::confirm_booking))
        .route("/api/bookings/:id/reject", post(bookings::reject_booking))
        .route("/api/bookings/:id/cancel", post(bookings::cancel_booking))
        .route(
            "/api/bookings/:id/cancel/approve",
            post(bookings::approve_cancellation),
        )
        .route(
            "/api/bookings/:id/cancel/reject",
            post(bookings::reject_cancellation),
        )
        .route(
            "/api/bookings/:id/attendance",
            post(bookings::mark_attendance),
        )
        .route("/api/sessions", post(bookings::create_manual_session))
        .route("/api/blocks", post(bookings::create_block))
        .route("/api/blocks/:id", delete(bookings::delete_block))
        .route("/api/availability", get(availability::get_availability))
        .route("/api/customers", post(admin::create_customer))
        .route("/api/customers/:id", get(admin::get_customer))
        .route(
            "/api/customers/:id/packages",
            get(packages::list_customer_packages),
        )
        .route("/api/packages", post(packages::create_package))
        .route("/api/packages/:id", get(packages::get_package))
        .route(
            "/api/packages/:id/reconcile",
            post(packages::reconcile_package),
        )
        .route(
            "/api/admin/bookings/:id/cancel",
            post(bookings::direct_cancel),
        )
        .route("/api/admin/status", get(admin::get_status))
        .route("/api/admin/sweep", post(admin::run_sweep))
        .route("/calendar/feed.ics", get(calendar::calendar_feed))
        .route("/calendar/:booking_id", get(calendar::download_ics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
