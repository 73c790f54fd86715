use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Booking, BookingStatus};
use crate::services::bookings::{self as booking_service, BlockRequest, BookingRequest, ManualSessionRequest};
use crate::state::AppState;

use super::{check_auth, parse_datetime, parse_session_type};

#[derive(Serialize)]
pub struct BookingResponse {
    pub id: String,
    pub customer_id: Option<String>,
    pub teacher_id: String,
    pub package_id: Option<String>,
    pub session_type: String,
    pub start_time: String,
    pub end_time: String,
    pub status: String,
    pub notes: Option<String>,
    pub cancellation_reason: Option<String>,
    pub confirmed_at: Option<String>,
    pub attendance_marked_at: Option<String>,
}

pub(crate) fn booking_response(b: Booking) -> BookingResponse {
    BookingResponse {
        id: b.id,
        customer_id: b.customer_id,
        teacher_id: b.teacher_id,
        package_id: b.package_id,
        session_type: b.session_type.as_str().to_string(),
        start_time: queries::fmt_dt(&b.start_time),
        end_time: queries::fmt_dt(&b.end_time),
        status: b.status.as_str().to_string(),
        notes: b.notes,
        cancellation_reason: b.cancellation_reason,
        confirmed_at: b.confirmed_at.map(|dt| queries::fmt_dt(&dt)),
        attendance_marked_at: b.attendance_marked_at.map(|dt| queries::fmt_dt(&dt)),
    }
}

// POST /api/bookings
#[derive(Deserialize)]
pub struct CreateBookingBody {
    pub customer_id: String,
    pub teacher_id: String,
    pub package_id: Option<String>,
    pub session_type: String,
    pub start_time: String,
    pub end_time: String,
    pub notes: Option<String>,
}

pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateBookingBody>,
) -> Result<Json<BookingResponse>, AppError> {
    let idempotency_key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let req = BookingRequest {
        customer_id: body.customer_id,
        teacher_id: body.teacher_id,
        package_id: body.package_id,
        session_type: parse_session_type(&body.session_type)?,
        start_time: parse_datetime(&body.start_time)?,
        end_time: parse_datetime(&body.end_time)?,
        notes: body.notes,
        idempotency_key,
    };

    let booking = booking_service::request_booking(&state, req).await?;
    Ok(Json(booking_response(booking)))
}

// GET /api/bookings
#[derive(Deserialize)]
pub struct BookingsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<BookingsQuery>,
) -> Result<Json<Vec<BookingResponse>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let bookings = {
        let db = state.db.lock().unwrap();
        queries::list_bookings(&db, query.status.as_deref(), query.limit.unwrap_or(50))?
    };

    Ok(Json(bookings.into_iter().map(booking_response).collect()))
}

// GET /api/bookings/:id
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BookingResponse>, AppError> {
    let booking = {
        let db = state.db.lock().unwrap();
        queries::get_booking_by_id(&db, &id)?
    };

    match booking {
        Some(b) => Ok(Json(booking_response(b))),
        None => Err(AppError::NotFound(format!("booking {id}"))),
    }
}

// POST /api/bookings/:id/confirm
#[derive(Deserialize)]
pub struct ConfirmBody {
    pub confirmed_by: Option<String>,
    pub notes: Option<String>,
}

pub async fn confirm_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<ConfirmBody>>,
) -> Result<Json<BookingResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let (confirmed_by, notes) = match body {
        Some(Json(b)) => (b.confirmed_by, b.notes),
        None => (None, None),
    };
    let confirmed_by = confirmed_by.unwrap_or_else(|| "teacher".to_string());

    let booking = booking_service::confirm_booking(&state, &id, &confirmed_by, notes).await?;
    Ok(Json(booking_response(booking)))
}

#[derive(Deserialize)]
pub struct ReasonBody {
    pub reason: Option<String>,
}

// POST /api/bookings/:id/reject
pub async fn reject_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<ReasonBody>>,
) -> Result<Json<BookingResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let reason = body.and_then(|Json(b)| b.reason);
    let booking = booking_service::reject_booking(&state, &id, reason).await?;
    Ok(Json(booking_response(booking)))
}

// POST /api/bookings/:id/cancel
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<ReasonBody>>,
) -> Result<Json<BookingResponse>, AppError> {
    let reason = body.and_then(|Json(b)| b.reason);
    let booking = booking_service::request_cancellation(&state, &id, reason).await?;
    Ok(Json(booking_response(booking)))
}

// POST /api/admin/bookings/:id/cancel (staff override, no policy window)
pub async fn direct_cancel(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<ReasonBody>>,
) -> Result<Json<BookingResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let reason = body.and_then(|Json(b)| b.reason);
    let booking = booking_service::cancel_booking_direct(&state, &id, reason).await?;
    Ok(Json(booking_response(booking)))
}

// POST /api/bookings/:id/cancel/approve
pub async fn approve_cancellation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<BookingResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let booking = booking_service::approve_cancellation(&state, &id).await?;
    Ok(Json(booking_response(booking)))
}

// POST /api/bookings/:id/cancel/reject
pub async fn reject_cancellation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<BookingResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let booking = booking_service::reject_cancellation(&state, &id).await?;
    Ok(Json(booking_response(booking)))
}

// POST /api/bookings/:id/attendance
#[derive(Deserialize)]
pub struct AttendanceBody {
    pub outcome: String,
}

pub async fn mark_attendance(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<AttendanceBody>,
) -> Result<Json<BookingResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let outcome = match body.outcome.as_str() {
        "completed" => BookingStatus::Completed,
        "no_show" => BookingStatus::NoShow,
        "cancelled" => BookingStatus::Cancelled,
        other => {
            return Err(AppError::Validation(format!(
                "unknown attendance outcome: {other}"
            )))
        }
    };

    let booking = booking_service::mark_attendance(&state, &id, outcome).await?;
    Ok(Json(booking_response(booking)))
}

// POST /api/sessions
#[derive(Deserialize)]
pub struct ManualSessionBody {
    pub customer_id: String,
    pub teacher_id: String,
    pub package_id: Option<String>,
    pub session_type: String,
    pub start_time: String,
    pub end_time: String,
    pub notes: Option<String>,
    pub created_by: Option<String>,
}

pub async fn create_manual_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ManualSessionBody>,
) -> Result<Json<BookingResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let req = ManualSessionRequest {
        customer_id: body.customer_id,
        teacher_id: body.teacher_id.clone(),
        package_id: body.package_id,
        session_type: parse_session_type(&body.session_type)?,
        start_time: parse_datetime(&body.start_time)?,
        end_time: parse_datetime(&body.end_time)?,
        notes: body.notes,
        created_by: body.created_by.unwrap_or(body.teacher_id),
    };

    let booking = booking_service::create_manual_session(&state, req).await?;
    Ok(Json(booking_response(booking)))
}

// POST /api/blocks
#[derive(Deserialize)]
pub struct BlockBody {
    pub teacher_id: String,
    pub start_time: String,
    pub end_time: String,
    pub notes: Option<String>,
}

pub async fn create_block(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<BlockBody>,
) -> Result<Json<BookingResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let req = BlockRequest {
        teacher_id: body.teacher_id.clone(),
        start_time: parse_datetime(&body.start_time)?,
        end_time: parse_datetime(&body.end_time)?,
        notes: body.notes,
        created_by: body.teacher_id,
    };

    let booking = booking_service::block_slot(&state, req).await?;
    Ok(Json(booking_response(booking)))
}

// DELETE /api/blocks/:id
pub async fn delete_block(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    booking_service::unblock_slot(&state, &id).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}
