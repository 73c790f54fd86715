use chrono::{Duration, NaiveDateTime};
use rusqlite::Connection;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Booking, BookingStatus, PackageStatus, SessionType};
use crate::services::capacity::{self, SlotDecision, SlotStatus};
use crate::services::conflicts;
use crate::services::ledger;
use crate::services::notify::NotifyEvent;
use crate::services::policy::{self, CancellationDecision};
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub customer_id: String,
    pub teacher_id: String,
    pub package_id: Option<String>,
    pub session_type: SessionType,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub notes: Option<String>,
    pub idempotency_key: Option<String>,
}

/// A teacher-entered session that skips the request step and is confirmed
/// (and debited) at creation. May lie in the past.
#[derive(Debug, Clone)]
pub struct ManualSessionRequest {
    pub customer_id: String,
    pub teacher_id: String,
    pub package_id: Option<String>,
    pub session_type: SessionType,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub notes: Option<String>,
    pub created_by: String,
}

#[derive(Debug, Clone)]
pub struct BlockRequest {
    pub teacher_id: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub notes: Option<String>,
    pub created_by: String,
}

/// Admission + creation of a PENDING booking. The conflict detector runs
/// before the capacity calculator so double-booking fails fast with a
/// specific message; the whole check-then-insert runs under the connection
/// lock, with the partial unique index as the storage-level backstop.
pub async fn request_booking(state: &AppState, req: BookingRequest) -> Result<Booking, AppError> {
    validate_interval(req.start_time, req.end_time)?;
    if req.session_type == SessionType::Blocked {
        return Err(AppError::Validation(
            "blocked time is created through the block endpoint".to_string(),
        ));
    }

    let now = state.clock.now();
    check_advance_window(&state.config, now, req.start_time)?;

    let booking = {
        let conn = state.db.lock().unwrap();

        if let Some(key) = req.idempotency_key.as_deref() {
            if let Some(existing) = queries::get_booking_by_idempotency_key(&conn, key)? {
                tracing::info!(booking_id = %existing.id, "replayed booking request by idempotency key");
                return Ok(existing);
            }
        }

        if let Some(pkg_id) = req.package_id.as_deref() {
            check_package(&conn, pkg_id, &req.customer_id, req.session_type, req.start_time, req.end_time, now)?;
        }

        let overlapping = queries::get_active_overlapping(&conn, &req.start_time, &req.end_time)?;

        if conflicts::customer_overlap(&overlapping, &req.customer_id, req.start_time, req.end_time)
            .is_some()
        {
            return Err(AppError::Conflict(
                "the customer already has a booking that overlaps this time".to_string(),
            ));
        }
        if conflicts::teacher_overlap(&overlapping, &req.teacher_id, req.start_time, req.end_time)
            .is_some()
        {
            return Err(AppError::Conflict(
                "the teacher already has a booking in this time slot".to_string(),
            ));
        }

        let decision = capacity::evaluate_slot(
            &overlapping,
            req.start_time,
            req.end_time,
            Some(&req.teacher_id),
            None,
        );
        admit(&decision, req.session_type)?;

        let booking = Booking {
            id: Uuid::new_v4().to_string(),
            customer_id: Some(req.customer_id.clone()),
            teacher_id: req.teacher_id.clone(),
            package_id: req.package_id.clone(),
            session_type: req.session_type,
            start_time: req.start_time,
            end_time: req.end_time,
            status: BookingStatus::Pending,
            notes: req.notes.clone(),
            cancellation_reason: None,
            created_by: req.customer_id.clone(),
            confirmed_at: None,
            confirmed_by: None,
            attendance_marked_at: None,
            calendar_event_id: None,
            created_at: now,
            updated_at: now,
        };
        insert_guarded(&conn, &booking, req.idempotency_key.as_deref())?
    };

    tracing::info!(booking_id = %booking.id, teacher_id = %booking.teacher_id, "booking requested");
    send_notification(state, NotifyEvent::BookingRequested, &booking).await;
    Ok(booking)
}

/// PENDING → CONFIRMED. Re-checks capacity (the slot may have filled since
/// the request) and debits the package inside one transaction; the
/// conditional update means a raced second confirm sees a StateError and
/// the package is debited exactly once.
pub async fn confirm_booking(
    state: &AppState,
    id: &str,
    confirmed_by: &str,
    notes_override: Option<String>,
) -> Result<Booking, AppError> {
    let now = state.clock.now();

    let booking = {
        let mut conn = state.db.lock().unwrap();
        let tx = conn.transaction()?;

        let booking = get_required(&tx, id)?;
        if booking.status != BookingStatus::Pending {
            return Err(AppError::State(format!(
                "booking is {}",
                booking.status.as_str()
            )));
        }

        let overlapping =
            queries::get_active_overlapping(&tx, &booking.start_time, &booking.end_time)?;
        let others: Vec<Booking> = overlapping
            .into_iter()
            .filter(|b| b.id != booking.id)
            .collect();
        if conflicts::teacher_overlap(&others, &booking.teacher_id, booking.start_time, booking.end_time)
            .is_some()
        {
            return Err(AppError::Conflict(
                "the teacher already has a booking in this time slot".to_string(),
            ));
        }
        let decision = capacity::evaluate_slot(
            &others,
            booking.start_time,
            booking.end_time,
            Some(&booking.teacher_id),
            None,
        );
        admit(&decision, booking.session_type)?;

        if !queries::confirm_pending(&tx, id, confirmed_by, notes_override.as_deref(), &now)? {
            return Err(AppError::State("booking is no longer pending".to_string()));
        }
        if let Some(pkg_id) = booking.package_id.as_deref() {
            if !queries::debit_package(&tx, pkg_id, &now)? {
                return Err(AppError::PackageDepleted);
            }
        }
        tx.commit()?;

        get_required(&conn, id)?
    };

    tracing::info!(booking_id = %booking.id, "booking confirmed");
    store_calendar_event(state, &booking).await;
    send_notification(state, NotifyEvent::BookingConfirmed, &booking).await;
    Ok(booking)
}

/// PENDING → CANCELLED. The session was never debited, so no refund.
pub async fn reject_booking(
    state: &AppState,
    id: &str,
    reason: Option<String>,
) -> Result<Booking, AppError> {
    let now = state.clock.now();

    let booking = {
        let conn = state.db.lock().unwrap();
        let booking = get_required(&conn, id)?;
        if booking.status != BookingStatus::Pending {
            return Err(AppError::State(format!(
                "booking is {}",
                booking.status.as_str()
            )));
        }
        if !queries::cancel_if_status(&conn, id, BookingStatus::Pending, reason.as_deref(), &now)? {
            return Err(AppError::State("booking is no longer pending".to_string()));
        }
        get_required(&conn, id)?
    };

    send_notification(state, NotifyEvent::BookingRejected, &booking).await;
    Ok(booking)
}

/// Customer-initiated cancellation of a CONFIRMED booking, routed by the
/// cancellation-window policy.
pub async fn request_cancellation(
    state: &AppState,
    id: &str,
    reason: Option<String>,
) -> Result<Booking, AppError> {
    let now = state.clock.now();

    let (booking, decision) = {
        let mut conn = state.db.lock().unwrap();
        let booking = get_required(&conn, id)?;
        if booking.status != BookingStatus::Confirmed {
            return Err(AppError::State(format!(
                "only a confirmed booking can be cancelled; booking is {}",
                booking.status.as_str()
            )));
        }

        let decision = policy::evaluate_cancellation(now, booking.start_time);
        match decision {
            CancellationDecision::AlreadyStarted => {
                return Err(AppError::Policy("the session has already started".to_string()));
            }
            CancellationDecision::TooLate => {
                return Err(AppError::Policy(format!(
                    "cannot cancel within {} hours of the start time",
                    policy::APPROVAL_WINDOW_HOURS
                )));
            }
            CancellationDecision::RequiresApproval => {
                if !queries::request_cancellation(&conn, id, reason.as_deref(), &now)? {
                    return Err(AppError::State("booking is no longer confirmed".to_string()));
                }
            }
            CancellationDecision::Direct => {
                let tx = conn.transaction()?;
                if !queries::cancel_if_status(
                    &tx,
                    id,
                    BookingStatus::Confirmed,
                    reason.as_deref(),
                    &now,
                )? {
                    return Err(AppError::State("booking is no longer confirmed".to_string()));
                }
                if let Some(pkg_id) = booking.package_id.as_deref() {
                    queries::refund_package(&tx, pkg_id, &now)?;
                }
                tx.commit()?;
            }
        }

        (get_required(&conn, id)?, decision)
    };

    match decision {
        CancellationDecision::RequiresApproval => {
            tracing::info!(booking_id = %booking.id, "cancellation awaiting teacher approval");
            send_notification(state, NotifyEvent::CancellationRequested, &booking).await;
        }
        CancellationDecision::Direct => {
            tracing::info!(booking_id = %booking.id, "booking cancelled with refund");
            delete_calendar_event(state, &booking).await;
            send_notification(state, NotifyEvent::BookingCancelled, &booking).await;
        }
        _ => {}
    }
    Ok(booking)
}

/// CANCELLATION_REQUESTED → CANCELLED: refund the package and count the
/// late cancellation against the customer.
pub async fn approve_cancellation(state: &AppState, id: &str) -> Result<Booking, AppError> {
    let now = state.clock.now();

    let booking = {
        let mut conn = state.db.lock().unwrap();
        let tx = conn.transaction()?;

        let booking = get_required(&tx, id)?;
        if booking.status != BookingStatus::CancellationRequested {
            return Err(AppError::State(format!(
                "no cancellation to approve; booking is {}",
                booking.status.as_str()
            )));
        }

        if !queries::cancel_if_status(&tx, id, BookingStatus::CancellationRequested, None, &now)? {
            return Err(AppError::State(
                "booking is no longer awaiting cancellation approval".to_string(),
            ));
        }
        if let Some(pkg_id) = booking.package_id.as_deref() {
            queries::refund_package(&tx, pkg_id, &now)?;
        }
        if let Some(customer_id) = booking.customer_id.as_deref() {
            queries::increment_customer_cancellations(&tx, customer_id)?;
        }
        tx.commit()?;

        get_required(&conn, id)?
    };

    tracing::info!(booking_id = %booking.id, "cancellation approved");
    delete_calendar_event(state, &booking).await;
    send_notification(state, NotifyEvent::BookingCancelled, &booking).await;
    Ok(booking)
}

/// CANCELLATION_REQUESTED → CONFIRMED, clearing the stored reason.
pub async fn reject_cancellation(state: &AppState, id: &str) -> Result<Booking, AppError> {
    let now = state.clock.now();

    let booking = {
        let conn = state.db.lock().unwrap();
        let booking = get_required(&conn, id)?;
        if booking.status != BookingStatus::CancellationRequested {
            return Err(AppError::State(format!(
                "no cancellation to reject; booking is {}",
                booking.status.as_str()
            )));
        }
        if !queries::revert_cancellation_request(&conn, id, &now)? {
            return Err(AppError::State(
                "booking is no longer awaiting cancellation approval".to_string(),
            ));
        }
        get_required(&conn, id)?
    };

    send_notification(state, NotifyEvent::CancellationRejected, &booking).await;
    Ok(booking)
}

/// Teacher/admin override: cancel a pending or confirmed booking outside
/// the customer cancellation-window policy. Refunds only when the booking
/// had been confirmed (and debited); never counts against the customer.
pub async fn cancel_booking_direct(
    state: &AppState,
    id: &str,
    reason: Option<String>,
) -> Result<Booking, AppError> {
    let now = state.clock.now();

    let (booking, was_confirmed) = {
        let mut conn = state.db.lock().unwrap();
        let booking = get_required(&conn, id)?;

        match booking.status {
            BookingStatus::Pending => {
                if !queries::cancel_if_status(
                    &conn,
                    id,
                    BookingStatus::Pending,
                    reason.as_deref(),
                    &now,
                )? {
                    return Err(AppError::State("booking is no longer pending".to_string()));
                }
                (get_required(&conn, id)?, false)
            }
            BookingStatus::Confirmed => {
                let tx = conn.transaction()?;
                if !queries::cancel_if_status(
                    &tx,
                    id,
                    BookingStatus::Confirmed,
                    reason.as_deref(),
                    &now,
                )? {
                    return Err(AppError::State("booking is no longer confirmed".to_string()));
                }
                if let Some(pkg_id) = booking.package_id.as_deref() {
                    queries::refund_package(&tx, pkg_id, &now)?;
                }
                tx.commit()?;
                (get_required(&conn, id)?, true)
            }
            status => {
                return Err(AppError::State(format!(
                    "booking is {}",
                    status.as_str()
                )));
            }
        }
    };

    tracing::info!(booking_id = %booking.id, "booking cancelled by staff");
    if was_confirmed {
        delete_calendar_event(state, &booking).await;
    }
    send_notification(state, NotifyEvent::BookingCancelled, &booking).await;
    Ok(booking)
}

/// Terminal attendance transitions from CONFIRMED. Completed and no-show
/// leave the ledger alone (the session was debited at confirmation). A
/// cancellation recorded through this path refunds the package and counts
/// against the customer.
pub async fn mark_attendance(
    state: &AppState,
    id: &str,
    outcome: BookingStatus,
) -> Result<Booking, AppError> {
    if !matches!(
        outcome,
        BookingStatus::Completed | BookingStatus::NoShow | BookingStatus::Cancelled
    ) {
        return Err(AppError::Validation(
            "attendance outcome must be completed, no_show, or cancelled".to_string(),
        ));
    }

    let now = state.clock.now();

    let booking = {
        let mut conn = state.db.lock().unwrap();
        let booking = get_required(&conn, id)?;
        if booking.status != BookingStatus::Confirmed {
            return Err(AppError::State(format!(
                "attendance can only be marked on a confirmed booking; booking is {}",
                booking.status.as_str()
            )));
        }

        match outcome {
            BookingStatus::Completed | BookingStatus::NoShow => {
                if !queries::mark_attendance(&conn, id, outcome, &now)? {
                    return Err(AppError::State("booking is no longer confirmed".to_string()));
                }
            }
            BookingStatus::Cancelled => {
                let tx = conn.transaction()?;
                if !queries::cancel_if_status(
                    &tx,
                    id,
                    BookingStatus::Confirmed,
                    Some("cancelled at attendance"),
                    &now,
                )? {
                    return Err(AppError::State("booking is no longer confirmed".to_string()));
                }
                if let Some(pkg_id) = booking.package_id.as_deref() {
                    queries::refund_package(&tx, pkg_id, &now)?;
                }
                if let Some(customer_id) = booking.customer_id.as_deref() {
                    queries::increment_customer_cancellations(&tx, customer_id)?;
                }
                tx.commit()?;
            }
            _ => unreachable!(),
        }

        get_required(&conn, id)?
    };

    if booking.status == BookingStatus::Cancelled {
        delete_calendar_event(state, &booking).await;
    }
    send_notification(state, NotifyEvent::AttendanceMarked, &booking).await;
    Ok(booking)
}

/// Teacher-entered session: created CONFIRMED and debited immediately.
pub async fn create_manual_session(
    state: &AppState,
    req: ManualSessionRequest,
) -> Result<Booking, AppError> {
    validate_interval(req.start_time, req.end_time)?;
    if req.session_type == SessionType::Blocked {
        return Err(AppError::Validation(
            "blocked time is created through the block endpoint".to_string(),
        ));
    }

    let now = state.clock.now();

    let booking = {
        let mut conn = state.db.lock().unwrap();

        if let Some(pkg_id) = req.package_id.as_deref() {
            check_package(&conn, pkg_id, &req.customer_id, req.session_type, req.start_time, req.end_time, now)?;
        }

        let overlapping = queries::get_active_overlapping(&conn, &req.start_time, &req.end_time)?;
        if conflicts::customer_overlap(&overlapping, &req.customer_id, req.start_time, req.end_time)
            .is_some()
        {
            return Err(AppError::Conflict(
                "the customer already has a booking that overlaps this time".to_string(),
            ));
        }
        if conflicts::teacher_overlap(&overlapping, &req.teacher_id, req.start_time, req.end_time)
            .is_some()
        {
            return Err(AppError::Conflict(
                "the teacher already has a booking in this time slot".to_string(),
            ));
        }
        let decision = capacity::evaluate_slot(
            &overlapping,
            req.start_time,
            req.end_time,
            Some(&req.teacher_id),
            None,
        );
        admit(&decision, req.session_type)?;

        let tx = conn.transaction()?;
        let booking = Booking {
            id: Uuid::new_v4().to_string(),
            customer_id: Some(req.customer_id.clone()),
            teacher_id: req.teacher_id.clone(),
            package_id: req.package_id.clone(),
            session_type: req.session_type,
            start_time: req.start_time,
            end_time: req.end_time,
            status: BookingStatus::Confirmed,
            notes: req.notes.clone(),
            cancellation_reason: None,
            created_by: req.created_by.clone(),
            confirmed_at: Some(now),
            confirmed_by: Some(req.created_by.clone()),
            attendance_marked_at: None,
            calendar_event_id: None,
            created_at: now,
            updated_at: now,
        };
        let booking = insert_guarded(&tx, &booking, None)?;
        if let Some(pkg_id) = booking.package_id.as_deref() {
            if !queries::debit_package(&tx, pkg_id, &now)? {
                return Err(AppError::PackageDepleted);
            }
        }
        tx.commit()?;
        booking
    };

    tracing::info!(booking_id = %booking.id, "manual session recorded");
    if booking.end_time > now {
        store_calendar_event(state, &booking).await;
    }
    send_notification(state, NotifyEvent::BookingConfirmed, &booking).await;
    Ok(booking)
}

/// Reserve teacher time without a customer or package. Blocks only collide
/// with the teacher's own schedule.
pub async fn block_slot(state: &AppState, req: BlockRequest) -> Result<Booking, AppError> {
    validate_interval(req.start_time, req.end_time)?;

    let now = state.clock.now();

    let booking = {
        let conn = state.db.lock().unwrap();

        let overlapping = queries::get_active_overlapping(&conn, &req.start_time, &req.end_time)?;
        if conflicts::teacher_overlap(&overlapping, &req.teacher_id, req.start_time, req.end_time)
            .is_some()
        {
            return Err(AppError::Conflict(
                "the teacher already has a booking in this time slot".to_string(),
            ));
        }

        let booking = Booking {
            id: Uuid::new_v4().to_string(),
            customer_id: None,
            teacher_id: req.teacher_id.clone(),
            package_id: None,
            session_type: SessionType::Blocked,
            start_time: req.start_time,
            end_time: req.end_time,
            status: BookingStatus::Confirmed,
            notes: req.notes.clone(),
            cancellation_reason: None,
            created_by: req.created_by.clone(),
            confirmed_at: Some(now),
            confirmed_by: Some(req.created_by.clone()),
            attendance_marked_at: None,
            calendar_event_id: None,
            created_at: now,
            updated_at: now,
        };
        insert_guarded(&conn, &booking, None)?
    };

    tracing::info!(booking_id = %booking.id, teacher_id = %booking.teacher_id, "time blocked");
    Ok(booking)
}

/// Blocked entries are the one kind of booking that is hard-deleted.
pub async fn unblock_slot(state: &AppState, id: &str) -> Result<(), AppError> {
    let conn = state.db.lock().unwrap();
    let booking = get_required(&conn, id)?;
    if booking.session_type != SessionType::Blocked {
        return Err(AppError::Validation(
            "only blocked entries can be deleted".to_string(),
        ));
    }
    queries::delete_booking(&conn, id)?;
    tracing::info!(booking_id = %id, "block removed");
    Ok(())
}

// ── Shared pieces ──

fn validate_interval(start: NaiveDateTime, end: NaiveDateTime) -> Result<(), AppError> {
    if end <= start {
        return Err(AppError::Validation(
            "end_time must be after start_time".to_string(),
        ));
    }
    Ok(())
}

fn check_advance_window(
    config: &AppConfig,
    now: NaiveDateTime,
    start: NaiveDateTime,
) -> Result<(), AppError> {
    if start <= now {
        return Err(AppError::OutsideAdvanceWindow(
            "booking must start in the future".to_string(),
        ));
    }
    if start > now + Duration::days(config.max_advance_days) {
        return Err(AppError::OutsideAdvanceWindow(format!(
            "booking may start at most {} days ahead",
            config.max_advance_days
        )));
    }
    Ok(())
}

/// Package admission for a new reservation: right owner, right type, active
/// as derived from the ledger, interval inside the validity period, and at
/// least one session not already spoken for.
fn check_package(
    conn: &Connection,
    pkg_id: &str,
    customer_id: &str,
    session_type: SessionType,
    start: NaiveDateTime,
    end: NaiveDateTime,
    now: NaiveDateTime,
) -> Result<(), AppError> {
    let pkg = queries::get_package(conn, pkg_id)?
        .ok_or_else(|| AppError::NotFound(format!("package {pkg_id}")))?;

    if pkg.customer_id != customer_id {
        return Err(AppError::Validation(
            "package belongs to a different customer".to_string(),
        ));
    }
    if pkg.session_type != session_type {
        return Err(AppError::Validation(
            "package does not cover this session type".to_string(),
        ));
    }

    let debited = queries::debited_count(conn, pkg_id, &now)?;
    match pkg.derived_status(debited, now) {
        PackageStatus::Active => {}
        status => return Err(AppError::PackageInactive(status.as_str().to_string())),
    }
    if !pkg.covers_interval(start, end) {
        return Err(AppError::PackageInvalidPeriod);
    }
    if ledger::available_to_book(conn, &pkg, now)? <= 0 {
        return Err(AppError::PackageDepleted);
    }
    Ok(())
}

fn admit(decision: &SlotDecision, session_type: SessionType) -> Result<(), AppError> {
    if decision.status == SlotStatus::Blocked {
        return Err(AppError::Conflict(
            decision
                .reason
                .clone()
                .unwrap_or_else(|| "the slot is not available".to_string()),
        ));
    }
    if !decision.admits(session_type) {
        return Err(AppError::Conflict(
            "only private or duo sessions may be booked while another teacher has sessions in this slot"
                .to_string(),
        ));
    }
    Ok(())
}

fn get_required(conn: &Connection, id: &str) -> Result<Booking, AppError> {
    queries::get_booking_by_id(conn, id)?.ok_or_else(|| AppError::NotFound(format!("booking {id}")))
}

fn insert_guarded(
    conn: &Connection,
    booking: &Booking,
    idempotency_key: Option<&str>,
) -> Result<Booking, AppError> {
    match queries::create_booking(conn, booking, idempotency_key) {
        Ok(()) => Ok(booking.clone()),
        Err(e) if queries::is_unique_violation(&e) => {
            if let Some(key) = idempotency_key {
                if let Some(existing) = queries::get_booking_by_idempotency_key(conn, key)? {
                    return Ok(existing);
                }
            }
            Err(AppError::Conflict(
                "that time slot was just taken, please pick another".to_string(),
            ))
        }
        Err(e) => Err(e.into()),
    }
}

/// Calendar sync is best-effort: the booking transaction has already
/// committed, so failures are logged and swallowed.
async fn store_calendar_event(state: &AppState, booking: &Booking) {
    match state.calendar.create_event(booking).await {
        Ok(Some(event_id)) => {
            let conn = state.db.lock().unwrap();
            if let Err(e) = queries::set_calendar_event_id(&conn, &booking.id, Some(&event_id)) {
                tracing::warn!(error = %e, booking_id = %booking.id, "failed to store calendar event id");
            }
        }
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(error = %e, booking_id = %booking.id, "calendar sync failed");
        }
    }
}

async fn delete_calendar_event(state: &AppState, booking: &Booking) {
    if let Err(e) = state.calendar.delete_event(booking).await {
        tracing::warn!(error = %e, booking_id = %booking.id, "calendar event deletion failed");
    }
}

async fn send_notification(state: &AppState, event: NotifyEvent, booking: &Booking) {
    let payload = serde_json::json!({
        "booking_id": booking.id,
        "customer_id": booking.customer_id,
        "teacher_id": booking.teacher_id,
        "session_type": booking.session_type.as_str(),
        "start_time": queries::fmt_dt(&booking.start_time),
        "end_time": queries::fmt_dt(&booking.end_time),
        "status": booking.status.as_str(),
        "cancellation_reason": booking.cancellation_reason,
    });

    if let Err(e) = state.notifier.send(event, payload).await {
        tracing::warn!(error = %e, booking_id = %booking.id, "notification failed");
    }
}
