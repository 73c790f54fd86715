use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection};

use crate::models::{Booking, BookingStatus, Customer, Package, PackageStatus, SessionType};

pub const DT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn fmt_dt(dt: &NaiveDateTime) -> String {
    dt.format(DT_FORMAT).to_string()
}

fn parse_dt(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, DT_FORMAT).unwrap_or_else(|_| Utc::now().naive_utc())
}

fn parse_opt_dt(s: Option<String>) -> Option<NaiveDateTime> {
    s.map(|v| parse_dt(&v))
}

/// True when an insert bounced off a unique index, either the active-slot
/// guard or the idempotency key.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::ConstraintViolation)
    )
}

// ── Customers ──

pub fn create_customer(conn: &Connection, customer: &Customer) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO customers (id, name, phone, total_cancellations, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            customer.id,
            customer.name,
            customer.phone,
            customer.total_cancellations,
            fmt_dt(&customer.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_customer(conn: &Connection, id: &str) -> anyhow::Result<Option<Customer>> {
    let result = conn.query_row(
        "SELECT id, name, phone, total_cancellations, created_at FROM customers WHERE id = ?1",
        params![id],
        |row| {
            Ok(Customer {
                id: row.get(0)?,
                name: row.get(1)?,
                phone: row.get(2)?,
                total_cancellations: row.get(3)?,
                created_at: parse_dt(&row.get::<_, String>(4)?),
            })
        },
    );

    match result {
        Ok(customer) => Ok(Some(customer)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn increment_customer_cancellations(conn: &Connection, id: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE customers SET total_cancellations = total_cancellations + 1 WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

// ── Packages ──

pub fn create_package(conn: &Connection, pkg: &Package) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO packages (id, customer_id, session_type, total_sessions, remaining_sessions,
                               valid_from, valid_to, price_cents, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            pkg.id,
            pkg.customer_id,
            pkg.session_type.as_str(),
            pkg.total_sessions,
            pkg.remaining_sessions,
            fmt_dt(&pkg.valid_from),
            fmt_dt(&pkg.valid_to),
            pkg.price_cents,
            pkg.status.as_str(),
            fmt_dt(&pkg.created_at),
            fmt_dt(&pkg.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_package(conn: &Connection, id: &str) -> anyhow::Result<Option<Package>> {
    let result = conn.query_row(
        "SELECT id, customer_id, session_type, total_sessions, remaining_sessions,
                valid_from, valid_to, price_cents, status, created_at, updated_at
         FROM packages WHERE id = ?1",
        params![id],
        |row| Ok(parse_package_row(row)),
    );

    match result {
        Ok(pkg) => Ok(Some(pkg?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn list_packages_for_customer(
    conn: &Connection,
    customer_id: &str,
) -> anyhow::Result<Vec<Package>> {
    let mut stmt = conn.prepare(
        "SELECT id, customer_id, session_type, total_sessions, remaining_sessions,
                valid_from, valid_to, price_cents, status, created_at, updated_at
         FROM packages WHERE customer_id = ?1 ORDER BY valid_from DESC",
    )?;

    let rows = stmt.query_map(params![customer_id], |row| Ok(parse_package_row(row)))?;

    let mut packages = vec![];
    for row in rows {
        packages.push(row??);
    }
    Ok(packages)
}

/// Atomic session debit. Refuses to go below zero; a `false` return means
/// the package was already depleted and the caller must roll back.
pub fn debit_package(conn: &Connection, id: &str, now: &NaiveDateTime) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE packages SET remaining_sessions = remaining_sessions - 1, updated_at = ?1
         WHERE id = ?2 AND remaining_sessions > 0",
        params![fmt_dt(now), id],
    )?;
    Ok(count > 0)
}

/// Atomic session refund, capped at total_sessions.
pub fn refund_package(conn: &Connection, id: &str, now: &NaiveDateTime) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE packages SET remaining_sessions = MIN(total_sessions, remaining_sessions + 1),
                updated_at = ?1
         WHERE id = ?2",
        params![fmt_dt(now), id],
    )?;
    Ok(())
}

/// Overwrite the cached counter and status after a reconciliation pass.
pub fn update_package_cache(
    conn: &Connection,
    id: &str,
    remaining: i64,
    status: PackageStatus,
    now: &NaiveDateTime,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE packages SET remaining_sessions = ?1, status = ?2, updated_at = ?3 WHERE id = ?4",
        params![remaining, status.as_str(), fmt_dt(now), id],
    )?;
    Ok(())
}

pub fn expire_lapsed_packages(conn: &Connection, now: &NaiveDateTime) -> anyhow::Result<usize> {
    let count = conn.execute(
        "UPDATE packages SET status = 'expired', updated_at = ?1
         WHERE status != 'expired' AND valid_to <= ?1",
        params![fmt_dt(now)],
    )?;
    Ok(count)
}

// ── Ledger counts ──
//
// Debited = consumed sessions: completed, no-show, or confirmed bookings
// whose end time has elapsed without anyone marking attendance. Upcoming =
// still-active bookings that have not elapsed. The two sets are disjoint.

pub fn debited_count(
    conn: &Connection,
    package_id: &str,
    as_of: &NaiveDateTime,
) -> anyhow::Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM bookings
         WHERE package_id = ?1
           AND (status IN ('completed', 'no_show')
                OR (status = 'confirmed' AND end_time < ?2))",
        params![package_id, fmt_dt(as_of)],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn upcoming_count(
    conn: &Connection,
    package_id: &str,
    as_of: &NaiveDateTime,
) -> anyhow::Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM bookings
         WHERE package_id = ?1
           AND status IN ('pending', 'confirmed', 'cancellation_requested')
           AND end_time >= ?2",
        params![package_id, fmt_dt(as_of)],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Not-yet-elapsed bookings that have been debited from the stored counter
/// (confirmed, or awaiting cancellation approval). The counter's
/// reconciliation target is `total − debited − upcoming_confirmed`;
/// pending requests have not been debited yet and stay out of it.
pub fn upcoming_confirmed_count(
    conn: &Connection,
    package_id: &str,
    as_of: &NaiveDateTime,
) -> anyhow::Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM bookings
         WHERE package_id = ?1
           AND status IN ('confirmed', 'cancellation_requested')
           AND end_time >= ?2",
        params![package_id, fmt_dt(as_of)],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ── Bookings ──

pub fn create_booking(
    conn: &Connection,
    booking: &Booking,
    idempotency_key: Option<&str>,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO bookings (id, customer_id, teacher_id, package_id, session_type,
                               start_time, end_time, status, notes, cancellation_reason,
                               created_by, confirmed_at, confirmed_by, attendance_marked_at,
                               calendar_event_id, idempotency_key, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        params![
            booking.id,
            booking.customer_id,
            booking.teacher_id,
            booking.package_id,
            booking.session_type.as_str(),
            fmt_dt(&booking.start_time),
            fmt_dt(&booking.end_time),
            booking.status.as_str(),
            booking.notes,
            booking.cancellation_reason,
            booking.created_by,
            booking.confirmed_at.map(|dt| fmt_dt(&dt)),
            booking.confirmed_by,
            booking.attendance_marked_at.map(|dt| fmt_dt(&dt)),
            booking.calendar_event_id,
            idempotency_key,
            fmt_dt(&booking.created_at),
            fmt_dt(&booking.updated_at),
        ],
    )?;
    Ok(())
}

const BOOKING_COLUMNS: &str = "id, customer_id, teacher_id, package_id, session_type,
    start_time, end_time, status, notes, cancellation_reason, created_by,
    confirmed_at, confirmed_by, attendance_marked_at, calendar_event_id,
    created_at, updated_at";

pub fn get_booking_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<Booking>> {
    let result = conn.query_row(
        &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
        params![id],
        |row| Ok(parse_booking_row(row)),
    );

    match result {
        Ok(booking) => Ok(Some(booking?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn get_booking_by_idempotency_key(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<Booking>> {
    let result = conn.query_row(
        &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE idempotency_key = ?1"),
        params![key],
        |row| Ok(parse_booking_row(row)),
    );

    match result {
        Ok(booking) => Ok(Some(booking?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// All slot-holding bookings whose half-open interval intersects
/// [start, end). The conflict detector and capacity calculator both work
/// from this one snapshot.
pub fn get_active_overlapping(
    conn: &Connection,
    start: &NaiveDateTime,
    end: &NaiveDateTime,
) -> anyhow::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE status IN ('pending', 'confirmed', 'cancellation_requested')
           AND start_time < ?1 AND end_time > ?2
         ORDER BY start_time ASC"
    ))?;

    let rows = stmt.query_map(params![fmt_dt(end), fmt_dt(start)], |row| {
        Ok(parse_booking_row(row))
    })?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

pub fn get_confirmed_in_range(
    conn: &Connection,
    start: &NaiveDateTime,
    end: &NaiveDateTime,
) -> anyhow::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE status = 'confirmed' AND start_time >= ?1 AND start_time < ?2
         ORDER BY start_time ASC"
    ))?;

    let rows = stmt.query_map(params![fmt_dt(start), fmt_dt(end)], |row| {
        Ok(parse_booking_row(row))
    })?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

pub fn list_bookings(
    conn: &Connection,
    status_filter: Option<&str>,
    limit: i64,
) -> anyhow::Result<Vec<Booking>> {
    let (sql, params_vec): (String, Vec<Box<dyn rusqlite::types::ToSql>>) = match status_filter {
        Some(status) => (
            format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings WHERE status = ?1
                 ORDER BY start_time DESC LIMIT ?2"
            ),
            vec![
                Box::new(status.to_string()) as Box<dyn rusqlite::types::ToSql>,
                Box::new(limit),
            ],
        ),
        None => (
            format!("SELECT {BOOKING_COLUMNS} FROM bookings ORDER BY start_time DESC LIMIT ?1"),
            vec![Box::new(limit) as Box<dyn rusqlite::types::ToSql>],
        ),
    };

    let mut stmt = conn.prepare(&sql)?;
    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        params_vec.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(params_refs.as_slice(), |row| Ok(parse_booking_row(row)))?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

// ── Booking transitions ──
//
// Every transition is a conditional update. Zero affected rows means the
// booking was not in the expected state (a raced or stale caller) and
// the service surfaces a StateError instead of applying side effects.

pub fn confirm_pending(
    conn: &Connection,
    id: &str,
    confirmed_by: &str,
    notes: Option<&str>,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET status = 'confirmed', confirmed_at = ?1, confirmed_by = ?2,
                notes = COALESCE(?3, notes), updated_at = ?1
         WHERE id = ?4 AND status = 'pending'",
        params![fmt_dt(now), confirmed_by, notes, id],
    )?;
    Ok(count > 0)
}

pub fn cancel_if_status(
    conn: &Connection,
    id: &str,
    from: BookingStatus,
    reason: Option<&str>,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET status = 'cancelled',
                cancellation_reason = COALESCE(?1, cancellation_reason),
                updated_at = ?2
         WHERE id = ?3 AND status = ?4",
        params![reason, fmt_dt(now), id, from.as_str()],
    )?;
    Ok(count > 0)
}

pub fn request_cancellation(
    conn: &Connection,
    id: &str,
    reason: Option<&str>,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET status = 'cancellation_requested', cancellation_reason = ?1,
                updated_at = ?2
         WHERE id = ?3 AND status = 'confirmed'",
        params![reason, fmt_dt(now), id],
    )?;
    Ok(count > 0)
}

pub fn revert_cancellation_request(
    conn: &Connection,
    id: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET status = 'confirmed', cancellation_reason = NULL, updated_at = ?1
         WHERE id = ?2 AND status = 'cancellation_requested'",
        params![fmt_dt(now), id],
    )?;
    Ok(count > 0)
}

pub fn mark_attendance(
    conn: &Connection,
    id: &str,
    outcome: BookingStatus,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET status = ?1, attendance_marked_at = ?2, updated_at = ?2
         WHERE id = ?3 AND status = 'confirmed'",
        params![outcome.as_str(), fmt_dt(now), id],
    )?;
    Ok(count > 0)
}

pub fn set_calendar_event_id(
    conn: &Connection,
    id: &str,
    event_id: Option<&str>,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE bookings SET calendar_event_id = ?1 WHERE id = ?2",
        params![event_id, id],
    )?;
    Ok(())
}

/// Hard delete. Only blocked entries are ever deleted; the service enforces
/// the type check.
pub fn delete_booking(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let count = conn.execute("DELETE FROM bookings WHERE id = ?1", params![id])?;
    Ok(count > 0)
}

/// Sweep step (a): a confirmed session whose end time has elapsed counts as
/// held, so flip it to completed. Re-running matches nothing, so this is
/// idempotent.
pub fn complete_elapsed_confirmed(conn: &Connection, now: &NaiveDateTime) -> anyhow::Result<usize> {
    let count = conn.execute(
        "UPDATE bookings SET status = 'completed', updated_at = ?1
         WHERE status = 'confirmed' AND session_type != 'blocked' AND end_time < ?1",
        params![fmt_dt(now)],
    )?;
    Ok(count)
}

/// Blocked entries past their window are just deleted by the sweep; they
/// carry no ledger state.
pub fn delete_elapsed_blocks(conn: &Connection, now: &NaiveDateTime) -> anyhow::Result<usize> {
    let count = conn.execute(
        "DELETE FROM bookings WHERE session_type = 'blocked' AND end_time < ?1",
        params![fmt_dt(now)],
    )?;
    Ok(count)
}

// ── Dashboard ──

pub struct StudioStats {
    pub pending_requests: i64,
    pub upcoming_confirmed: i64,
    pub active_packages: i64,
}

pub fn get_studio_stats(conn: &Connection, now: &NaiveDateTime) -> anyhow::Result<StudioStats> {
    let now_str = fmt_dt(now);

    let pending_requests: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM bookings WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let upcoming_confirmed: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM bookings
             WHERE status = 'confirmed' AND session_type != 'blocked' AND start_time > ?1",
            params![now_str],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let active_packages: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM packages WHERE status = 'active' AND valid_to > ?1",
            params![now_str],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(StudioStats {
        pending_requests,
        upcoming_confirmed,
        active_packages,
    })
}

// ── Row parsing ──

fn parse_booking_row(row: &rusqlite::Row) -> anyhow::Result<Booking> {
    let status_str: String = row.get(7)?;
    let session_type_str: String = row.get(4)?;

    Ok(Booking {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        teacher_id: row.get(2)?,
        package_id: row.get(3)?,
        session_type: SessionType::parse(&session_type_str),
        start_time: parse_dt(&row.get::<_, String>(5)?),
        end_time: parse_dt(&row.get::<_, String>(6)?),
        status: BookingStatus::parse(&status_str),
        notes: row.get(8)?,
        cancellation_reason: row.get(9)?,
        created_by: row.get(10)?,
        confirmed_at: parse_opt_dt(row.get(11)?),
        confirmed_by: row.get(12)?,
        attendance_marked_at: parse_opt_dt(row.get(13)?),
        calendar_event_id: row.get(14)?,
        created_at: parse_dt(&row.get::<_, String>(15)?),
        updated_at: parse_dt(&row.get::<_, String>(16)?),
    })
}

fn parse_package_row(row: &rusqlite::Row) -> anyhow::Result<Package> {
    let session_type_str: String = row.get(2)?;
    let status_str: String = row.get(8)?;

    Ok(Package {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        session_type: SessionType::parse(&session_type_str),
        total_sessions: row.get(3)?,
        remaining_sessions: row.get(4)?,
        valid_from: parse_dt(&row.get::<_, String>(5)?),
        valid_to: parse_dt(&row.get::<_, String>(6)?),
        price_cents: row.get(7)?,
        status: PackageStatus::parse(&status_str),
        created_at: parse_dt(&row.get::<_, String>(9)?),
        updated_at: parse_dt(&row.get::<_, String>(10)?),
    })
}
