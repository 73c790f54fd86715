use std::collections::BTreeSet;

use chrono::{Duration, NaiveDateTime};
use rusqlite::Connection;
use serde::Serialize;

use crate::db::queries;
use crate::models::{Booking, SessionType};
use crate::services::conflicts::overlaps;

/// Studio-wide cap on distinct teachers holding sessions in the same slot.
pub const MAX_CONCURRENT_TEACHERS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Available,
    Partial,
    Blocked,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotDecision {
    pub status: SlotStatus,
    pub allowed_types: Vec<SessionType>,
    pub reason: Option<String>,
}

impl SlotDecision {
    fn blocked(reason: &str) -> Self {
        Self {
            status: SlotStatus::Blocked,
            allowed_types: vec![],
            reason: Some(reason.to_string()),
        }
    }

    pub fn admits(&self, session_type: SessionType) -> bool {
        self.allowed_types.contains(&session_type)
    }
}

/// Studio capacity rules for a candidate interval, applied in order of
/// severity: the group veto is absolute, then the distinct-teacher cap,
/// then the type restriction. Blocked entries count only against their own
/// teacher. Pass `exclude_id` when re-checking an existing booking (e.g. at
/// confirmation) so it does not collide with itself.
pub fn evaluate_slot(
    bookings: &[Booking],
    start: NaiveDateTime,
    end: NaiveDateTime,
    teacher_id: Option<&str>,
    exclude_id: Option<&str>,
) -> SlotDecision {
    let over: Vec<&Booking> = bookings
        .iter()
        .filter(|b| {
            b.is_active()
                && Some(b.id.as_str()) != exclude_id
                && overlaps(b.start_time, b.end_time, start, end)
        })
        .collect();

    if over
        .iter()
        .any(|b| b.session_type == SessionType::Group)
    {
        return SlotDecision::blocked("a group class occupies the studio during this time");
    }

    if let Some(tid) = teacher_id {
        if over.iter().any(|b| b.teacher_id == tid) {
            return SlotDecision::blocked("the teacher is unavailable during this time");
        }
    }

    // Distinct teachers with real (non-blocked) sessions in the slot,
    // excluding the candidate teacher.
    let other_teachers: BTreeSet<&str> = over
        .iter()
        .filter(|b| b.session_type != SessionType::Blocked)
        .filter(|b| teacher_id != Some(b.teacher_id.as_str()))
        .map(|b| b.teacher_id.as_str())
        .collect();

    if other_teachers.len() >= MAX_CONCURRENT_TEACHERS {
        return SlotDecision::blocked("the studio is at teacher capacity during this time");
    }

    if other_teachers.len() == 1 {
        return SlotDecision {
            status: SlotStatus::Partial,
            allowed_types: vec![SessionType::Private, SessionType::Duo],
            reason: Some("another teacher has a session in this slot".to_string()),
        };
    }

    SlotDecision {
        status: SlotStatus::Available,
        allowed_types: vec![SessionType::Private, SessionType::Duo, SessionType::Group],
        reason: None,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotAvailability {
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub status: SlotStatus,
    pub allowed_types: Vec<SessionType>,
    pub reason: Option<String>,
}

/// Availability view: the requested window cut into fixed-size slots, each
/// evaluated against one snapshot of overlapping bookings.
pub fn availability_grid(
    conn: &Connection,
    start: NaiveDateTime,
    end: NaiveDateTime,
    teacher_id: Option<&str>,
    slot_minutes: i64,
) -> anyhow::Result<Vec<SlotAvailability>> {
    let bookings = queries::get_active_overlapping(conn, &start, &end)?;
    let step = Duration::minutes(slot_minutes.max(1));

    let mut slots = vec![];
    let mut cursor = start;
    while cursor < end {
        let slot_end = (cursor + step).min(end);
        let decision = evaluate_slot(&bookings, cursor, slot_end, teacher_id, None);
        slots.push(SlotAvailability {
            start_time: cursor,
            end_time: slot_end,
            status: decision.status,
            allowed_types: decision.allowed_types,
            reason: decision.reason,
        });
        cursor = slot_end;
    }

    Ok(slots)
}
