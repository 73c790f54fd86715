use chrono::NaiveDateTime;

use crate::models::Booking;

/// Half-open interval overlap: [a_start, a_end) intersects [b_start, b_end).
/// Back-to-back slots share a boundary instant and do not overlap.
pub fn overlaps(
    a_start: NaiveDateTime,
    a_end: NaiveDateTime,
    b_start: NaiveDateTime,
    b_end: NaiveDateTime,
) -> bool {
    a_start < b_end && a_end > b_start
}

/// First active booking held by the customer that intersects the candidate
/// interval. Runs before the capacity check so a self double-booking fails
/// fast with a specific message.
pub fn customer_overlap<'a>(
    bookings: &'a [Booking],
    customer_id: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Option<&'a Booking> {
    bookings.iter().find(|b| {
        b.is_active()
            && b.customer_id.as_deref() == Some(customer_id)
            && overlaps(b.start_time, b.end_time, start, end)
    })
}

/// First active booking held by the teacher that intersects the candidate
/// interval. Blocked entries count here: they signal unavailability.
pub fn teacher_overlap<'a>(
    bookings: &'a [Booking],
    teacher_id: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Option<&'a Booking> {
    bookings.iter().find(|b| {
        b.is_active() && b.teacher_id == teacher_id && overlaps(b.start_time, b.end_time, start, end)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookingStatus, SessionType};

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn booking(
        teacher: &str,
        customer: Option<&str>,
        start: &str,
        end: &str,
        status: BookingStatus,
    ) -> Booking {
        Booking {
            id: format!("b-{teacher}-{start}"),
            customer_id: customer.map(str::to_string),
            teacher_id: teacher.to_string(),
            package_id: None,
            session_type: SessionType::Private,
            start_time: dt(start),
            end_time: dt(end),
            status,
            notes: None,
            cancellation_reason: None,
            created_by: "test".to_string(),
            confirmed_at: None,
            confirmed_by: None,
            attendance_marked_at: None,
            calendar_event_id: None,
            created_at: dt("2025-06-01 00:00"),
            updated_at: dt("2025-06-01 00:00"),
        }
    }

    #[test]
    fn test_overlap_half_open() {
        // Adjacent intervals share a boundary and do not overlap
        assert!(!overlaps(
            dt("2025-06-16 10:00"),
            dt("2025-06-16 11:00"),
            dt("2025-06-16 11:00"),
            dt("2025-06-16 12:00"),
        ));
        assert!(overlaps(
            dt("2025-06-16 10:00"),
            dt("2025-06-16 11:00"),
            dt("2025-06-16 10:30"),
            dt("2025-06-16 11:30"),
        ));
        // Containment overlaps
        assert!(overlaps(
            dt("2025-06-16 10:00"),
            dt("2025-06-16 12:00"),
            dt("2025-06-16 10:30"),
            dt("2025-06-16 11:00"),
        ));
    }

    #[test]
    fn test_customer_overlap_matches_only_active() {
        let bookings = vec![
            booking(
                "t1",
                Some("c1"),
                "2025-06-16 10:00",
                "2025-06-16 11:00",
                BookingStatus::Cancelled,
            ),
            booking(
                "t2",
                Some("c1"),
                "2025-06-16 10:00",
                "2025-06-16 11:00",
                BookingStatus::Confirmed,
            ),
        ];

        let hit = customer_overlap(
            &bookings,
            "c1",
            dt("2025-06-16 10:30"),
            dt("2025-06-16 11:30"),
        );
        assert_eq!(hit.map(|b| b.teacher_id.as_str()), Some("t2"));
    }

    #[test]
    fn test_customer_overlap_ignores_other_customers() {
        let bookings = vec![booking(
            "t1",
            Some("c2"),
            "2025-06-16 10:00",
            "2025-06-16 11:00",
            BookingStatus::Confirmed,
        )];

        assert!(customer_overlap(
            &bookings,
            "c1",
            dt("2025-06-16 10:00"),
            dt("2025-06-16 11:00")
        )
        .is_none());
    }

    #[test]
    fn test_teacher_overlap_includes_blocks() {
        let mut block = booking(
            "t1",
            None,
            "2025-06-16 09:00",
            "2025-06-16 12:00",
            BookingStatus::Confirmed,
        );
        block.session_type = SessionType::Blocked;
        let bookings = vec![block];

        assert!(teacher_overlap(
            &bookings,
            "t1",
            dt("2025-06-16 10:00"),
            dt("2025-06-16 11:00")
        )
        .is_some());
        assert!(teacher_overlap(
            &bookings,
            "t2",
            dt("2025-06-16 10:00"),
            dt("2025-06-16 11:00")
        )
        .is_none());
    }
}
