use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A reservation of one teacher's time for one customer, or a teacher-only
/// block. Times are a half-open interval: `end_time` is exclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    /// None for blocked entries.
    pub customer_id: Option<String>,
    pub teacher_id: String,
    /// None for blocked entries and package-less manual sessions.
    pub package_id: Option<String>,
    pub session_type: SessionType,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub status: BookingStatus,
    pub notes: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_by: String,
    pub confirmed_at: Option<NaiveDateTime>,
    pub confirmed_by: Option<String>,
    pub attendance_marked_at: Option<NaiveDateTime>,
    pub calendar_event_id: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Booking {
    /// Active bookings hold a slot and reserve a package session.
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    CancellationRequested,
    Cancelled,
    Completed,
    NoShow,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::CancellationRequested => "cancellation_requested",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
            BookingStatus::NoShow => "no_show",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "confirmed" => BookingStatus::Confirmed,
            "cancellation_requested" => BookingStatus::CancellationRequested,
            "cancelled" => BookingStatus::Cancelled,
            "completed" => BookingStatus::Completed,
            "no_show" => BookingStatus::NoShow,
            _ => BookingStatus::Pending,
        }
    }

    /// Active bookings hold their slot and their reserved session. A
    /// cancellation request keeps both until the teacher resolves it.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            BookingStatus::Pending
                | BookingStatus::Confirmed
                | BookingStatus::CancellationRequested
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Cancelled | BookingStatus::Completed | BookingStatus::NoShow
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Private,
    Duo,
    Group,
    /// Teacher unavailability entry. Never references a customer or package.
    Blocked,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Private => "private",
            SessionType::Duo => "duo",
            SessionType::Group => "group",
            SessionType::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "duo" => SessionType::Duo,
            "group" => SessionType::Group,
            "blocked" => SessionType::Blocked,
            _ => SessionType::Private,
        }
    }
}
