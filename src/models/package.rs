use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::SessionType;

/// A prepaid bundle of sessions owned by one customer.
///
/// `remaining_sessions` and `status` are stored caches kept current by
/// atomic SQL updates; business decisions go through the derived numbers
/// in `services::ledger`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub id: String,
    pub customer_id: String,
    pub session_type: SessionType,
    pub total_sessions: i64,
    pub remaining_sessions: i64,
    pub valid_from: NaiveDateTime,
    pub valid_to: NaiveDateTime,
    pub price_cents: i64,
    pub status: PackageStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Package {
    /// The only place package lifecycle status is computed. The stored
    /// `status` column is a display cache refreshed from this.
    pub fn derived_status(&self, debited: i64, as_of: NaiveDateTime) -> PackageStatus {
        if self.valid_to <= as_of {
            PackageStatus::Expired
        } else if debited >= self.total_sessions {
            PackageStatus::Used
        } else {
            PackageStatus::Active
        }
    }

    pub fn covers_interval(&self, start: NaiveDateTime, end: NaiveDateTime) -> bool {
        start >= self.valid_from && end <= self.valid_to
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Active,
    Used,
    Expired,
}

impl PackageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageStatus::Active => "active",
            PackageStatus::Used => "used",
            PackageStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "used" => PackageStatus::Used,
            "expired" => PackageStatus::Expired,
            _ => PackageStatus::Active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn package(total: i64) -> Package {
        Package {
            id: "pkg-1".to_string(),
            customer_id: "cust-1".to_string(),
            session_type: SessionType::Private,
            total_sessions: total,
            remaining_sessions: total,
            valid_from: dt("2025-06-01 00:00"),
            valid_to: dt("2025-09-01 00:00"),
            price_cents: 50_000,
            status: PackageStatus::Active,
            created_at: dt("2025-06-01 00:00"),
            updated_at: dt("2025-06-01 00:00"),
        }
    }

    #[test]
    fn test_derived_status_active() {
        let pkg = package(10);
        assert_eq!(
            pkg.derived_status(3, dt("2025-07-01 12:00")),
            PackageStatus::Active
        );
    }

    #[test]
    fn test_derived_status_used_when_fully_debited() {
        let pkg = package(10);
        assert_eq!(
            pkg.derived_status(10, dt("2025-07-01 12:00")),
            PackageStatus::Used
        );
    }

    #[test]
    fn test_derived_status_expired_wins_over_used() {
        let pkg = package(10);
        assert_eq!(
            pkg.derived_status(10, dt("2025-09-01 00:00")),
            PackageStatus::Expired
        );
    }

    #[test]
    fn test_covers_interval_boundaries() {
        let pkg = package(10);
        assert!(pkg.covers_interval(dt("2025-06-01 00:00"), dt("2025-06-01 01:00")));
        assert!(pkg.covers_interval(dt("2025-08-31 23:00"), dt("2025-09-01 00:00")));
        assert!(!pkg.covers_interval(dt("2025-05-31 23:00"), dt("2025-06-01 01:00")));
        assert!(!pkg.covers_interval(dt("2025-08-31 23:30"), dt("2025-09-01 00:30")));
    }
}
