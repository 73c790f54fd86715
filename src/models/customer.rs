use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
    /// Count of confirmed bookings this customer later cancelled
    /// (cancellation approvals and attendance-path cancellations).
    pub total_cancellations: i64,
    pub created_at: NaiveDateTime,
}
