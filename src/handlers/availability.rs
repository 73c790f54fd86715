use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::services::capacity::{self, SlotStatus};
use crate::state::AppState;

use super::parse_datetime;

const MAX_WINDOW_DAYS: i64 = 31;

#[derive(Deserialize)]
pub struct AvailabilityQuery {
    pub from: String,
    pub to: String,
    pub teacher_id: Option<String>,
}

#[derive(Serialize)]
pub struct SlotResponse {
    pub start_time: String,
    pub end_time: String,
    pub status: SlotStatus,
    pub allowed_types: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// GET /api/availability
pub async fn get_availability(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<Vec<SlotResponse>>, AppError> {
    let from = parse_datetime(&query.from)?;
    let to = parse_datetime(&query.to)?;

    if to <= from {
        return Err(AppError::Validation("to must be after from".to_string()));
    }
    if to - from > Duration::days(MAX_WINDOW_DAYS) {
        return Err(AppError::Validation(format!(
            "availability window may span at most {MAX_WINDOW_DAYS} days"
        )));
    }

    let slots = {
        let db = state.db.lock().unwrap();
        capacity::availability_grid(
            &db,
            from,
            to,
            query.teacher_id.as_deref(),
            state.config.slot_minutes,
        )?
    };

    let response = slots
        .into_iter()
        .map(|s| SlotResponse {
            start_time: queries::fmt_dt(&s.start_time),
            end_time: queries::fmt_dt(&s.end_time),
            status: s.status,
            allowed_types: s.allowed_types.iter().map(|t| t.as_str()).collect(),
            reason: s.reason,
        })
        .collect();

    Ok(Json(response))
}
