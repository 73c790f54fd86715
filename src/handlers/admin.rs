use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::Customer;
use crate::services::sweep::{self, SweepReport};
use crate::state::AppState;

use super::check_auth;

// POST /api/customers
#[derive(Deserialize)]
pub struct CreateCustomerBody {
    pub name: String,
    pub phone: Option<String>,
}

#[derive(Serialize)]
pub struct CustomerResponse {
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
    pub total_cancellations: i64,
}

pub async fn create_customer(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateCustomerBody>,
) -> Result<Json<CustomerResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    if body.name.trim().is_empty() {
        return Err(AppError::Validation("name must not be empty".to_string()));
    }

    let customer = Customer {
        id: Uuid::new_v4().to_string(),
        name: body.name.trim().to_string(),
        phone: body.phone,
        total_cancellations: 0,
        created_at: state.clock.now(),
    };

    {
        let db = state.db.lock().unwrap();
        queries::create_customer(&db, &customer)?;
    }

    tracing::info!(customer_id = %customer.id, "customer created");
    Ok(Json(CustomerResponse {
        id: customer.id,
        name: customer.name,
        phone: customer.phone,
        total_cancellations: customer.total_cancellations,
    }))
}

// GET /api/customers/:id
pub async fn get_customer(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<CustomerResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let customer = {
        let db = state.db.lock().unwrap();
        queries::get_customer(&db, &id)?
    }
    .ok_or_else(|| AppError::NotFound(format!("customer {id}")))?;

    Ok(Json(CustomerResponse {
        id: customer.id,
        name: customer.name,
        phone: customer.phone,
        total_cancellations: customer.total_cancellations,
    }))
}

// GET /api/admin/status
#[derive(Serialize)]
pub struct StatusResponse {
    pub pending_requests: i64,
    pub upcoming_confirmed: i64,
    pub active_packages: i64,
}

pub async fn get_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let now = state.clock.now();
    let stats = {
        let db = state.db.lock().unwrap();
        queries::get_studio_stats(&db, &now)?
    };

    Ok(Json(StatusResponse {
        pending_requests: stats.pending_requests,
        upcoming_confirmed: stats.upcoming_confirmed,
        active_packages: stats.active_packages,
    }))
}

// POST /api/admin/sweep
pub async fn run_sweep(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<SweepReport>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let now = state.clock.now();
    let report = {
        let db = state.db.lock().unwrap();
        sweep::run_sweep(&db, now)?
    };

    tracing::info!(
        completed = report.completed_bookings,
        expired = report.expired_packages,
        "manual sweep finished"
    );
    Ok(Json(report))
}
