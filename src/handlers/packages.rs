use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Package, PackageStatus};
use crate::services::ledger::{self, LedgerView};
use crate::state::AppState;

use super::{check_auth, parse_datetime, parse_session_type};

#[derive(Serialize)]
pub struct PackageResponse {
    pub id: String,
    pub customer_id: String,
    pub session_type: String,
    pub total_sessions: i64,
    pub price_cents: i64,
    pub valid_from: String,
    pub valid_to: String,
    /// Stored fast-display counter (decremented at confirmation).
    pub remaining_sessions: i64,
    /// Derived ledger numbers, the source of truth for decisions.
    pub debited: i64,
    pub upcoming: i64,
    pub available_to_book: i64,
    pub status: String,
}

fn package_response(pkg: &Package, ledger: &LedgerView) -> PackageResponse {
    PackageResponse {
        id: pkg.id.clone(),
        customer_id: pkg.customer_id.clone(),
        session_type: pkg.session_type.as_str().to_string(),
        total_sessions: pkg.total_sessions,
        price_cents: pkg.price_cents,
        valid_from: queries::fmt_dt(&pkg.valid_from),
        valid_to: queries::fmt_dt(&pkg.valid_to),
        remaining_sessions: ledger.stored_remaining,
        debited: ledger.debited,
        upcoming: ledger.upcoming,
        available_to_book: ledger.available,
        status: ledger.status.as_str().to_string(),
    }
}

// POST /api/packages
#[derive(Deserialize)]
pub struct CreatePackageBody {
    pub customer_id: String,
    pub session_type: String,
    pub total_sessions: i64,
    pub valid_from: String,
    pub valid_to: String,
    pub price_cents: Option<i64>,
}

pub async fn create_package(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreatePackageBody>,
) -> Result<Json<PackageResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    if body.total_sessions < 1 {
        return Err(AppError::Validation(
            "total_sessions must be at least 1".to_string(),
        ));
    }
    let valid_from = parse_datetime(&body.valid_from)?;
    let valid_to = parse_datetime(&body.valid_to)?;
    if valid_to <= valid_from {
        return Err(AppError::Validation(
            "valid_to must be after valid_from".to_string(),
        ));
    }

    let now = state.clock.now();
    let pkg = Package {
        id: Uuid::new_v4().to_string(),
        customer_id: body.customer_id,
        session_type: parse_session_type(&body.session_type)?,
        total_sessions: body.total_sessions,
        remaining_sessions: body.total_sessions,
        valid_from,
        valid_to,
        price_cents: body.price_cents.unwrap_or(0),
        status: PackageStatus::Active,
        created_at: now,
        updated_at: now,
    };

    let ledger = {
        let db = state.db.lock().unwrap();
        if queries::get_customer(&db, &pkg.customer_id)?.is_none() {
            return Err(AppError::NotFound(format!("customer {}", pkg.customer_id)));
        }
        queries::create_package(&db, &pkg)?;
        ledger::ledger_view(&db, &pkg, now)?
    };

    tracing::info!(package_id = %pkg.id, customer_id = %pkg.customer_id, "package created");
    Ok(Json(package_response(&pkg, &ledger)))
}

// GET /api/packages/:id
pub async fn get_package(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<PackageResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let now = state.clock.now();
    let (pkg, ledger) = {
        let db = state.db.lock().unwrap();
        let pkg = queries::get_package(&db, &id)?
            .ok_or_else(|| AppError::NotFound(format!("package {id}")))?;
        let ledger = ledger::ledger_view(&db, &pkg, now)?;
        (pkg, ledger)
    };

    Ok(Json(package_response(&pkg, &ledger)))
}

// GET /api/customers/:id/packages
pub async fn list_customer_packages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(customer_id): Path<String>,
) -> Result<Json<Vec<PackageResponse>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let now = state.clock.now();
    let response = {
        let db = state.db.lock().unwrap();
        let packages = queries::list_packages_for_customer(&db, &customer_id)?;
        let mut out = Vec::with_capacity(packages.len());
        for pkg in &packages {
            let ledger = ledger::ledger_view(&db, pkg, now)?;
            out.push(package_response(pkg, &ledger));
        }
        out
    };

    Ok(Json(response))
}

// POST /api/packages/:id/reconcile
pub async fn reconcile_package(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ledger::ReconcileReport>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let now = state.clock.now();
    let report = {
        let db = state.db.lock().unwrap();
        let pkg = queries::get_package(&db, &id)?
            .ok_or_else(|| AppError::NotFound(format!("package {id}")))?;
        ledger::reconcile_package(&db, &pkg, now)?
    };

    Ok(Json(report))
}
