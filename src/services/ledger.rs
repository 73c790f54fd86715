use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::Serialize;

use crate::db::queries;
use crate::models::{Package, PackageStatus};

/// Derived ledger numbers for one package at one instant. The three-way
/// split always satisfies `debited + upcoming + available == total`.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerView {
    pub package_id: String,
    pub total_sessions: i64,
    pub debited: i64,
    pub upcoming: i64,
    pub available: i64,
    /// Derived remaining count: total − debited.
    pub remaining_sessions: i64,
    /// The cached counter column, reported so drift is visible.
    pub stored_remaining: i64,
    pub status: PackageStatus,
}

pub fn ledger_view(
    conn: &Connection,
    pkg: &Package,
    as_of: NaiveDateTime,
) -> anyhow::Result<LedgerView> {
    let debited = queries::debited_count(conn, &pkg.id, &as_of)?;
    let upcoming = queries::upcoming_count(conn, &pkg.id, &as_of)?;

    Ok(LedgerView {
        package_id: pkg.id.clone(),
        total_sessions: pkg.total_sessions,
        debited,
        upcoming,
        available: pkg.total_sessions - debited - upcoming,
        remaining_sessions: pkg.total_sessions - debited,
        stored_remaining: pkg.remaining_sessions,
        status: pkg.derived_status(debited, as_of),
    })
}

/// Sessions a new booking request may still consume. Must be positive for
/// the request to be accepted.
pub fn available_to_book(
    conn: &Connection,
    pkg: &Package,
    as_of: NaiveDateTime,
) -> anyhow::Result<i64> {
    let debited = queries::debited_count(conn, &pkg.id, &as_of)?;
    let upcoming = queries::upcoming_count(conn, &pkg.id, &as_of)?;
    Ok(pkg.total_sessions - debited - upcoming)
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    #[serde(flatten)]
    pub ledger: LedgerView,
    /// stored_remaining − expected counter value before repair. The stored
    /// counter is decremented at confirmation, so its expected value is
    /// `total − debited − upcoming_confirmed`.
    pub drift: i64,
    pub repaired: bool,
    /// False when the package is overbooked (negative available); that
    /// cannot be fixed by a counter rewrite and needs manual attention.
    pub healthy: bool,
}

/// Audit/repair entry point: recount the ledger from bookings, rewrite the
/// cached counter and status if they drifted, and flag overbooking.
pub fn reconcile_package(
    conn: &Connection,
    pkg: &Package,
    as_of: NaiveDateTime,
) -> anyhow::Result<ReconcileReport> {
    let ledger = ledger_view(conn, pkg, as_of)?;
    let upcoming_confirmed = queries::upcoming_confirmed_count(conn, &pkg.id, &as_of)?;
    let expected_stored = pkg.total_sessions - ledger.debited - upcoming_confirmed;
    let drift = ledger.stored_remaining - expected_stored;
    let healthy = ledger.available >= 0;

    if !healthy {
        tracing::error!(
            package_id = %pkg.id,
            available = ledger.available,
            "package is overbooked; manual reconciliation required"
        );
    }

    let repaired = drift != 0 || pkg.status != ledger.status;
    if repaired {
        tracing::warn!(
            package_id = %pkg.id,
            drift,
            stored = ledger.stored_remaining,
            expected = expected_stored,
            "repairing package cache from booking recount"
        );
        queries::update_package_cache(conn, &pkg.id, expected_stored.max(0), ledger.status, &as_of)?;
    }

    Ok(ReconcileReport {
        ledger,
        drift,
        repaired,
        healthy,
    })
}
