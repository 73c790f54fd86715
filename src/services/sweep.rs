use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::Serialize;

use crate::db::queries;

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub completed_bookings: usize,
    pub expired_packages: usize,
    pub deleted_blocks: usize,
}

/// Periodic maintenance pass: flip elapsed confirmed sessions to completed,
/// mark lapsed packages expired, drop stale blocks. Every step is a
/// conditional update, so running the sweep again (or concurrently with
/// live requests) matches nothing and changes nothing.
pub fn run_sweep(conn: &Connection, now: NaiveDateTime) -> anyhow::Result<SweepReport> {
    let completed_bookings = queries::complete_elapsed_confirmed(conn, &now)?;
    let expired_packages = queries::expire_lapsed_packages(conn, &now)?;
    let deleted_blocks = queries::delete_elapsed_blocks(conn, &now)?;

    Ok(SweepReport {
        completed_bookings,
        expired_packages,
        deleted_blocks,
    })
}
