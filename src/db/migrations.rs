use anyhow::Context;
use rusqlite::Connection;

// Migrations are embedded so an in-memory database gets the full schema.
// The partial unique index on bookings is the storage-level guard against
// two concurrent requests double-booking the same teacher slot.
const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_init.sql",
    "
    CREATE TABLE customers (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        phone TEXT,
        total_cancellations INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE packages (
        id TEXT PRIMARY KEY,
        customer_id TEXT NOT NULL REFERENCES customers(id),
        session_type TEXT NOT NULL,
        total_sessions INTEGER NOT NULL CHECK (total_sessions >= 1),
        remaining_sessions INTEGER NOT NULL CHECK (remaining_sessions >= 0),
        valid_from TEXT NOT NULL,
        valid_to TEXT NOT NULL,
        price_cents INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'active',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        CHECK (valid_to > valid_from)
    );
    CREATE INDEX idx_packages_customer ON packages(customer_id);

    CREATE TABLE bookings (
        id TEXT PRIMARY KEY,
        customer_id TEXT REFERENCES customers(id),
        teacher_id TEXT NOT NULL,
        package_id TEXT REFERENCES packages(id),
        session_type TEXT NOT NULL,
        start_time TEXT NOT NULL,
        end_time TEXT NOT NULL,
        status TEXT NOT NULL,
        notes TEXT,
        cancellation_reason TEXT,
        created_by TEXT NOT NULL,
        confirmed_at TEXT,
        confirmed_by TEXT,
        attendance_marked_at TEXT,
        calendar_event_id TEXT,
        idempotency_key TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        CHECK (end_time > start_time)
    );
    CREATE UNIQUE INDEX idx_bookings_slot
        ON bookings(teacher_id, start_time, end_time)
        WHERE status IN ('pending', 'confirmed', 'cancellation_requested');
    CREATE UNIQUE INDEX idx_bookings_idempotency
        ON bookings(idempotency_key)
        WHERE idempotency_key IS NOT NULL;
    CREATE INDEX idx_bookings_interval ON bookings(start_time, end_time);
    CREATE INDEX idx_bookings_package ON bookings(package_id);
    CREATE INDEX idx_bookings_customer ON bookings(customer_id);
    ",
)];

pub fn run_migrations(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .context("failed to create migrations table")?;

    for (name, sql) in MIGRATIONS {
        let already_applied: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM _migrations WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .context("failed to check migration status")?;

        if already_applied {
            continue;
        }

        conn.execute_batch(sql)
            .with_context(|| format!("failed to apply migration: {name}"))?;

        conn.execute("INSERT INTO _migrations (name) VALUES (?1)", [name])
            .with_context(|| format!("failed to record migration: {name}"))?;

        tracing::info!("applied migration: {name}");
    }

    Ok(())
}
