//! SQLite storage layer.
//!
//! Uses rusqlite with WAL mode. Provides schema migrations and connection
//! setup; the loader and the statistics engine work directly on the
//! `Connection`. Every timestamp column stores `%Y-%m-%d %H:%M:%S` text so
//! lexicographic range comparison equals chronological comparison.

use rusqlite::Connection;
use std::fs;
use std::path::Path;
use tracing::info;

/// Storage format for every `date_time` column.
pub const DB_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Open the database at `db_path`, creating parent directories if needed,
/// and run any pending migrations.
pub fn init(db_path: &Path) -> Result<Connection, String> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| format!("Failed to create data dir: {e}"))?;
        }
    }

    info!("Opening database at {}", db_path.display());
    let conn = open_and_configure(db_path)?;
    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");
    Ok(conn)
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
pub fn run_migrations(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create schema_version: {e}"))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// Migration v1: organizations, users, master tables, orders, order lines.
fn migrate_v1(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        -- organizations own all master data and orders
        CREATE TABLE IF NOT EXISTS organizations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            data_dir TEXT NOT NULL UNIQUE,
            created_at TEXT DEFAULT (datetime('now'))
        );

        -- dashboard accounts; only seeded from the CLI
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            is_admin INTEGER NOT NULL DEFAULT 0
        );

        -- master data (natural `number` is unique per organization only)
        CREATE TABLE IF NOT EXISTS fixed_totalizers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            org_id INTEGER NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
            number INTEGER NOT NULL,
            date_time TEXT NOT NULL,
            filepath TEXT NOT NULL,
            data_dir TEXT NOT NULL,
            name TEXT,
            UNIQUE(org_id, number)
        );

        CREATE TABLE IF NOT EXISTS free_functions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            org_id INTEGER NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
            number INTEGER NOT NULL,
            date_time TEXT NOT NULL,
            filepath TEXT NOT NULL,
            data_dir TEXT NOT NULL,
            name TEXT,
            function_number TEXT,
            UNIQUE(org_id, number)
        );

        CREATE TABLE IF NOT EXISTS groups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            org_id INTEGER NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
            number INTEGER NOT NULL,
            date_time TEXT NOT NULL,
            filepath TEXT NOT NULL,
            data_dir TEXT NOT NULL,
            name TEXT,
            UNIQUE(org_id, number)
        );

        CREATE TABLE IF NOT EXISTS departments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            org_id INTEGER NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
            number INTEGER NOT NULL,
            date_time TEXT NOT NULL,
            filepath TEXT NOT NULL,
            data_dir TEXT NOT NULL,
            name TEXT,
            group_id INTEGER REFERENCES groups(id),
            UNIQUE(org_id, number)
        );

        CREATE TABLE IF NOT EXISTS taxes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            org_id INTEGER NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
            number INTEGER NOT NULL,
            date_time TEXT NOT NULL,
            filepath TEXT NOT NULL,
            data_dir TEXT NOT NULL,
            name TEXT,
            rate INTEGER,
            UNIQUE(org_id, number)
        );

        CREATE TABLE IF NOT EXISTS mix_match (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            org_id INTEGER NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
            number INTEGER NOT NULL,
            date_time TEXT NOT NULL,
            filepath TEXT NOT NULL,
            data_dir TEXT NOT NULL,
            name TEXT,
            operation_type INTEGER,
            qty_req INTEGER,
            amount REAL,
            UNIQUE(org_id, number)
        );

        -- PLU and PLU-2nd share the numbering space in some exports, so the
        -- dedup key carries the name as well
        CREATE TABLE IF NOT EXISTS plu (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            org_id INTEGER NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
            number INTEGER NOT NULL,
            date_time TEXT NOT NULL,
            filepath TEXT NOT NULL,
            data_dir TEXT NOT NULL,
            name TEXT,
            group_id INTEGER REFERENCES groups(id),
            department_id INTEGER REFERENCES departments(id),
            price REAL,
            tax_id INTEGER REFERENCES taxes(id),
            mix_match_id INTEGER REFERENCES mix_match(id),
            UNIQUE(org_id, number, name)
        );

        CREATE TABLE IF NOT EXISTS plu_2nd (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            org_id INTEGER NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
            number INTEGER NOT NULL,
            date_time TEXT NOT NULL,
            filepath TEXT NOT NULL,
            data_dir TEXT NOT NULL,
            name TEXT,
            group_id INTEGER REFERENCES groups(id),
            department_id INTEGER REFERENCES departments(id),
            price REAL,
            tax_id INTEGER REFERENCES taxes(id),
            UNIQUE(org_id, number, name)
        );

        CREATE TABLE IF NOT EXISTS clerks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            org_id INTEGER NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
            number INTEGER NOT NULL,
            date_time TEXT NOT NULL,
            filepath TEXT NOT NULL,
            data_dir TEXT NOT NULL,
            name TEXT,
            UNIQUE(org_id, number)
        );

        CREATE TABLE IF NOT EXISTS customers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            org_id INTEGER NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
            number INTEGER NOT NULL,
            date_time TEXT NOT NULL,
            filepath TEXT NOT NULL,
            data_dir TEXT NOT NULL,
            first_name TEXT,
            surname TEXT,
            addr1 TEXT,
            addr2 TEXT,
            addr3 TEXT,
            postcode TEXT,
            phone TEXT,
            email TEXT,
            overdraft_limit TEXT,
            custgroup_number INTEGER,
            UNIQUE(org_id, number)
        );

        -- transactions
        CREATE TABLE IF NOT EXISTS orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            org_id INTEGER NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
            date_time TEXT NOT NULL,
            filepath TEXT,
            mode TEXT,
            consecutive_number INTEGER,
            terminal_number INTEGER,
            terminal_name TEXT,
            clerk_id INTEGER REFERENCES clerks(id),
            customer_id INTEGER REFERENCES customers(id),
            table_number INTEGER,
            UNIQUE(org_id, consecutive_number, date_time)
        );

        CREATE TABLE IF NOT EXISTS order_lines (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            order_id INTEGER NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
            item_type INTEGER NOT NULL,
            func_number TEXT,
            name TEXT,
            qty INTEGER NOT NULL,
            value REAL NOT NULL,
            product_id INTEGER REFERENCES plu(id),
            product_2nd_id INTEGER REFERENCES plu_2nd(id),
            free_func_id INTEGER REFERENCES free_functions(id),
            fixed_total_id INTEGER REFERENCES fixed_totalizers(id),
            mix_match_id INTEGER REFERENCES mix_match(id),
            change REAL
        );

        -- Indexes
        CREATE INDEX IF NOT EXISTS idx_orders_org_datetime ON orders(org_id, date_time);
        CREATE INDEX IF NOT EXISTS idx_order_lines_order ON order_lines(order_id);

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| format!("migrate v1: {e}"))
}

/// In-memory database with the full schema, for tests.
#[cfg(test)]
pub(crate) fn open_in_memory_for_test() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .expect("pragma setup");
    run_migrations(&conn).expect("migrations");
    conn
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = open_in_memory_for_test();
        run_migrations(&conn).unwrap();

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_org_number_uniqueness() {
        let conn = open_in_memory_for_test();
        conn.execute(
            "INSERT INTO organizations (name, data_dir) VALUES ('a', '/a'), ('b', '/b')",
            [],
        )
        .unwrap();

        let insert = "INSERT INTO groups (org_id, number, date_time, filepath, data_dir, name)
                      VALUES (?1, 10, '2019-01-01 00:00:00', 'f', 'd', 'DRINKS')";
        conn.execute(insert, params![1]).unwrap();
        // Same number in another organization is fine.
        conn.execute(insert, params![2]).unwrap();
        // Duplicate within the organization is rejected.
        assert!(conn.execute(insert, params![1]).is_err());
    }

    #[test]
    fn test_cascade_delete_from_organization() {
        let conn = open_in_memory_for_test();
        conn.execute(
            "INSERT INTO organizations (name, data_dir) VALUES ('a', '/a')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO orders (org_id, date_time, consecutive_number) VALUES (1, '2019-01-01 12:00:00', 1)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO order_lines (order_id, item_type, qty, value) VALUES (1, 0, 1, 2.5)",
            [],
        )
        .unwrap();

        conn.execute("DELETE FROM organizations WHERE id = 1", [])
            .unwrap();

        let orders: i64 = conn
            .query_row("SELECT COUNT(*) FROM orders", [], |r| r.get(0))
            .unwrap();
        let lines: i64 = conn
            .query_row("SELECT COUNT(*) FROM order_lines", [], |r| r.get(0))
            .unwrap();
        assert_eq!(orders, 0);
        assert_eq!(lines, 0);
    }
}
