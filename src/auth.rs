//! Administrative account seeding.
//!
//! The dashboard that reads these accounts lives elsewhere; only the
//! CLI seeding path is implemented here.

use bcrypt::{hash, DEFAULT_COST};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

/// Create the administrative account unless the email is already taken.
/// Returns the user id either way, so seeding is idempotent.
pub fn seed_admin(
    conn: &Connection,
    username: &str,
    email: &str,
    password: &str,
) -> Result<i64, String> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM users WHERE email = ?1",
            params![email],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| format!("query users: {e}"))?;

    if let Some(id) = existing {
        info!(email, id, "Admin account already present, skipping seed");
        return Ok(id);
    }

    let password_hash = hash(password, DEFAULT_COST).map_err(|e| format!("hash password: {e}"))?;
    conn.execute(
        "INSERT INTO users (username, email, password_hash, is_admin) VALUES (?1, ?2, ?3, 1)",
        params![username, email, password_hash],
    )
    .map_err(|e| format!("insert user: {e}"))?;

    let id = conn.last_insert_rowid();
    info!(email, id, "Seeded admin account");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn test_seed_admin_is_idempotent() {
        let conn = db::open_in_memory_for_test();

        let first = seed_admin(&conn, "admin", "admin@example.com", "s3cret").unwrap();
        let second = seed_admin(&conn, "admin", "admin@example.com", "other").unwrap();
        assert_eq!(first, second);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_seeded_hash_verifies() {
        let conn = db::open_in_memory_for_test();
        seed_admin(&conn, "admin", "admin@example.com", "s3cret").unwrap();

        let (stored, is_admin): (String, i64) = conn
            .query_row(
                "SELECT password_hash, is_admin FROM users WHERE email = 'admin@example.com'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert!(bcrypt::verify("s3cret", &stored).unwrap());
        assert!(!bcrypt::verify("wrong", &stored).unwrap());
        assert_eq!(is_admin, 1);
    }
}
