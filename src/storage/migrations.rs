//! Schema upgrades for the device database.
//!
//! The schema version lives in `PRAGMA user_version`. Each step runs in its
//! own transaction together with the version bump, so an interrupted upgrade
//! leaves the file at the last complete version.

use rusqlite::Connection;

use crate::error::SyncError;

/// Upgrade steps. Entry `n` takes the schema from version `n` to `n + 1`.
const STEPS: &[&str] = &[
    // v1: JSON documents keyed by (shop, key)
    r"
    CREATE TABLE kv_store (
        namespace TEXT NOT NULL,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (namespace, key)
    );
    ",
];

/// Schema version this build writes.
pub const LATEST: usize = STEPS.len();

/// Schema version recorded in the file; 0 for a new database.
pub fn schema_version(conn: &Connection) -> Result<usize, SyncError> {
    let version: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| SyncError::Database(format!("Failed to read schema version: {e}")))?;
    usize::try_from(version)
        .map_err(|_| SyncError::Database(format!("Invalid schema version {version}")))
}

/// Bring the schema up to [`LATEST`]. Returns the number of steps applied.
///
/// A file written by a newer build is refused rather than opened with a
/// schema this build does not understand.
pub fn upgrade(conn: &mut Connection) -> Result<usize, SyncError> {
    let current = schema_version(conn)?;
    if current > LATEST {
        return Err(SyncError::Database(format!(
            "database schema v{current} is newer than this build (v{LATEST})"
        )));
    }

    for (index, sql) in STEPS.iter().enumerate().skip(current) {
        let version = index + 1;
        let fail = |e: rusqlite::Error| SyncError::Database(format!("Schema v{version} failed: {e}"));

        let tx = conn.transaction().map_err(fail)?;
        tx.execute_batch(sql).map_err(fail)?;
        tx.pragma_update(None, "user_version", version).map_err(fail)?;
        tx.commit().map_err(fail)?;
        tracing::debug!(version, "database schema upgraded");
    }

    Ok(LATEST - current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_database_is_upgraded() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 0);

        assert_eq!(upgrade(&mut conn).unwrap(), LATEST);
        assert_eq!(schema_version(&conn).unwrap(), LATEST);

        conn.execute(
            "INSERT INTO kv_store (namespace, key, value, updated_at)
             VALUES ('shop-a', 'offline_queue', '{}', '2024-01-01T10:00:00Z')",
            [],
        )
        .unwrap();

        // One value per key within a shop
        let duplicate = conn.execute(
            "INSERT INTO kv_store (namespace, key, value, updated_at)
             VALUES ('shop-a', 'offline_queue', '{}', '2024-01-01T10:00:00Z')",
            [],
        );
        assert!(duplicate.is_err());
    }

    #[test]
    fn test_upgrade_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();

        upgrade(&mut conn).unwrap();
        assert_eq!(upgrade(&mut conn).unwrap(), 0);
        assert_eq!(schema_version(&conn).unwrap(), LATEST);
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", LATEST + 1).unwrap();

        let err = upgrade(&mut conn).unwrap_err();
        assert!(matches!(err, SyncError::Database(_)));
        assert!(err.to_string().contains("newer than this build"));
    }
}
