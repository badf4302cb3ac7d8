use rusqlite::Connection;

use crate::error::Result;

/// Initialise the pending-jobs schema in `conn`.
///
/// One row per job that was still waiting when the process last stopped.
/// `payload` holds the JSON-encoded [`StoredPayload`](crate::types::StoredPayload).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS pending_jobs (
            id          TEXT    NOT NULL PRIMARY KEY,
            unique_id   TEXT    NOT NULL,
            payload     TEXT    NOT NULL,   -- JSON: kind, remaining delay, message
            updated_at  TEXT    NOT NULL    -- ISO-8601, time of the snapshot
        ) STRICT;
        ",
    )?;
    Ok(())
}
