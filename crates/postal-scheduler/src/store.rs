use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{error, info};

use crate::{
    db::init_db,
    error::Result,
    types::{PendingJobRecord, StoredPayload},
};

/// File-backed snapshot of jobs still pending when the process stopped.
///
/// Written only during shutdown and read only during startup, so each call
/// opens its own connection and no locking is needed.
pub struct JobStore {
    path: PathBuf,
}

impl JobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a database file from a previous run is present.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn open(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!(path = %self.path.display(), "opening pending-jobs store");
        let conn = Connection::open(&self.path)?;
        init_db(&conn)?;
        Ok(conn)
    }

    /// Write every record in a single transaction. A record whose id is
    /// already stored replaces the old row.
    pub fn save_all(&self, records: &[PendingJobRecord]) -> Result<usize> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO pending_jobs (id, unique_id, payload, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for record in records {
                let payload = serde_json::to_string(&record.payload)?;
                stmt.execute(rusqlite::params![
                    record.id,
                    record.unique_id,
                    payload,
                    record.updated_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    /// Read every stored record. Rows that fail to decode are logged and skipped.
    pub fn load_all(&self) -> Result<Vec<PendingJobRecord>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, unique_id, payload, updated_at FROM pending_jobs ORDER BY updated_at",
        )?;
        let records = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?, // id
                    row.get::<_, String>(1)?, // unique_id
                    row.get::<_, String>(2)?, // payload JSON
                    row.get::<_, String>(3)?, // updated_at
                ))
            })?
            .filter_map(|r| {
                let (id, unique_id, payload_json, updated_at) = r.ok()?;
                let payload: StoredPayload = match serde_json::from_str(&payload_json) {
                    Ok(p) => p,
                    Err(e) => {
                        error!(job_id = %id, "bad pending-job payload JSON: {e}");
                        return None;
                    }
                };
                let updated_at = DateTime::parse_from_rfc3339(&updated_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now());
                Some(PendingJobRecord {
                    id,
                    unique_id,
                    payload,
                    updated_at,
                })
            })
            .collect();
        Ok(records)
    }

    /// Delete every stored record. Returns how many rows were removed.
    pub fn clear_all(&self) -> Result<usize> {
        let conn = self.open()?;
        let n = conn.execute("DELETE FROM pending_jobs", [])?;
        Ok(n)
    }
}
