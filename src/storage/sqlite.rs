//! SQLite response recorder
//!
//! This module provides a SQLite-based implementation of the ResponseRecorder
//! trait, storing one `api_responses` row per fetch outcome.

use crate::output::{ApiResponseRecord, OutputResult, ResponseRecorder};
use crate::storage::schema::initialize_schema;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

/// SQLite bookkeeping backend
#[derive(Debug)]
pub struct SqliteRecorder {
    conn: Mutex<Connection>,
}

impl SqliteRecorder {
    /// Opens (or creates) the database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteRecorder)` - Successfully opened/created database
    /// * `Err(OutputError)` - Failed to open database
    pub fn new(path: &Path) -> OutputResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> OutputResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Number of stored rows
    pub fn count(&self) -> OutputResult<u64> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM api_responses", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

impl ResponseRecorder for SqliteRecorder {
    fn record_batch(&self, records: &[ApiResponseRecord]) -> OutputResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO api_responses
                 (url, brand_id, brand_name, status_code, is_empty, api_name, api_version,
                  sub_brand, category, created)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;

            for record in records {
                stmt.execute(params![
                    record.url,
                    record.provider_id,
                    record.provider_name,
                    record.status_code,
                    record.is_empty,
                    record.api_name,
                    record.api_version,
                    record.sub_brand,
                    record.category,
                    record.requested_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;

        tracing::info!("Recorded {} API responses", records.len());
        Ok(records.len())
    }
}
