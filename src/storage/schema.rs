//! Database schema for the response bookkeeping table

use rusqlite::Connection;

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per fetch outcome, success or failure
CREATE TABLE IF NOT EXISTS api_responses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    brand_id TEXT NOT NULL,
    brand_name TEXT NOT NULL,
    status_code INTEGER,
    is_empty INTEGER NOT NULL,
    api_name TEXT NOT NULL,
    api_version TEXT NOT NULL,
    sub_brand TEXT,
    category TEXT,
    created TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_api_responses_brand ON api_responses(brand_id);
CREATE INDEX IF NOT EXISTS idx_api_responses_created ON api_responses(created);
CREATE INDEX IF NOT EXISTS idx_api_responses_api ON api_responses(api_name, api_version);
"#;

/// Initializes the database schema
///
/// Safe to call on an existing database.
pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}
