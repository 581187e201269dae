use rusqlite::Connection;

use crate::error::Result;

/// Initialise the cronpulse schema in `conn`.
///
/// Safe to call on every startup; uses `IF NOT EXISTS` throughout.
/// Timestamps are RFC 3339 UTC strings with millisecond precision, so plain
/// string comparison orders them chronologically.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id                  TEXT    NOT NULL PRIMARY KEY,
            name                TEXT    NOT NULL,
            cron_expression     TEXT    NOT NULL,
            enabled             INTEGER NOT NULL DEFAULT 1,
            invocation          TEXT    NOT NULL,   -- JSON-encoded Invocation
            concurrency_control INTEGER NOT NULL DEFAULT 0,
            max_retries         INTEGER NOT NULL DEFAULT 0,
            retry_backoff_secs  INTEGER NOT NULL DEFAULT 60,
            last_execution_at   TEXT,
            next_execution_at   TEXT,
            created_at          TEXT    NOT NULL,
            updated_at          TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_jobs_enabled ON jobs (enabled);

        CREATE TABLE IF NOT EXISTS executions (
            id            TEXT    NOT NULL PRIMARY KEY,
            job_id        TEXT    NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
            status        TEXT    NOT NULL,
            started_at    TEXT    NOT NULL,
            ended_at      TEXT,
            duration_ms   INTEGER,
            output        TEXT,
            error_message TEXT,
            attempt       INTEGER NOT NULL DEFAULT 0,
            trigger_type  TEXT    NOT NULL
        ) STRICT;

        -- Open-execution lookups and windowed failure counts.
        CREATE INDEX IF NOT EXISTS idx_executions_job_status
            ON executions (job_id, status);
        CREATE INDEX IF NOT EXISTS idx_executions_job_started
            ON executions (job_id, started_at);

        CREATE TABLE IF NOT EXISTS alert_rules (
            id                TEXT    NOT NULL PRIMARY KEY,
            job_id            TEXT    NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
            window_minutes    INTEGER NOT NULL,
            failure_threshold INTEGER NOT NULL,
            recipients        TEXT    NOT NULL,   -- JSON array of addresses
            enabled           INTEGER NOT NULL DEFAULT 1,
            created_at        TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_alert_rules_job ON alert_rules (job_id);
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master
                 WHERE type = 'table' AND name IN ('jobs', 'executions', 'alert_rules')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 3);
    }
}
