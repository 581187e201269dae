use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{types::Type, Connection, OptionalExtension};
use tracing::{debug, info, instrument, warn};

use cronpulse_core::store::{AlertRuleStore, ExecutionStore, JobStore};
use cronpulse_core::types::{
    AlertRule, AlertRuleId, Execution, ExecutionId, ExecutionOutcome, ExecutionStatus, Job, JobId,
    NewAlertRule, NewJob, TriggerType,
};
use cronpulse_core::cron::{self, Tz};

use crate::db::init_db;
use crate::error::{Result, StoreError};

const JOB_COLUMNS: &str = "id, name, cron_expression, enabled, invocation, concurrency_control,
     max_retries, retry_backoff_secs, last_execution_at, next_execution_at,
     created_at, updated_at";

const EXECUTION_COLUMNS: &str = "id, job_id, status, started_at, ended_at, duration_ms, output,
     error_message, attempt, trigger_type";

/// Thread-safe SQLite store for jobs, executions and alert rules.
///
/// Wraps a single connection in a `Mutex`; every method takes the lock for
/// the duration of one statement (or one short transaction) and never across
/// an `.await`. The informational `next_execution_at` column is computed in
/// the store's time zone (UTC unless set with [`SqliteStore::with_timezone`]).
pub struct SqliteStore {
    db: Mutex<Connection>,
    tz: Tz,
}

impl SqliteStore {
    /// Wrap an open connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            tz: Tz::UTC,
        })
    }

    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.tz = tz;
        self
    }

    /// Fresh private database, mostly for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    // --- jobs ---------------------------------------------------------------

    /// Insert a job after validating its cron expression.
    #[instrument(skip(self, new), fields(name = %new.name))]
    pub fn create_job(&self, new: &NewJob) -> Result<Job> {
        cron::validate(&new.cron_expression).map_err(StoreError::InvalidCron)?;

        let now = Utc::now();
        let next = if new.enabled {
            cron::next_after(&new.cron_expression, now, self.tz)
        } else {
            None
        };
        let job = Job {
            id: JobId::new(),
            name: new.name.clone(),
            cron_expression: new.cron_expression.trim().to_string(),
            enabled: new.enabled,
            invocation: new.invocation.clone(),
            concurrency_control: new.concurrency_control,
            max_retries: new.max_retries,
            retry_backoff_secs: new.retry_backoff_secs,
            last_execution_at: None,
            next_execution_at: next,
            created_at: now,
            updated_at: now,
        };

        let invocation = serde_json::to_string(&job.invocation)?;
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO jobs
             (id, name, cron_expression, enabled, invocation, concurrency_control,
              max_retries, retry_backoff_secs, last_execution_at, next_execution_at,
              created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9, ?10, ?10)",
            rusqlite::params![
                job.id.as_str(),
                job.name,
                job.cron_expression,
                job.enabled,
                invocation,
                job.concurrency_control,
                job.max_retries,
                job.retry_backoff_secs as i64,
                next.map(fmt_ts),
                fmt_ts(now),
            ],
        )?;
        info!(job_id = %job.id, "job created");
        Ok(job)
    }

    pub fn find_job(&self, id: &JobId) -> Result<Option<Job>> {
        let db = self.db.lock().unwrap();
        let job = db
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                [id.as_str()],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    /// All jobs, oldest first.
    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at"))?;
        let jobs = stmt
            .query_map([], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// Change a job's schedule. The scheduler picks it up on its next pass.
    pub fn update_cron_expression(&self, id: &JobId, expr: &str) -> Result<()> {
        cron::validate(expr).map_err(StoreError::InvalidCron)?;
        let now = Utc::now();
        let next = cron::next_after(expr, now, self.tz).map(fmt_ts);
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE jobs SET cron_expression = ?1, next_execution_at = ?2, updated_at = ?3
             WHERE id = ?4",
            rusqlite::params![expr.trim(), next, fmt_ts(now), id.as_str()],
        )?;
        ensure_found(n, "job", id.as_str())
    }

    /// Replace a job's invocation descriptor.
    pub fn update_invocation(
        &self,
        id: &JobId,
        invocation: &cronpulse_core::Invocation,
    ) -> Result<()> {
        let json = serde_json::to_string(invocation)?;
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE jobs SET invocation = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![json, fmt_ts(Utc::now()), id.as_str()],
        )?;
        ensure_found(n, "job", id.as_str())
    }

    pub fn set_enabled(&self, id: &JobId, enabled: bool) -> Result<()> {
        let db = self.db.lock().unwrap();
        let now = Utc::now();
        let expr: Option<String> = db
            .query_row(
                "SELECT cron_expression FROM jobs WHERE id = ?1",
                [id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(expr) = expr else {
            return Err(StoreError::NotFound {
                kind: "job",
                id: id.to_string(),
            });
        };
        let next = if enabled {
            cron::next_after(&expr, now, self.tz).map(fmt_ts)
        } else {
            None
        };
        db.execute(
            "UPDATE jobs SET enabled = ?1, next_execution_at = ?2, updated_at = ?3 WHERE id = ?4",
            rusqlite::params![enabled, next, fmt_ts(now), id.as_str()],
        )?;
        info!(job_id = %id, enabled, "job toggled");
        Ok(())
    }

    /// Delete a job together with its executions and alert rules.
    pub fn delete_job(&self, id: &JobId) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        tx.execute("DELETE FROM executions WHERE job_id = ?1", [id.as_str()])?;
        tx.execute("DELETE FROM alert_rules WHERE job_id = ?1", [id.as_str()])?;
        let n = tx.execute("DELETE FROM jobs WHERE id = ?1", [id.as_str()])?;
        if n == 0 {
            return Err(StoreError::NotFound {
                kind: "job",
                id: id.to_string(),
            });
        }
        tx.commit()?;
        info!(job_id = %id, "job deleted");
        Ok(())
    }

    // --- alert rules --------------------------------------------------------

    pub fn create_alert_rule(&self, new: &NewAlertRule) -> Result<AlertRule> {
        let rule = AlertRule {
            id: AlertRuleId::new(),
            job_id: new.job_id.clone(),
            window_minutes: new.window_minutes,
            failure_threshold: new.failure_threshold,
            recipients: new.recipients.clone(),
            enabled: new.enabled,
        };
        let recipients = serde_json::to_string(&rule.recipients)?;
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO alert_rules
             (id, job_id, window_minutes, failure_threshold, recipients, enabled, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                rule.id.as_str(),
                rule.job_id.as_str(),
                rule.window_minutes,
                rule.failure_threshold,
                recipients,
                rule.enabled,
                fmt_ts(Utc::now()),
            ],
        )?;
        debug!(rule_id = %rule.id, job_id = %rule.job_id, "alert rule created");
        Ok(rule)
    }

    // --- executions ---------------------------------------------------------

    /// Most recent executions for a job, newest first.
    pub fn list_executions(&self, job_id: &JobId, limit: usize) -> Result<Vec<Execution>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions
             WHERE job_id = ?1
             ORDER BY started_at DESC, id DESC
             LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(
                rusqlite::params![job_id.as_str(), limit as i64],
                row_to_execution,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn find_execution(&self, id: &ExecutionId) -> Result<Option<Execution>> {
        let db = self.db.lock().unwrap();
        let row = db
            .query_row(
                &format!("SELECT {EXECUTION_COLUMNS} FROM executions WHERE id = ?1"),
                [id.as_str()],
                row_to_execution,
            )
            .optional()?;
        Ok(row)
    }

    fn insert_running(
        &self,
        job_id: &JobId,
        started_at: DateTime<Utc>,
        attempt: u32,
        trigger_type: TriggerType,
    ) -> Result<ExecutionId> {
        let id = ExecutionId::new();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO executions (id, job_id, status, started_at, attempt, trigger_type)
             VALUES (?1, ?2, 'running', ?3, ?4, ?5)",
            rusqlite::params![
                id.as_str(),
                job_id.as_str(),
                fmt_ts(started_at),
                attempt,
                trigger_type.as_str(),
            ],
        )?;
        Ok(id)
    }

    fn insert_running_exclusive(
        &self,
        job_id: &JobId,
        started_at: DateTime<Utc>,
        attempt: u32,
        trigger_type: TriggerType,
    ) -> Result<Option<ExecutionId>> {
        let id = ExecutionId::new();
        let db = self.db.lock().unwrap();
        // Check and insert in one statement so two triggers cannot both pass.
        let n = db.execute(
            "INSERT INTO executions (id, job_id, status, started_at, attempt, trigger_type)
             SELECT ?1, ?2, 'running', ?3, ?4, ?5
             WHERE NOT EXISTS (
                 SELECT 1 FROM executions WHERE job_id = ?2 AND status = 'running'
             )",
            rusqlite::params![
                id.as_str(),
                job_id.as_str(),
                fmt_ts(started_at),
                attempt,
                trigger_type.as_str(),
            ],
        )?;
        Ok((n == 1).then_some(id))
    }

    fn close_running(&self, id: &ExecutionId, outcome: &ExecutionOutcome) -> Result<()> {
        let db = self.db.lock().unwrap();
        // The status guard makes a second close a no-op we can detect.
        let n = db.execute(
            "UPDATE executions
             SET status = ?1, ended_at = ?2, duration_ms = ?3, output = ?4, error_message = ?5
             WHERE id = ?6 AND status = 'running'",
            rusqlite::params![
                outcome.status.as_str(),
                fmt_ts(outcome.ended_at),
                outcome.duration_ms,
                outcome.output,
                outcome.error_message,
                id.as_str(),
            ],
        )?;
        if n == 0 {
            let exists: bool = db
                .query_row("SELECT 1 FROM executions WHERE id = ?1", [id.as_str()], |_| {
                    Ok(true)
                })
                .optional()?
                .unwrap_or(false);
            return Err(if exists {
                StoreError::AlreadyClosed { id: id.to_string() }
            } else {
                StoreError::NotFound {
                    kind: "execution",
                    id: id.to_string(),
                }
            });
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn list_enabled_jobs(&self) -> cronpulse_core::Result<Vec<Job>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db
            .prepare_cached(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE enabled = 1 ORDER BY created_at"
            ))
            .map_err(StoreError::from)?;
        let jobs = stmt
            .query_map([], row_to_job)
            .map_err(StoreError::from)?
            .filter_map(|r| match r {
                Ok(job) => Some(job),
                Err(e) => {
                    // One corrupt row must not hide every other job.
                    warn!("skipping unreadable job row: {e}");
                    None
                }
            })
            .collect();
        Ok(jobs)
    }

    async fn get_job(&self, id: &JobId) -> cronpulse_core::Result<Option<Job>> {
        Ok(self.find_job(id)?)
    }

    async fn set_last_execution_and_next(
        &self,
        id: &JobId,
        last_at: DateTime<Utc>,
        next_at: Option<DateTime<Utc>>,
    ) -> cronpulse_core::Result<()> {
        let db = self.db.lock().unwrap();
        let n = db
            .execute(
                "UPDATE jobs SET last_execution_at = ?1, next_execution_at = ?2, updated_at = ?1
                 WHERE id = ?3",
                rusqlite::params![fmt_ts(last_at), next_at.map(fmt_ts), id.as_str()],
            )
            .map_err(StoreError::from)?;
        Ok(ensure_found(n, "job", id.as_str())?)
    }
}

#[async_trait]
impl ExecutionStore for SqliteStore {
    async fn create_running(
        &self,
        job_id: &JobId,
        started_at: DateTime<Utc>,
        attempt: u32,
        trigger_type: TriggerType,
    ) -> cronpulse_core::Result<ExecutionId> {
        Ok(self.insert_running(job_id, started_at, attempt, trigger_type)?)
    }

    async fn create_running_exclusive(
        &self,
        job_id: &JobId,
        started_at: DateTime<Utc>,
        attempt: u32,
        trigger_type: TriggerType,
    ) -> cronpulse_core::Result<Option<ExecutionId>> {
        Ok(self.insert_running_exclusive(job_id, started_at, attempt, trigger_type)?)
    }

    async fn close_execution(
        &self,
        id: &ExecutionId,
        outcome: &ExecutionOutcome,
    ) -> cronpulse_core::Result<()> {
        Ok(self.close_running(id, outcome)?)
    }

    async fn count_recent_failures(
        &self,
        job_id: &JobId,
        since: DateTime<Utc>,
    ) -> cronpulse_core::Result<u32> {
        let db = self.db.lock().unwrap();
        let count: i64 = db
            .query_row(
                "SELECT COUNT(*) FROM executions
                 WHERE job_id = ?1 AND status IN ('failed', 'timeout') AND started_at >= ?2",
                rusqlite::params![job_id.as_str(), fmt_ts(since)],
                |row| row.get(0),
            )
            .map_err(StoreError::from)?;
        Ok(count as u32)
    }

    async fn has_open_execution(&self, job_id: &JobId) -> cronpulse_core::Result<bool> {
        let db = self.db.lock().unwrap();
        let open = db
            .query_row(
                "SELECT 1 FROM executions WHERE job_id = ?1 AND status = 'running' LIMIT 1",
                [job_id.as_str()],
                |_| Ok(()),
            )
            .optional()
            .map_err(StoreError::from)?;
        Ok(open.is_some())
    }

    async fn fail_orphaned(
        &self,
        ended_at: DateTime<Utc>,
        reason: &str,
    ) -> cronpulse_core::Result<usize> {
        let db = self.db.lock().unwrap();
        let n = db
            .execute(
                "UPDATE executions SET status = 'failed', ended_at = ?1, error_message = ?2
                 WHERE status = 'running'",
                rusqlite::params![fmt_ts(ended_at), reason],
            )
            .map_err(StoreError::from)?;
        Ok(n)
    }
}

#[async_trait]
impl AlertRuleStore for SqliteStore {
    async fn list_enabled_rules_for_job(
        &self,
        job_id: &JobId,
    ) -> cronpulse_core::Result<Vec<AlertRule>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db
            .prepare_cached(
                "SELECT id, job_id, window_minutes, failure_threshold, recipients, enabled
                 FROM alert_rules WHERE job_id = ?1 AND enabled = 1 ORDER BY created_at",
            )
            .map_err(StoreError::from)?;
        let rules = stmt
            .query_map([job_id.as_str()], |row| {
                let recipients: String = row.get(4)?;
                Ok(AlertRule {
                    id: AlertRuleId(row.get(0)?),
                    job_id: JobId(row.get(1)?),
                    window_minutes: row.get(2)?,
                    failure_threshold: row.get(3)?,
                    recipients: parse_json(4, &recipients)?,
                    enabled: row.get(5)?,
                })
            })
            .map_err(StoreError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::from)?;
        Ok(rules)
    }
}

// --- row mapping -------------------------------------------------------------

/// Fixed-width RFC 3339 so lexical order equals chronological order.
pub(crate) fn fmt_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_opt_ts(idx: usize, s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_ts(idx, &s)).transpose()
}

fn parse_json<T: serde::de::DeserializeOwned>(idx: usize, s: &str) -> rusqlite::Result<T> {
    serde_json::from_str(s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_enum<T>(idx: usize, s: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    s.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
    })
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let invocation: String = row.get(4)?;
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;
    Ok(Job {
        id: JobId(row.get(0)?),
        name: row.get(1)?,
        cron_expression: row.get(2)?,
        enabled: row.get(3)?,
        invocation: parse_json(4, &invocation)?,
        concurrency_control: row.get(5)?,
        max_retries: row.get(6)?,
        retry_backoff_secs: row.get::<_, i64>(7)?.max(0) as u64,
        last_execution_at: parse_opt_ts(8, row.get(8)?)?,
        next_execution_at: parse_opt_ts(9, row.get(9)?)?,
        created_at: parse_ts(10, &created_at)?,
        updated_at: parse_ts(11, &updated_at)?,
    })
}

fn row_to_execution(row: &rusqlite::Row<'_>) -> rusqlite::Result<Execution> {
    let status: String = row.get(2)?;
    let started_at: String = row.get(3)?;
    let trigger: String = row.get(9)?;
    Ok(Execution {
        id: ExecutionId(row.get(0)?),
        job_id: JobId(row.get(1)?),
        status: parse_enum::<ExecutionStatus>(2, &status)?,
        started_at: parse_ts(3, &started_at)?,
        ended_at: parse_opt_ts(4, row.get(4)?)?,
        duration_ms: row.get(5)?,
        output: row.get(6)?,
        error_message: row.get(7)?,
        attempt: row.get(8)?,
        trigger_type: parse_enum::<TriggerType>(9, &trigger)?,
    })
}

fn ensure_found(rows_changed: usize, kind: &'static str, id: &str) -> Result<()> {
    if rows_changed == 0 {
        return Err(StoreError::NotFound {
            kind,
            id: id.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use cronpulse_core::{CronpulseError, Invocation};

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn failed_at(ended_at: DateTime<Utc>) -> ExecutionOutcome {
        ExecutionOutcome {
            status: ExecutionStatus::Failed,
            ended_at,
            duration_ms: 5,
            output: None,
            error_message: Some("HTTP 500".to_string()),
        }
    }

    #[test]
    fn create_job_rejects_malformed_cron() {
        let store = store();
        let err = store
            .create_job(&NewJob::http("bad", "every tuesday", "http://localhost"))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidCron(_)));
        assert!(store.list_jobs().unwrap().is_empty());
    }

    #[test]
    fn create_job_round_trips_and_computes_next() {
        let store = store();
        let mut new = NewJob::http("ping", "*/5 * * * *", "http://localhost/ping");
        new.invocation.method = "POST".to_string();
        new.invocation
            .headers
            .insert("authorization".to_string(), "Bearer t".to_string());
        new.invocation.body = Some("{}".to_string());
        new.max_retries = 2;

        let created = store.create_job(&new).unwrap();
        let loaded = store.find_job(&created.id).unwrap().unwrap();
        assert_eq!(loaded.name, "ping");
        assert_eq!(loaded.invocation, new.invocation);
        assert_eq!(loaded.max_retries, 2);
        assert!(loaded.next_execution_at.unwrap() > loaded.created_at);
    }

    #[tokio::test]
    async fn list_enabled_excludes_disabled_jobs() {
        let store = store();
        let a = store
            .create_job(&NewJob::http("a", "* * * * *", "http://a"))
            .unwrap();
        let b = store
            .create_job(&NewJob::http("b", "* * * * *", "http://b"))
            .unwrap();
        store.set_enabled(&b.id, false).unwrap();

        let enabled = store.list_enabled_jobs().await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, a.id);
        assert_eq!(store.find_job(&b.id).unwrap().unwrap().next_execution_at, None);
    }

    #[tokio::test]
    async fn execution_closes_exactly_once() {
        let store = store();
        let job = store
            .create_job(&NewJob::http("j", "* * * * *", "http://x"))
            .unwrap();
        let now = Utc::now();
        let id = store
            .create_running(&job.id, now, 0, TriggerType::Scheduled)
            .await
            .unwrap();
        assert!(store.has_open_execution(&job.id).await.unwrap());

        store.close_execution(&id, &failed_at(now)).await.unwrap();
        assert!(!store.has_open_execution(&job.id).await.unwrap());

        let err = store.close_execution(&id, &failed_at(now)).await.unwrap_err();
        assert!(matches!(err, CronpulseError::ExecutionAlreadyClosed { .. }));

        let row = store.find_execution(&id).unwrap().unwrap();
        assert_eq!(row.status, ExecutionStatus::Failed);
        assert_eq!(row.error_message.as_deref(), Some("HTTP 500"));
        assert_eq!(row.trigger_type, TriggerType::Scheduled);
    }

    #[tokio::test]
    async fn exclusive_open_refuses_while_another_row_runs() {
        let store = store();
        let job = store
            .create_job(&NewJob::http("j", "* * * * *", "http://x"))
            .unwrap();
        let other = store
            .create_job(&NewJob::http("k", "* * * * *", "http://y"))
            .unwrap();
        let now = Utc::now();

        let first = store
            .create_running_exclusive(&job.id, now, 0, TriggerType::Scheduled)
            .await
            .unwrap()
            .expect("no open row yet");
        let second = store
            .create_running_exclusive(&job.id, now, 0, TriggerType::Manual)
            .await
            .unwrap();
        assert_eq!(second, None);
        assert_eq!(store.list_executions(&job.id, 10).unwrap().len(), 1);

        // Another job is unaffected.
        assert!(store
            .create_running_exclusive(&other.id, now, 0, TriggerType::Api)
            .await
            .unwrap()
            .is_some());

        store.close_execution(&first, &failed_at(now)).await.unwrap();
        assert!(store
            .create_running_exclusive(&job.id, now, 1, TriggerType::Retry)
            .await
            .unwrap()
            .is_some());
    }

    #[test]
    fn next_execution_uses_store_timezone() {
        let tokyo = cron::parse_timezone("Asia/Tokyo").unwrap();
        let store = store().with_timezone(tokyo);
        let job = store
            .create_job(&NewJob::http("nightly", "0 3 * * *", "http://x"))
            .unwrap();
        let next = job.next_execution_at.unwrap().with_timezone(&tokyo);
        assert_eq!(next.format("%H:%M").to_string(), "03:00");
    }

    #[tokio::test]
    async fn counts_only_failures_inside_window() {
        let store = store();
        let job = store
            .create_job(&NewJob::http("j", "* * * * *", "http://x"))
            .unwrap();
        let now = Utc::now();

        for started in [now - Duration::minutes(5), now - Duration::minutes(90)] {
            let id = store
                .create_running(&job.id, started, 0, TriggerType::Scheduled)
                .await
                .unwrap();
            store.close_execution(&id, &failed_at(started)).await.unwrap();
        }
        let ok = store
            .create_running(&job.id, now, 0, TriggerType::Scheduled)
            .await
            .unwrap();
        store
            .close_execution(
                &ok,
                &ExecutionOutcome {
                    status: ExecutionStatus::Success,
                    ..failed_at(now)
                },
            )
            .await
            .unwrap();

        let count = store
            .count_recent_failures(&job.id, now - Duration::minutes(60))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn orphaned_running_rows_are_failed() {
        let store = store();
        let job = store
            .create_job(&NewJob::http("j", "* * * * *", "http://x"))
            .unwrap();
        let id = store
            .create_running(&job.id, Utc::now(), 0, TriggerType::Manual)
            .await
            .unwrap();

        let n = store.fail_orphaned(Utc::now(), "interrupted").await.unwrap();
        assert_eq!(n, 1);
        let row = store.find_execution(&id).unwrap().unwrap();
        assert_eq!(row.status, ExecutionStatus::Failed);
        assert_eq!(row.error_message.as_deref(), Some("interrupted"));
    }

    #[tokio::test]
    async fn delete_job_removes_dependents() {
        let store = store();
        let job = store
            .create_job(&NewJob::http("j", "* * * * *", "http://x"))
            .unwrap();
        store
            .create_alert_rule(&NewAlertRule {
                job_id: job.id.clone(),
                window_minutes: 60,
                failure_threshold: 3,
                recipients: vec!["ops@example.com".to_string()],
                enabled: true,
            })
            .unwrap();
        store
            .create_running(&job.id, Utc::now(), 0, TriggerType::Api)
            .await
            .unwrap();

        store.delete_job(&job.id).unwrap();
        assert!(store.find_job(&job.id).unwrap().is_none());
        assert!(store.list_executions(&job.id, 10).unwrap().is_empty());
        assert!(store
            .list_enabled_rules_for_job(&job.id)
            .await
            .unwrap()
            .is_empty());
        assert!(matches!(
            store.delete_job(&job.id),
            Err(StoreError::NotFound { kind: "job", .. })
        ));
    }

    #[tokio::test]
    async fn rules_filter_disabled() {
        let store = store();
        let job = store
            .create_job(&NewJob::http("j", "* * * * *", "http://x"))
            .unwrap();
        for enabled in [true, false] {
            store
                .create_alert_rule(&NewAlertRule {
                    job_id: job.id.clone(),
                    window_minutes: 30,
                    failure_threshold: 2,
                    recipients: vec!["a@example.com".to_string(), "b@example.com".to_string()],
                    enabled,
                })
                .unwrap();
        }
        let rules = store.list_enabled_rules_for_job(&job.id).await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].recipients.len(), 2);
        assert_eq!(rules[0].window_minutes, 30);
    }

    #[tokio::test]
    async fn timestamps_update_after_execution() {
        let store = store();
        let job = store
            .create_job(&NewJob::http("j", "0 * * * *", "http://x"))
            .unwrap();
        let last = Utc::now();
        let next = last + Duration::hours(1);
        store
            .set_last_execution_and_next(&job.id, last, Some(next))
            .await
            .unwrap();
        let loaded = store.find_job(&job.id).unwrap().unwrap();
        assert_eq!(loaded.last_execution_at.map(fmt_ts), Some(fmt_ts(last)));
        assert_eq!(loaded.next_execution_at.map(fmt_ts), Some(fmt_ts(next)));
    }

    #[test]
    fn update_invocation_and_cron() {
        let store = store();
        let job = store
            .create_job(&NewJob::http("j", "* * * * *", "http://old"))
            .unwrap();
        store
            .update_invocation(&job.id, &Invocation::get("http://new"))
            .unwrap();
        store.update_cron_expression(&job.id, "0 0 * * *").unwrap();
        assert!(store.update_cron_expression(&job.id, "nope").is_err());

        let loaded = store.find_job(&job.id).unwrap().unwrap();
        assert_eq!(loaded.invocation.url, "http://new");
        assert_eq!(loaded.cron_expression, "0 0 * * *");
    }

    #[test]
    fn fixed_width_timestamps_sort_lexically() {
        let a = DateTime::parse_from_rfc3339("2026-01-01T00:00:09Z")
            .unwrap()
            .with_timezone(&Utc);
        let b = a + Duration::milliseconds(1500);
        assert!(fmt_ts(a) < fmt_ts(b));
        assert_eq!(fmt_ts(a), "2026-01-01T00:00:09.000Z");
    }
}
