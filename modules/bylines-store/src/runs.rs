//! Run ledger: opens and closes run records and keeps the append-only
//! fetch outcome log.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use bylines_common::{FetchErrorKind, FetchOutcome, Run, RunStatus};

use crate::error::{Result, StoreError};
use crate::store::Store;

#[derive(sqlx::FromRow)]
struct RunRow {
    id: String,
    source_id: String,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    status: RunStatus,
    error_message: Option<String>,
    fetched_count: i64,
    new_articles_count: i64,
    updated_articles_count: i64,
    error_count: i64,
}

impl RunRow {
    fn into_run(self) -> Result<Run> {
        Ok(Run {
            id: parse_uuid(&self.id)?,
            source_id: self.source_id,
            started_at: self.started_at,
            ended_at: self.ended_at,
            status: self.status,
            error_message: self.error_message,
            fetched_count: self.fetched_count,
            new_articles_count: self.new_articles_count,
            updated_articles_count: self.updated_articles_count,
            error_count: self.error_count,
        })
    }
}

#[derive(sqlx::FromRow)]
struct FetchOutcomeRow {
    id: String,
    url: String,
    status_code: Option<i64>,
    latency_ms: Option<i64>,
    bytes_received: Option<i64>,
    error_kind: Option<FetchErrorKind>,
    created_at: DateTime<Utc>,
    run_id: String,
}

pub(crate) fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|_| StoreError::Integrity(format!("malformed uuid: {value}")))
}

impl Store {
    /// Open a new run record in RUNNING state and return its id — the tag
    /// every subsequent write of this run carries.
    pub async fn begin_run(&self, source_id: &str) -> Result<Run> {
        let run = Run::begin(source_id);
        sqlx::query(
            r#"
            INSERT INTO runs
                (id, source_id, started_at, ended_at, status, error_message,
                 fetched_count, new_articles_count, updated_articles_count, error_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.id.to_string())
        .bind(&run.source_id)
        .bind(run.started_at)
        .bind(run.ended_at)
        .bind(run.status)
        .bind(&run.error_message)
        .bind(run.fetched_count)
        .bind(run.new_articles_count)
        .bind(run.updated_articles_count)
        .bind(run.error_count)
        .execute(self.pool())
        .await?;
        Ok(run)
    }

    /// Persist end-state status and summary counters for a run.
    pub async fn update_run(&self, run: &Run) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE runs
            SET ended_at = ?, status = ?, error_message = ?,
                fetched_count = ?, new_articles_count = ?,
                updated_articles_count = ?, error_count = ?
            WHERE id = ?
            "#,
        )
        .bind(run.ended_at)
        .bind(run.status)
        .bind(&run.error_message)
        .bind(run.fetched_count)
        .bind(run.new_articles_count)
        .bind(run.updated_articles_count)
        .bind(run.error_count)
        .bind(run.id.to_string())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<Option<Run>> {
        let row = sqlx::query_as::<_, RunRow>("SELECT * FROM runs WHERE id = ?")
            .bind(run_id.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.map(RunRow::into_run).transpose()
    }

    /// Append one fetch outcome row. Immutable once written.
    pub async fn record_fetch_outcome(&self, outcome: &FetchOutcome) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO fetch_outcomes
                (id, url, status_code, latency_ms, bytes_received, error_kind, created_at, run_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(outcome.id.to_string())
        .bind(&outcome.url)
        .bind(outcome.status_code)
        .bind(outcome.latency_ms)
        .bind(outcome.bytes_received)
        .bind(outcome.error_kind)
        .bind(outcome.created_at)
        .bind(outcome.run_id.to_string())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn fetch_outcomes_for_run(&self, run_id: Uuid) -> Result<Vec<FetchOutcome>> {
        let rows = sqlx::query_as::<_, FetchOutcomeRow>(
            "SELECT * FROM fetch_outcomes WHERE run_id = ? ORDER BY created_at, id",
        )
        .bind(run_id.to_string())
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(FetchOutcome {
                    id: parse_uuid(&row.id)?,
                    url: row.url,
                    status_code: row.status_code,
                    latency_ms: row.latency_ms,
                    bytes_received: row.bytes_received,
                    error_kind: row.error_kind,
                    created_at: row.created_at,
                    run_id: parse_uuid(&row.run_id)?,
                })
            })
            .collect()
    }
}
