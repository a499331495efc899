//! Compensation for completed writes. A run's writes all carry its run id,
//! so undo is a fixed sequence of compensating steps over that tag, executed
//! in one transaction. Replaying a rollback finds nothing left to undo and
//! reports zero-count steps.

use chrono::Utc;
use serde::Serialize;
use sqlx::{Sqlite, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use bylines_common::RunStatus;

use crate::error::Result;
use crate::store::Store;

/// One compensating step of a run rollback, in execution order. Evidence
/// goes first so no version loses its provenance mid-undo, and the run row
/// is marked last so a crash leaves the run still claiming its writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationStep {
    DeleteEvidence,
    DeleteVersions,
    RevertArticles,
    DeleteFetchOutcomes,
    MarkRunRolledBack,
}

/// Summary of a completed run rollback.
#[derive(Debug, Clone, Serialize)]
pub struct RunRollback {
    pub run_id: Uuid,
    pub evidence_deleted: u64,
    pub versions_deleted: u64,
    pub articles_reverted: u64,
    pub articles_deleted: u64,
    pub fetch_outcomes_deleted: u64,
    pub steps: Vec<CompensationStep>,
}

impl RunRollback {
    fn noop(run_id: Uuid) -> Self {
        Self {
            run_id,
            evidence_deleted: 0,
            versions_deleted: 0,
            articles_reverted: 0,
            articles_deleted: 0,
            fetch_outcomes_deleted: 0,
            steps: Vec::new(),
        }
    }
}

/// Summary of a merge reversal. `reverted` is false when the decision was
/// already tombstoned or never existed.
#[derive(Debug, Clone, Serialize)]
pub struct MergeRollback {
    pub decision_id: String,
    pub reverted: bool,
    pub accounts_restored: u64,
}

pub struct RollbackCoordinator {
    store: Store,
}

impl RollbackCoordinator {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Undo everything a run wrote. Articles whose only version came from
    /// this run are deleted outright; articles with surviving versions are
    /// reverted to the latest surviving snapshot.
    pub async fn rollback_run(&self, run_id: Uuid) -> Result<RunRollback> {
        let Some(run) = self.store.get_run(run_id).await? else {
            warn!(%run_id, "rollback requested for unknown run, nothing to undo");
            return Ok(RunRollback::noop(run_id));
        };
        if run.status == RunStatus::RolledBack {
            warn!(%run_id, "run already rolled back, replaying is a no-op");
        }

        let run_key = run_id.to_string();
        let mut tx = self.store.pool().begin().await?;
        let mut steps = Vec::new();

        let evidence_deleted = sqlx::query("DELETE FROM evidence WHERE run_id = ?")
            .bind(&run_key)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        steps.push(CompensationStep::DeleteEvidence);

        // Capture the affected articles before their version rows go away.
        let touched: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT article_id FROM versions WHERE run_id = ?")
                .bind(&run_key)
                .fetch_all(&mut *tx)
                .await?;

        let versions_deleted = sqlx::query("DELETE FROM versions WHERE run_id = ?")
            .bind(&run_key)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        steps.push(CompensationStep::DeleteVersions);

        let mut articles_reverted = 0u64;
        let mut articles_deleted = 0u64;
        for article_id in &touched {
            if revert_article(&mut tx, article_id).await? {
                articles_reverted += 1;
            } else {
                articles_deleted += 1;
            }
        }
        steps.push(CompensationStep::RevertArticles);

        let fetch_outcomes_deleted = sqlx::query("DELETE FROM fetch_outcomes WHERE run_id = ?")
            .bind(&run_key)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        steps.push(CompensationStep::DeleteFetchOutcomes);

        sqlx::query("UPDATE runs SET status = ?, ended_at = ? WHERE id = ?")
            .bind(RunStatus::RolledBack)
            .bind(Utc::now())
            .bind(&run_key)
            .execute(&mut *tx)
            .await?;
        steps.push(CompensationStep::MarkRunRolledBack);

        tx.commit().await?;

        let summary = RunRollback {
            run_id,
            evidence_deleted,
            versions_deleted,
            articles_reverted,
            articles_deleted,
            fetch_outcomes_deleted,
            steps,
        };
        info!(
            %run_id,
            versions = summary.versions_deleted,
            evidence = summary.evidence_deleted,
            "run rolled back"
        );
        Ok(summary)
    }

    /// Reverse an applied merge: move exactly the accounts the decision
    /// recorded back to the losing author, and tombstone the decision row.
    /// The audit row itself is never deleted.
    pub async fn rollback_merge(
        &self,
        decision_id: &str,
        reverted_by: Option<&str>,
        reason: Option<&str>,
    ) -> Result<MergeRollback> {
        let Some(decision) = self.store.get_merge_decision(decision_id).await? else {
            warn!(decision_id, "rollback requested for unknown merge decision");
            return Ok(MergeRollback {
                decision_id: decision_id.to_string(),
                reverted: false,
                accounts_restored: 0,
            });
        };

        if decision.reverted_at.is_some() {
            return Ok(MergeRollback {
                decision_id: decision_id.to_string(),
                reverted: false,
                accounts_restored: 0,
            });
        }

        let mut tx = self.store.pool().begin().await?;

        let mut accounts_restored = 0u64;
        for account_id in &decision.reassigned_account_ids {
            // Only restore accounts still parked on the winner; a later
            // decision may have moved them again.
            let affected = sqlx::query(
                "UPDATE accounts SET author_id = ? WHERE id = ? AND author_id = ?",
            )
            .bind(decision.from_author_id.to_string())
            .bind(account_id.to_string())
            .bind(decision.to_author_id.to_string())
            .execute(&mut *tx)
            .await?
            .rows_affected();
            accounts_restored += affected;
        }

        sqlx::query(
            "UPDATE merge_decisions SET reverted_at = ?, reverted_by = ?, reverted_reason = ? \
             WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(reverted_by)
        .bind(reason)
        .bind(decision_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(decision_id, accounts_restored, "merge reverted");
        Ok(MergeRollback {
            decision_id: decision_id.to_string(),
            reverted: true,
            accounts_restored,
        })
    }
}

/// Restore an article to its latest surviving version snapshot. Returns
/// false (article deleted) when no version survives.
async fn revert_article(tx: &mut Transaction<'_, Sqlite>, article_id: &str) -> Result<bool> {
    #[derive(sqlx::FromRow)]
    struct Snapshot {
        version: i64,
        title_snapshot: Option<String>,
        author_hint_snapshot: Option<String>,
        published_at_snapshot: Option<chrono::DateTime<Utc>>,
        snippet_snapshot: Option<String>,
    }

    let survivor = sqlx::query_as::<_, Snapshot>(
        "SELECT version, title_snapshot, author_hint_snapshot, published_at_snapshot, \
                snippet_snapshot \
         FROM versions WHERE article_id = ? ORDER BY version DESC LIMIT 1",
    )
    .bind(article_id)
    .fetch_optional(&mut **tx)
    .await?;

    match survivor {
        Some(snapshot) => {
            sqlx::query(
                "UPDATE articles SET title = ?, author_hint = ?, published_at = ?, \
                        snippet = ?, version = ?, updated_at = ? \
                 WHERE id = ?",
            )
            .bind(&snapshot.title_snapshot)
            .bind(&snapshot.author_hint_snapshot)
            .bind(snapshot.published_at_snapshot)
            .bind(&snapshot.snippet_snapshot)
            .bind(snapshot.version)
            .bind(Utc::now())
            .bind(article_id)
            .execute(&mut **tx)
            .await?;
            Ok(true)
        }
        None => {
            // Evidence from older runs could still reference the article;
            // clear it before the article row goes.
            sqlx::query("DELETE FROM evidence WHERE article_id = ?")
                .bind(article_id)
                .execute(&mut **tx)
                .await?;
            sqlx::query("DELETE FROM articles WHERE id = ?")
                .bind(article_id)
                .execute(&mut **tx)
                .await?;
            Ok(false)
        }
    }
}
