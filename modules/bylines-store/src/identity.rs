//! Author identity persistence: canonical authors, per-source accounts, and
//! the append-only merge decision audit trail.
//!
//! Nothing here decides a merge. Rows change only when a reviewed decision
//! is applied, and every applied decision records exactly which accounts it
//! moved so it can be reverted surgically.

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use bylines_common::{Account, Author, MergeDecision};

use crate::error::{Result, StoreError};
use crate::runs::parse_uuid;
use crate::store::Store;

/// Reviewed, accepted merge ready to be applied. `decision_id` is the
/// deterministic candidate id, which doubles as the idempotency key.
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub decision_id: String,
    pub from_author_id: Uuid,
    pub from_name: String,
    pub to_author_id: Uuid,
    pub to_name: String,
    pub evidence_ids: Vec<String>,
    pub decision_criteria: Option<String>,
    pub created_by: Option<String>,
}

/// What applying a merge actually did. A replay of an already-applied
/// decision reports `inserted: false` and touches nothing.
#[derive(Debug, Clone)]
pub struct MergeApplied {
    pub decision_id: String,
    pub inserted: bool,
    pub reassigned_account_ids: Vec<Uuid>,
}

#[derive(sqlx::FromRow)]
struct AuthorRow {
    id: String,
    canonical_name: String,
    metadata: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AuthorRow {
    fn into_author(self) -> Result<Author> {
        Ok(Author {
            id: parse_uuid(&self.id)?,
            canonical_name: self.canonical_name,
            metadata: serde_json::from_str(&self.metadata)
                .map_err(|e| StoreError::Integrity(format!("author metadata: {e}")))?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: String,
    source_id: String,
    source_identifier: String,
    author_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl AccountRow {
    fn into_account(self) -> Result<Account> {
        Ok(Account {
            id: parse_uuid(&self.id)?,
            source_id: self.source_id,
            source_identifier: self.source_identifier,
            author_id: self.author_id.as_deref().map(parse_uuid).transpose()?,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MergeDecisionRow {
    id: String,
    from_author_id: String,
    to_author_id: String,
    evidence_ids: String,
    decision_criteria: Option<String>,
    created_at: DateTime<Utc>,
    created_by: Option<String>,
    run_id: String,
    reassigned_account_ids: String,
    reverted_at: Option<DateTime<Utc>>,
    reverted_by: Option<String>,
    reverted_reason: Option<String>,
}

impl MergeDecisionRow {
    fn into_decision(self) -> Result<MergeDecision> {
        let evidence_ids: Vec<String> = serde_json::from_str(&self.evidence_ids)
            .map_err(|e| StoreError::Integrity(format!("evidence_ids: {e}")))?;
        let reassigned: Vec<String> = serde_json::from_str(&self.reassigned_account_ids)
            .map_err(|e| StoreError::Integrity(format!("reassigned_account_ids: {e}")))?;
        Ok(MergeDecision {
            id: self.id,
            from_author_id: parse_uuid(&self.from_author_id)?,
            to_author_id: parse_uuid(&self.to_author_id)?,
            evidence_ids,
            decision_criteria: self.decision_criteria,
            created_at: self.created_at,
            created_by: self.created_by,
            run_id: parse_uuid(&self.run_id)?,
            reassigned_account_ids: reassigned
                .iter()
                .map(|s| parse_uuid(s))
                .collect::<Result<_>>()?,
            reverted_at: self.reverted_at,
            reverted_by: self.reverted_by,
            reverted_reason: self.reverted_reason,
        })
    }
}

impl Store {
    /// Create the author row if absent; returns the stored row either way.
    pub async fn ensure_author(&self, author_id: Uuid, canonical_name: &str) -> Result<Author> {
        let now = Utc::now();
        sqlx::query(
            "INSERT OR IGNORE INTO authors (id, canonical_name, metadata, created_at, updated_at) \
             VALUES (?, ?, '{}', ?, ?)",
        )
        .bind(author_id.to_string())
        .bind(canonical_name)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        let row = sqlx::query_as::<_, AuthorRow>("SELECT * FROM authors WHERE id = ?")
            .bind(author_id.to_string())
            .fetch_one(self.pool())
            .await?;
        row.into_author()
    }

    pub async fn get_author(&self, author_id: Uuid) -> Result<Option<Author>> {
        let row = sqlx::query_as::<_, AuthorRow>("SELECT * FROM authors WHERE id = ?")
            .bind(author_id.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.map(AuthorRow::into_author).transpose()
    }

    /// Register an observed handle within a source, linking it to `author_id`
    /// when the handle is new. An existing row keeps whatever linkage the
    /// review process last gave it.
    pub async fn upsert_account(
        &self,
        source_id: &str,
        source_identifier: &str,
        author_id: Option<Uuid>,
    ) -> Result<Account> {
        sqlx::query(
            "INSERT OR IGNORE INTO accounts (id, source_id, source_identifier, author_id, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(source_id)
        .bind(source_identifier)
        .bind(author_id.map(|id| id.to_string()))
        .bind(Utc::now())
        .execute(self.pool())
        .await?;

        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT * FROM accounts WHERE source_id = ? AND source_identifier = ?",
        )
        .bind(source_id)
        .bind(source_identifier)
        .fetch_one(self.pool())
        .await?;
        row.into_account()
    }

    pub async fn accounts_for_author(&self, author_id: Uuid) -> Result<Vec<Account>> {
        let rows = sqlx::query_as::<_, AccountRow>(
            "SELECT * FROM accounts WHERE author_id = ? ORDER BY source_id, source_identifier",
        )
        .bind(author_id.to_string())
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(AccountRow::into_account).collect()
    }

    /// Apply one accepted merge atomically: ensure both author rows exist,
    /// move every account from the losing author to the winner, and record
    /// the decision with the exact account ids it moved.
    ///
    /// Replaying a decision id that was already applied is a no-op.
    pub async fn apply_merge(&self, request: &MergeRequest, run_id: Uuid) -> Result<MergeApplied> {
        let now = Utc::now();
        let mut tx = self.pool().begin().await?;

        let already = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM merge_decisions WHERE id = ?",
        )
        .bind(&request.decision_id)
        .fetch_one(&mut *tx)
        .await?;
        if already > 0 {
            tx.rollback().await?;
            return Ok(MergeApplied {
                decision_id: request.decision_id.clone(),
                inserted: false,
                reassigned_account_ids: Vec::new(),
            });
        }

        for (id, name) in [
            (request.from_author_id, request.from_name.as_str()),
            (request.to_author_id, request.to_name.as_str()),
        ] {
            sqlx::query(
                "INSERT OR IGNORE INTO authors (id, canonical_name, metadata, created_at, updated_at) \
                 VALUES (?, ?, '{}', ?, ?)",
            )
            .bind(id.to_string())
            .bind(name)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        let moved: Vec<String> =
            sqlx::query_scalar("SELECT id FROM accounts WHERE author_id = ? ORDER BY id")
                .bind(request.from_author_id.to_string())
                .fetch_all(&mut *tx)
                .await?;
        sqlx::query("UPDATE accounts SET author_id = ? WHERE author_id = ?")
            .bind(request.to_author_id.to_string())
            .bind(request.from_author_id.to_string())
            .execute(&mut *tx)
            .await?;

        let reassigned: Vec<Uuid> = moved
            .iter()
            .map(|s| parse_uuid(s))
            .collect::<Result<_>>()?;
        let reassigned_json = serde_json::to_string(
            &reassigned.iter().map(Uuid::to_string).collect::<Vec<_>>(),
        )
        .map_err(|e| StoreError::Integrity(format!("reassigned_account_ids: {e}")))?;
        let evidence_json = serde_json::to_string(&request.evidence_ids)
            .map_err(|e| StoreError::Integrity(format!("evidence_ids: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO merge_decisions
                (id, from_author_id, to_author_id, evidence_ids,
                 decision_criteria, created_at, created_by, run_id,
                 reassigned_account_ids)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&request.decision_id)
        .bind(request.from_author_id.to_string())
        .bind(request.to_author_id.to_string())
        .bind(evidence_json)
        .bind(&request.decision_criteria)
        .bind(now)
        .bind(&request.created_by)
        .bind(run_id.to_string())
        .bind(reassigned_json)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(
            decision_id = %request.decision_id,
            reassigned = reassigned.len(),
            "merge applied"
        );
        Ok(MergeApplied {
            decision_id: request.decision_id.clone(),
            inserted: true,
            reassigned_account_ids: reassigned,
        })
    }

    pub async fn get_merge_decision(&self, decision_id: &str) -> Result<Option<MergeDecision>> {
        let row = sqlx::query_as::<_, MergeDecisionRow>(
            "SELECT * FROM merge_decisions WHERE id = ?",
        )
        .bind(decision_id)
        .fetch_optional(self.pool())
        .await?;
        row.map(MergeDecisionRow::into_decision).transpose()
    }

    pub async fn merge_decisions_for_run(&self, run_id: Uuid) -> Result<Vec<MergeDecision>> {
        let rows = sqlx::query_as::<_, MergeDecisionRow>(
            "SELECT * FROM merge_decisions WHERE run_id = ? ORDER BY created_at, id",
        )
        .bind(run_id.to_string())
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(MergeDecisionRow::into_decision).collect()
    }
}
