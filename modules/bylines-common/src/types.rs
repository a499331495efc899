//! Shared domain types. Every mutable record carries the run id that wrote
//! it, so any run's writes can be traced and compensated later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum stored snippet length. Full document bodies are never retained.
pub const SNIPPET_MAX_CHARS: usize = 1500;

/// Maximum stored evidence excerpt length.
pub const EVIDENCE_TEXT_MAX_CHARS: usize = 800;

/// Truncate to `max` characters on a char boundary, appending an ellipsis
/// when anything was cut.
pub fn truncate_chars(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    let cut: String = value.chars().take(max).collect();
    format!("{cut}…")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
    RolledBack,
}

/// Why a fetch produced no document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FetchErrorKind {
    Timeout,
    SecurityBlocked,
    FetchError,
    BlockedByRobots,
    BodyTooLarge,
    RedirectLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum EvidenceType {
    MetaTag,
    JsonLd,
    Extracted,
    FetchedContent,
}

/// One bounded pipeline execution. Created RUNNING, closed with summary
/// counters; never deleted, only its status moves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub source_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub error_message: Option<String>,
    pub fetched_count: i64,
    pub new_articles_count: i64,
    pub updated_articles_count: i64,
    pub error_count: i64,
}

impl Run {
    pub fn begin(source_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id: source_id.into(),
            started_at: Utc::now(),
            ended_at: None,
            status: RunStatus::Running,
            error_message: None,
            fetched_count: 0,
            new_articles_count: 0,
            updated_articles_count: 0,
            error_count: 0,
        }
    }
}

/// Immutable record of one fetch attempt, success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchOutcome {
    pub id: Uuid,
    pub url: String,
    pub status_code: Option<i64>,
    pub latency_ms: Option<i64>,
    pub bytes_received: Option<i64>,
    pub error_kind: Option<FetchErrorKind>,
    pub created_at: DateTime<Utc>,
    pub run_id: Uuid,
}

impl FetchOutcome {
    pub fn error(url: impl Into<String>, kind: FetchErrorKind, latency_ms: i64, run_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            status_code: None,
            latency_ms: Some(latency_ms),
            bytes_received: None,
            error_kind: Some(kind),
            created_at: Utc::now(),
            run_id,
        }
    }
}

/// Successful fetch payload handed to the parser. The body is never
/// persisted; only derived snippets and evidence excerpts are stored.
#[derive(Debug, Clone)]
pub struct FetchedDoc {
    pub status_code: u16,
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub body_sha256: Option<String>,
    pub latency_ms: i64,
}

/// Candidate article produced by the parser, before storage assigns
/// identity and version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleDraft {
    pub canonical_url: String,
    pub source_id: String,
    pub title: Option<String>,
    pub author_hint: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub snippet: Option<String>,
}

/// Stored article with its evidence chain. `(canonical_url, source_id)` is
/// the dedup key; `id` is the stable reference that outlives field changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: Uuid,
    pub canonical_url: String,
    pub source_id: String,
    pub title: Option<String>,
    pub author_hint: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub snippet: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub evidence: Vec<EvidenceRecord>,
}

/// One content version of an article. Created only when the content hash
/// over the versioned fields actually changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleVersion {
    pub id: Uuid,
    pub article_id: Uuid,
    pub version: i64,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub run_id: Uuid,
}

/// Append-only provenance row tying one claimed article field to the text
/// it came from. `claim_path` is a JSON Pointer into the article ("/title").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub id: Uuid,
    pub article_id: Uuid,
    pub claim_path: String,
    pub evidence_type: EvidenceType,
    pub source_url: String,
    pub extraction_method: Option<String>,
    pub extracted_text: String,
    pub confidence: f64,
    pub extractor_version: Option<String>,
    pub input_ref: Option<String>,
    pub retrieved_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub run_id: Uuid,
}

/// Evidence as produced by the parser, before it is bound to an article.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceDraft {
    pub claim_path: String,
    pub evidence_type: EvidenceType,
    pub source_url: String,
    pub extraction_method: Option<String>,
    pub extracted_text: String,
    pub confidence: f64,
    pub extractor_version: Option<String>,
    pub input_ref: Option<String>,
    pub retrieved_at: DateTime<Utc>,
}

/// Byline identity observed within one source, aggregated from stored
/// articles and their evidence. The id is deterministic over
/// `(source_id, normalized name)` so repeated derivations agree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorProfile {
    pub id: Uuid,
    pub canonical_name: String,
    pub source_id: String,
    pub domains: Vec<String>,
    pub account_hints: Vec<String>,
    pub profile_urls: Vec<String>,
    pub article_count: i64,
}

/// A discovered author handle within one source. Unique on
/// `(source_id, source_identifier)`; `author_id` is set only by an applied
/// merge decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub source_id: String,
    pub source_identifier: String,
    pub author_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Canonical author identity. Rows exist only as a side effect of an
/// applied merge or a review-queue materialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    pub id: Uuid,
    pub canonical_name: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Audit row for one applied identity merge. Append-only; reversal writes
/// the tombstone fields, never deletes the row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeDecision {
    pub id: String,
    pub from_author_id: Uuid,
    pub to_author_id: Uuid,
    pub evidence_ids: Vec<String>,
    pub decision_criteria: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub run_id: Uuid,
    /// Accounts the applying run reassigned, so a revert touches exactly
    /// those rows and nothing else.
    pub reassigned_account_ids: Vec<Uuid>,
    pub reverted_at: Option<DateTime<Utc>>,
    pub reverted_by: Option<String>,
    pub reverted_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "héllo wörld";
        assert_eq!(truncate_chars(text, 100), text);
        assert_eq!(truncate_chars(text, 5), "héllo…");
    }

    #[test]
    fn test_run_begins_running_with_zero_counters() {
        let run = Run::begin("rss:techblog");
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.fetched_count, 0);
        assert!(run.ended_at.is_none());
    }
}
