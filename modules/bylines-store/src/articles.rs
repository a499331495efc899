//! Article persistence: dedup on `(canonical_url, source_id)`, content-hash
//! gated versioning, and the append-only evidence ledger.
//!
//! Evidence is written only when a version is created, so every evidence row
//! belongs to exactly one version's run and an undo of that run removes
//! exactly that version's provenance.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, Transaction};
use tracing::debug;
use uuid::Uuid;

use bylines_common::{
    canonicalize_url, content_hash, truncate_chars, Article, ArticleDraft, ArticleVersion,
    AuthorProfile, EvidenceDraft, EvidenceRecord, EvidenceType, EVIDENCE_TEXT_MAX_CHARS,
    SNIPPET_MAX_CHARS,
};

use crate::error::Result;
use crate::runs::parse_uuid;
use crate::store::Store;

/// Outcome of a single upsert. `version_created` is false when the incoming
/// content hashed identically to the latest version.
#[derive(Debug, Clone)]
pub struct UpsertResult {
    pub article: Article,
    pub created: bool,
    pub version_created: bool,
}

#[derive(sqlx::FromRow)]
struct ArticleRow {
    id: String,
    canonical_url: String,
    source_id: String,
    title: Option<String>,
    author_hint: Option<String>,
    published_at: Option<DateTime<Utc>>,
    snippet: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ArticleRow {
    fn into_article(self, evidence: Vec<EvidenceRecord>) -> Result<Article> {
        Ok(Article {
            id: parse_uuid(&self.id)?,
            canonical_url: self.canonical_url,
            source_id: self.source_id,
            title: self.title,
            author_hint: self.author_hint,
            published_at: self.published_at,
            snippet: self.snippet,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
            evidence,
        })
    }
}

#[derive(sqlx::FromRow)]
struct VersionRow {
    id: String,
    article_id: String,
    version: i64,
    content_hash: String,
    created_at: DateTime<Utc>,
    run_id: String,
}

#[derive(sqlx::FromRow)]
struct EvidenceRow {
    id: String,
    article_id: String,
    claim_path: String,
    evidence_type: EvidenceType,
    source_url: String,
    extraction_method: Option<String>,
    extracted_text: String,
    confidence: f64,
    extractor_version: Option<String>,
    input_ref: Option<String>,
    retrieved_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    run_id: String,
}

impl EvidenceRow {
    fn into_record(self) -> Result<EvidenceRecord> {
        Ok(EvidenceRecord {
            id: parse_uuid(&self.id)?,
            article_id: parse_uuid(&self.article_id)?,
            claim_path: self.claim_path,
            evidence_type: self.evidence_type,
            source_url: self.source_url,
            extraction_method: self.extraction_method,
            extracted_text: self.extracted_text,
            confidence: self.confidence,
            extractor_version: self.extractor_version,
            input_ref: self.input_ref,
            retrieved_at: self.retrieved_at,
            created_at: self.created_at,
            run_id: parse_uuid(&self.run_id)?,
        })
    }
}

impl Store {
    /// Insert or update one article atomically. The locator is canonicalized
    /// before the dedup lookup, so syntactic URL variants land on one row.
    ///
    /// A version row and its evidence are written only when the content hash
    /// over the versioned fields changed; an unchanged re-crawl leaves the
    /// article, its version counter, and the evidence ledger untouched.
    pub async fn upsert_article(
        &self,
        draft: &ArticleDraft,
        evidence: &[EvidenceDraft],
        run_id: Uuid,
    ) -> Result<UpsertResult> {
        let mut draft = draft.clone();
        draft.canonical_url = canonicalize_url(&draft.canonical_url);
        if let Some(snippet) = draft.snippet.as_deref() {
            draft.snippet = Some(truncate_chars(snippet, SNIPPET_MAX_CHARS));
        }
        let hash = content_hash(&draft);
        let now = Utc::now();

        let mut tx = self.pool().begin().await?;

        let existing = sqlx::query_as::<_, ArticleRow>(
            "SELECT * FROM articles WHERE canonical_url = ? AND source_id = ?",
        )
        .bind(&draft.canonical_url)
        .bind(&draft.source_id)
        .fetch_optional(&mut *tx)
        .await?;

        let result = match existing {
            None => {
                let article_id = Uuid::new_v4();
                sqlx::query(
                    r#"
                    INSERT INTO articles
                        (id, canonical_url, source_id, title, author_hint,
                         published_at, snippet, version, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
                    "#,
                )
                .bind(article_id.to_string())
                .bind(&draft.canonical_url)
                .bind(&draft.source_id)
                .bind(&draft.title)
                .bind(&draft.author_hint)
                .bind(draft.published_at)
                .bind(&draft.snippet)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;

                insert_version(&mut tx, article_id, 1, &hash, &draft, now, run_id).await?;
                let records =
                    insert_evidence(&mut tx, article_id, evidence, now, run_id).await?;

                debug!(url = %draft.canonical_url, "article created");
                UpsertResult {
                    article: Article {
                        id: article_id,
                        canonical_url: draft.canonical_url,
                        source_id: draft.source_id,
                        title: draft.title,
                        author_hint: draft.author_hint,
                        published_at: draft.published_at,
                        snippet: draft.snippet,
                        version: 1,
                        created_at: now,
                        updated_at: now,
                        evidence: records,
                    },
                    created: true,
                    version_created: true,
                }
            }
            Some(row) => {
                let article_id = parse_uuid(&row.id)?;
                let latest_hash = sqlx::query_scalar::<_, String>(
                    "SELECT content_hash FROM versions WHERE article_id = ? \
                     ORDER BY version DESC LIMIT 1",
                )
                .bind(&row.id)
                .fetch_optional(&mut *tx)
                .await?;

                if latest_hash.as_deref() == Some(hash.as_str()) {
                    let prior = self.evidence_rows(&mut tx, &row.id).await?;
                    UpsertResult {
                        article: row.into_article(prior)?,
                        created: false,
                        version_created: false,
                    }
                } else {
                    let next = row.version + 1;
                    sqlx::query(
                        r#"
                        UPDATE articles
                        SET title = ?, author_hint = ?, published_at = ?,
                            snippet = ?, version = ?, updated_at = ?
                        WHERE id = ?
                        "#,
                    )
                    .bind(&draft.title)
                    .bind(&draft.author_hint)
                    .bind(draft.published_at)
                    .bind(&draft.snippet)
                    .bind(next)
                    .bind(now)
                    .bind(&row.id)
                    .execute(&mut *tx)
                    .await?;

                    insert_version(&mut tx, article_id, next, &hash, &draft, now, run_id)
                        .await?;
                    insert_evidence(&mut tx, article_id, evidence, now, run_id).await?;
                    let all = self.evidence_rows(&mut tx, &row.id).await?;

                    debug!(url = %draft.canonical_url, version = next, "article updated");
                    UpsertResult {
                        article: Article {
                            id: article_id,
                            canonical_url: draft.canonical_url,
                            source_id: draft.source_id,
                            title: draft.title,
                            author_hint: draft.author_hint,
                            published_at: draft.published_at,
                            snippet: draft.snippet,
                            version: next,
                            created_at: row.created_at,
                            updated_at: now,
                            evidence: all,
                        },
                        created: false,
                        version_created: true,
                    }
                }
            }
        };

        tx.commit().await?;
        Ok(result)
    }

    pub async fn article_by_id(&self, article_id: Uuid) -> Result<Option<Article>> {
        let row = sqlx::query_as::<_, ArticleRow>("SELECT * FROM articles WHERE id = ?")
            .bind(article_id.to_string())
            .fetch_optional(self.pool())
            .await?;
        match row {
            None => Ok(None),
            Some(row) => {
                let evidence = self.evidence_for_article(article_id).await?;
                Ok(Some(row.into_article(evidence)?))
            }
        }
    }

    /// All articles for a source, evidence included, newest first.
    pub async fn articles_for_source(&self, source_id: &str) -> Result<Vec<Article>> {
        let rows = sqlx::query_as::<_, ArticleRow>(
            "SELECT * FROM articles WHERE source_id = ? ORDER BY updated_at DESC, id",
        )
        .bind(source_id)
        .fetch_all(self.pool())
        .await?;

        let mut articles = Vec::with_capacity(rows.len());
        for row in rows {
            let evidence = self.evidence_for_article(parse_uuid(&row.id)?).await?;
            articles.push(row.into_article(evidence)?);
        }
        Ok(articles)
    }

    pub async fn versions_for_article(&self, article_id: Uuid) -> Result<Vec<ArticleVersion>> {
        let rows = sqlx::query_as::<_, VersionRow>(
            "SELECT id, article_id, version, content_hash, created_at, run_id \
             FROM versions WHERE article_id = ? ORDER BY version",
        )
        .bind(article_id.to_string())
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ArticleVersion {
                    id: parse_uuid(&row.id)?,
                    article_id: parse_uuid(&row.article_id)?,
                    version: row.version,
                    content_hash: row.content_hash,
                    created_at: row.created_at,
                    run_id: parse_uuid(&row.run_id)?,
                })
            })
            .collect()
    }

    pub async fn evidence_for_article(&self, article_id: Uuid) -> Result<Vec<EvidenceRecord>> {
        let rows = sqlx::query_as::<_, EvidenceRow>(
            "SELECT * FROM evidence WHERE article_id = ? ORDER BY created_at, id",
        )
        .bind(article_id.to_string())
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(EvidenceRow::into_record).collect()
    }

    async fn evidence_rows(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        article_id: &str,
    ) -> Result<Vec<EvidenceRecord>> {
        let rows = sqlx::query_as::<_, EvidenceRow>(
            "SELECT * FROM evidence WHERE article_id = ? ORDER BY created_at, id",
        )
        .bind(article_id)
        .fetch_all(&mut **tx)
        .await?;
        rows.into_iter().map(EvidenceRow::into_record).collect()
    }

    /// Derive per-source author profiles from stored bylines. Articles are
    /// grouped on `(source_id, normalized author hint, domain)` — the same
    /// byline on two domains yields two profiles — and the profile id is a
    /// v5 UUID over that key so derivation is repeatable.
    pub async fn author_profiles(&self) -> Result<Vec<AuthorProfile>> {
        let rows = sqlx::query_as::<_, ArticleRow>(
            "SELECT * FROM articles WHERE author_hint IS NOT NULL ORDER BY source_id, id",
        )
        .fetch_all(self.pool())
        .await?;

        let mut grouped: BTreeMap<(String, String, String), AuthorProfile> = BTreeMap::new();
        for row in rows {
            let hint = match row.author_hint.as_deref() {
                Some(h) if !h.trim().is_empty() => h.trim().to_string(),
                _ => continue,
            };
            let normalized = normalize_name(&hint);
            let domain = url_domain(&row.canonical_url).unwrap_or_default();
            let key = (row.source_id.clone(), normalized.clone(), domain.clone());
            let profile = grouped.entry(key).or_insert_with(|| AuthorProfile {
                id: Uuid::new_v5(
                    &Uuid::NAMESPACE_URL,
                    format!("{}|{}|{}", row.source_id, normalized, domain).as_bytes(),
                ),
                canonical_name: hint.clone(),
                source_id: row.source_id.clone(),
                domains: Vec::new(),
                account_hints: Vec::new(),
                profile_urls: Vec::new(),
                article_count: 0,
            });
            profile.article_count += 1;

            if !domain.is_empty() {
                push_unique(&mut profile.domains, domain);
            }
            if hint.starts_with('@') || hint.starts_with("http") {
                push_unique(&mut profile.account_hints, hint.clone());
            }

            let evidence = self.evidence_for_article(parse_uuid(&row.id)?).await?;
            for record in evidence {
                if looks_like_profile_url(&record.source_url) {
                    push_unique(&mut profile.profile_urls, record.source_url);
                }
            }
        }

        Ok(grouped.into_values().collect())
    }
}

async fn insert_version(
    tx: &mut Transaction<'_, Sqlite>,
    article_id: Uuid,
    version: i64,
    hash: &str,
    draft: &ArticleDraft,
    now: DateTime<Utc>,
    run_id: Uuid,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO versions
            (id, article_id, version, content_hash, title_snapshot,
             author_hint_snapshot, published_at_snapshot, snippet_snapshot,
             created_at, run_id)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(article_id.to_string())
    .bind(version)
    .bind(hash)
    .bind(&draft.title)
    .bind(&draft.author_hint)
    .bind(draft.published_at)
    .bind(&draft.snippet)
    .bind(now)
    .bind(run_id.to_string())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_evidence(
    tx: &mut Transaction<'_, Sqlite>,
    article_id: Uuid,
    drafts: &[EvidenceDraft],
    now: DateTime<Utc>,
    run_id: Uuid,
) -> Result<Vec<EvidenceRecord>> {
    let mut records = Vec::with_capacity(drafts.len());
    for draft in drafts {
        let record = EvidenceRecord {
            id: Uuid::new_v4(),
            article_id,
            claim_path: draft.claim_path.clone(),
            evidence_type: draft.evidence_type,
            source_url: draft.source_url.clone(),
            extraction_method: draft.extraction_method.clone(),
            extracted_text: truncate_chars(&draft.extracted_text, EVIDENCE_TEXT_MAX_CHARS),
            confidence: draft.confidence,
            extractor_version: draft.extractor_version.clone(),
            input_ref: draft.input_ref.clone(),
            retrieved_at: draft.retrieved_at,
            created_at: now,
            run_id,
        };
        sqlx::query(
            r#"
            INSERT INTO evidence
                (id, article_id, claim_path, evidence_type, source_url,
                 extraction_method, extracted_text, confidence,
                 extractor_version, input_ref, retrieved_at, created_at, run_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.article_id.to_string())
        .bind(&record.claim_path)
        .bind(record.evidence_type)
        .bind(&record.source_url)
        .bind(&record.extraction_method)
        .bind(&record.extracted_text)
        .bind(record.confidence)
        .bind(&record.extractor_version)
        .bind(&record.input_ref)
        .bind(record.retrieved_at)
        .bind(record.created_at)
        .bind(record.run_id.to_string())
        .execute(&mut **tx)
        .await?;
        records.push(record);
    }
    Ok(records)
}

fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn url_domain(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

fn looks_like_profile_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    ["/author/", "/people/", "/profile/", "/bio"]
        .iter()
        .any(|marker| lower.contains(marker))
}

fn push_unique(values: &mut Vec<String>, value: String) {
    if !values.iter().any(|v| v == &value) {
        values.push(value);
    }
}
