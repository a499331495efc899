//! Deterministic content hashing for article versioning.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::types::ArticleDraft;

#[derive(Serialize)]
struct VersionedFields<'a> {
    title: Option<&'a str>,
    author_hint: Option<&'a str>,
    snippet: Option<&'a str>,
    published_at: Option<&'a DateTime<Utc>>,
}

/// SHA-256 over the versioned article fields. Timestamps, version counters
/// and evidence are excluded so a metadata-only refresh hashes identically.
pub fn content_hash(draft: &ArticleDraft) -> String {
    let fields = VersionedFields {
        title: draft.title.as_deref(),
        author_hint: draft.author_hint.as_deref(),
        snippet: draft.snippet.as_deref(),
        published_at: draft.published_at.as_ref(),
    };
    let payload = serde_json::to_vec(&fields).expect("versioned fields always serialize");
    let digest = Sha256::digest(&payload);
    hex::encode(digest)
}
