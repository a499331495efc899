//! Collaborator seams. Source connectors and document parsers live outside
//! this workspace; the pipeline only depends on these two traits.

use anyhow::Result;
use async_trait::async_trait;

use bylines_common::{ArticleDraft, EvidenceDraft, FetchedDoc};

/// What a parser extracted from one fetched document.
#[derive(Debug, Clone)]
pub struct Parsed {
    pub draft: ArticleDraft,
    pub evidence: Vec<EvidenceDraft>,
}

/// Produces the candidate URLs for one run. The sequence is finite; each
/// URL is an independent fetch request.
#[async_trait]
pub trait DiscoverStage: Send + Sync {
    async fn discover(&self, source_id: &str) -> Result<Vec<String>>;
}

/// Turns a fetched document into a draft plus evidence. Returning `None`
/// skips the document without counting an error (non-articles, 304 bodies).
#[async_trait]
pub trait ParseStage: Send + Sync {
    async fn parse(&self, doc: &FetchedDoc, source_id: &str) -> Result<Option<Parsed>>;
}
