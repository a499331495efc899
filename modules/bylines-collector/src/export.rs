//! JSONL export of stored articles with their evidence. Conformance
//! checking against external record contracts happens downstream; this is
//! the complete read surface, nothing more.

use std::io::Write;

use anyhow::Result;
use tracing::info;

use bylines_store::Store;

/// Write one JSON object per article, evidence embedded, ordered by
/// canonical URL so repeated exports of the same state are byte-identical.
pub async fn export_jsonl<W: Write>(store: &Store, source_id: &str, out: &mut W) -> Result<u64> {
    let mut articles = store.articles_for_source(source_id).await?;
    articles.sort_by(|a, b| a.canonical_url.cmp(&b.canonical_url));

    let mut written = 0u64;
    for article in &articles {
        serde_json::to_writer(&mut *out, article)?;
        out.write_all(b"\n")?;
        written += 1;
    }
    info!(source_id, articles = written, "export complete");
    Ok(written)
}
