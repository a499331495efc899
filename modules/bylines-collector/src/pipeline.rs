//! One bounded collection run: discover → fetch → parse → upsert, every
//! write tagged with the run id, counters kept as the run progresses.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info, warn};

use bylines_common::{Run, RunStatus};
use bylines_fetch::CompliantFetcher;
use bylines_store::{Store, StoreError};

use crate::traits::{DiscoverStage, ParseStage};

pub struct Pipeline {
    fetcher: CompliantFetcher,
    store: Store,
    discovery: Arc<dyn DiscoverStage>,
    parser: Arc<dyn ParseStage>,
}

impl Pipeline {
    pub fn new(
        fetcher: CompliantFetcher,
        store: Store,
        discovery: Arc<dyn DiscoverStage>,
        parser: Arc<dyn ParseStage>,
    ) -> Self {
        Self {
            fetcher,
            store,
            discovery,
            parser,
        }
    }

    /// Execute one run for a source. Per-URL failures are recorded into the
    /// run's counters and do not stop the remaining discovery; an integrity
    /// violation marks the run FAILED and aborts.
    pub async fn run(&self, source_id: &str) -> Result<Run> {
        let mut run = self.store.begin_run(source_id).await?;
        info!(run_id = %run.id, source_id, "run started");

        let urls = match self.discovery.discover(source_id).await {
            Ok(urls) => urls,
            Err(e) => {
                return self.fail_run(run, format!("discovery failed: {e}")).await;
            }
        };
        info!(run_id = %run.id, candidates = urls.len(), "discovery complete");

        for url in &urls {
            let (doc, outcome) = self.fetcher.fetch(url, run.id).await;
            let fetch_ok = outcome.error_kind.is_none();
            if let Err(e) = self.store.record_fetch_outcome(&outcome).await {
                return self.handle_store_error(run, e).await;
            }
            if fetch_ok {
                run.fetched_count += 1;
            } else {
                run.error_count += 1;
                continue;
            }

            let Some(doc) = doc else { continue };
            if doc.body.is_empty() {
                // 304 or empty response; nothing to parse.
                continue;
            }

            let parsed = match self.parser.parse(&doc, source_id).await {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(url = %url, error = %e, "parse failed");
                    run.error_count += 1;
                    continue;
                }
            };
            let Some(parsed) = parsed else { continue };

            match self
                .store
                .upsert_article(&parsed.draft, &parsed.evidence, run.id)
                .await
            {
                Ok(result) => {
                    if result.created {
                        run.new_articles_count += 1;
                    } else if result.version_created {
                        run.updated_articles_count += 1;
                    }
                }
                Err(e) => return self.handle_store_error(run, e).await,
            }
        }

        run.status = RunStatus::Completed;
        run.ended_at = Some(Utc::now());
        self.store.update_run(&run).await?;
        info!(
            run_id = %run.id,
            fetched = run.fetched_count,
            new = run.new_articles_count,
            updated = run.updated_articles_count,
            errors = run.error_count,
            "run completed"
        );
        Ok(run)
    }

    async fn handle_store_error(&self, run: Run, error: StoreError) -> Result<Run> {
        match error {
            StoreError::Integrity(message) => {
                error!(run_id = %run.id, message, "integrity violation, aborting run");
                self.fail_run(run, message).await
            }
            other => {
                let message = other.to_string();
                let _ = self.fail_run(run, message).await;
                Err(other.into())
            }
        }
    }

    /// Mark the run FAILED with a message. The run's writes stay in place;
    /// `rollback-run` is the recovery path, never row surgery.
    async fn fail_run(&self, mut run: Run, message: String) -> Result<Run> {
        run.status = RunStatus::Failed;
        run.ended_at = Some(Utc::now());
        run.error_message = Some(message);
        self.store.update_run(&run).await?;
        Ok(run)
    }
}
