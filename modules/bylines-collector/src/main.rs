use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use bylines_collector::{export::export_jsonl, DiscoverStage, ParseStage, Parsed, Pipeline};
use bylines_common::{ComplianceConfig, FetchedDoc};
use bylines_fetch::CompliantFetcher;
use bylines_resolve::{score_candidates, MergeApplier, ReviewDecision};
use bylines_store::{RollbackCoordinator, Store};

#[derive(Parser)]
#[command(name = "bylines")]
#[command(about = "Compliance-first author content collector")]
#[command(version)]
struct Cli {
    /// SQLite database URL
    #[arg(long, default_value = "sqlite://bylines.db", global = true)]
    database: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one collection pass over a list of candidate URLs
    Sync {
        /// Source identifier, e.g. "rss:techblog"
        source: String,

        /// File with one candidate URL per line
        #[arg(long)]
        urls: PathBuf,
    },

    /// Undo every write a run made
    RollbackRun { run_id: Uuid },

    /// Reverse one applied identity merge
    RollbackMerge {
        decision_id: String,

        #[arg(long)]
        by: Option<String>,

        #[arg(long)]
        reason: Option<String>,
    },

    /// Identity review workflow
    #[command(subcommand)]
    Review(ReviewCommand),

    /// Dump articles with evidence as JSONL
    Export {
        source: String,

        /// Output file; stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ReviewCommand {
    /// Score merge candidates and write them as JSON for review
    Queue {
        /// Output file; stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Apply reviewed decisions (a JSON array of decisions)
    Apply {
        decisions: PathBuf,
    },
}

/// Candidate URLs from a plain text file. Real source connectors plug in
/// through the same trait.
struct FileListDiscovery {
    path: PathBuf,
}

#[async_trait]
impl DiscoverStage for FileListDiscovery {
    async fn discover(&self, _source_id: &str) -> Result<Vec<String>> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect())
    }
}

/// Fetch-only mode: document parsers live outside this binary, so a bare
/// sync records fetch outcomes and nothing else.
struct NoParse;

#[async_trait]
impl ParseStage for NoParse {
    async fn parse(&self, _doc: &FetchedDoc, _source_id: &str) -> Result<Option<Parsed>> {
        Ok(None)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("bylines=info".parse()?))
        .init();

    let cli = Cli::parse();
    let store = Store::connect(&cli.database).await?;

    match cli.command {
        Commands::Sync { source, urls } => {
            let config = ComplianceConfig::from_env()?;
            let fetcher = CompliantFetcher::new(config)?;
            let pipeline = Pipeline::new(
                fetcher,
                store,
                Arc::new(FileListDiscovery { path: urls }),
                Arc::new(NoParse),
            );
            let run = pipeline.run(&source).await?;
            println!(
                "run {} {:?}: fetched={} new={} updated={} errors={}",
                run.id,
                run.status,
                run.fetched_count,
                run.new_articles_count,
                run.updated_articles_count,
                run.error_count
            );
        }
        Commands::RollbackRun { run_id } => {
            let summary = RollbackCoordinator::new(store).rollback_run(run_id).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::RollbackMerge {
            decision_id,
            by,
            reason,
        } => {
            let summary = RollbackCoordinator::new(store)
                .rollback_merge(&decision_id, by.as_deref(), reason.as_deref())
                .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Review(ReviewCommand::Queue { out }) => {
            let profiles = store.author_profiles().await?;
            let candidates = score_candidates(&profiles);
            info!(candidates = candidates.len(), "review queue built");
            let json = serde_json::to_string_pretty(&candidates)?;
            write_output(out, &json)?;
        }
        Commands::Review(ReviewCommand::Apply { decisions }) => {
            let text = fs::read_to_string(&decisions)
                .with_context(|| format!("reading {}", decisions.display()))?;
            let decisions: Vec<ReviewDecision> =
                serde_json::from_str(&text).context("parsing decisions")?;

            // Candidate ids are deterministic over the profile corpus, so
            // re-scoring here matches the queue the reviewer saw.
            let profiles = store.author_profiles().await?;
            let candidates = score_candidates(&profiles);

            let mut run = store.begin_run("review:apply").await?;
            let report = MergeApplier::new(store.clone())
                .apply_decisions(&candidates, &decisions, run.id)
                .await?;
            run.status = bylines_common::RunStatus::Completed;
            run.ended_at = Some(chrono::Utc::now());
            store.update_run(&run).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Export { source, out } => {
            let mut buffer = Vec::new();
            let written = export_jsonl(&store, &source, &mut buffer).await?;
            match out {
                Some(path) => fs::write(&path, &buffer)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => std::io::stdout().write_all(&buffer)?,
            }
            eprintln!("exported {written} articles");
        }
    }

    Ok(())
}

fn write_output(out: Option<PathBuf>, content: &str) -> Result<()> {
    match out {
        Some(path) => {
            fs::write(&path, content).with_context(|| format!("writing {}", path.display()))?
        }
        None => println!("{content}"),
    }
    Ok(())
}
