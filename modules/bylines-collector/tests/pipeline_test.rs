//! Full pipeline against a local fixture server and an in-memory store:
//! discovery → compliant fetch → parse → run-tagged persistence, then undo.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use bylines_collector::{DiscoverStage, ParseStage, Parsed, Pipeline};
use bylines_common::{
    ArticleDraft, ComplianceConfig, EvidenceDraft, EvidenceType, FetchedDoc, RunStatus,
};
use bylines_fetch::{
    CompliantFetcher, PolitenessGate, RobotsFetchResult, RobotsPolicyCache, RobotsTransport,
    UrlValidator,
};
use bylines_store::{RollbackCoordinator, Store};

type Pages = Arc<Mutex<HashMap<String, String>>>;

/// Minimal HTTP/1.1 fixture server serving the current page table.
async fn spawn_server(pages: Pages) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fixture server");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let pages = Arc::clone(&pages);
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let mut read = 0;
                while !buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf[read..]).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => read += n,
                    }
                }
                let request = String::from_utf8_lossy(&buf[..read]).into_owned();
                let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                let body = pages
                    .lock()
                    .unwrap()
                    .get(&path)
                    .cloned()
                    .unwrap_or_default();
                let response = if body.is_empty() {
                    "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                        .to_string()
                } else {
                    format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    )
                };
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    addr
}

struct StubRobots;

#[async_trait]
impl RobotsTransport for StubRobots {
    async fn fetch_robots(&self, _robots_url: &str) -> RobotsFetchResult {
        RobotsFetchResult::Status {
            code: 404,
            body: String::new(),
        }
    }
}

struct FixedDiscovery {
    urls: Vec<String>,
}

#[async_trait]
impl DiscoverStage for FixedDiscovery {
    async fn discover(&self, _source_id: &str) -> Result<Vec<String>> {
        Ok(self.urls.clone())
    }
}

/// First line of the body becomes the title; the rest is the snippet.
struct LineParser;

#[async_trait]
impl ParseStage for LineParser {
    async fn parse(&self, doc: &FetchedDoc, source_id: &str) -> Result<Option<Parsed>> {
        let text = String::from_utf8_lossy(&doc.body);
        let title = text.lines().next().unwrap_or_default().to_string();
        let draft = ArticleDraft {
            canonical_url: doc.final_url.clone(),
            source_id: source_id.to_string(),
            title: Some(title.clone()),
            author_hint: Some("Jane Doe".to_string()),
            published_at: None,
            snippet: Some(text.to_string()),
        };
        let evidence = vec![EvidenceDraft {
            claim_path: "/title".to_string(),
            evidence_type: EvidenceType::Extracted,
            source_url: doc.final_url.clone(),
            extraction_method: Some("first_line".to_string()),
            extracted_text: title,
            confidence: 0.8,
            extractor_version: Some("line-1".to_string()),
            input_ref: doc.body_sha256.clone(),
            retrieved_at: Utc::now(),
        }];
        Ok(Some(Parsed { draft, evidence }))
    }
}

async fn build_pipeline(store: Store, urls: Vec<String>) -> Pipeline {
    let mut config = ComplianceConfig::new(1_000_000);
    config.per_domain_delay = Duration::ZERO;
    config.fetch_timeout = Duration::from_secs(5);

    let robots = Arc::new(RobotsPolicyCache::new(&config, Arc::new(StubRobots)));
    let gate = Arc::new(PolitenessGate::new(Duration::ZERO, 1));
    let validator = UrlValidator::new().allow_host("127.0.0.1");
    let fetcher =
        CompliantFetcher::with_parts(config, validator, robots, gate).expect("fetcher");

    Pipeline::new(
        fetcher,
        store,
        Arc::new(FixedDiscovery { urls }),
        Arc::new(LineParser),
    )
}

#[tokio::test]
async fn test_run_collects_reruns_cleanly_and_rolls_back() {
    let pages: Pages = Arc::new(Mutex::new(HashMap::from([
        ("/post/1".to_string(), "First Post\nBody one".to_string()),
        ("/post/2".to_string(), "Second Post\nBody two".to_string()),
    ])));
    let addr = spawn_server(Arc::clone(&pages)).await;

    let store = Store::in_memory().await.expect("store");
    let urls = vec![
        format!("http://{addr}/post/1"),
        format!("http://{addr}/post/2"),
        "http://169.254.169.254/latest/meta-data/".to_string(),
    ];
    let pipeline = build_pipeline(store.clone(), urls).await;

    // First pass: two new articles, one security rejection in the counters.
    let run1 = pipeline.run("rss:fixture").await.expect("run 1");
    assert_eq!(run1.status, RunStatus::Completed);
    assert_eq!(run1.fetched_count, 2);
    assert_eq!(run1.new_articles_count, 2);
    assert_eq!(run1.updated_articles_count, 0);
    assert_eq!(run1.error_count, 1);

    let persisted = store.get_run(run1.id).await.unwrap().unwrap();
    assert_eq!(persisted.status, RunStatus::Completed);
    assert_eq!(store.fetch_outcomes_for_run(run1.id).await.unwrap().len(), 3);

    // Unchanged content: no new versions, no updates.
    let run2 = pipeline.run("rss:fixture").await.expect("run 2");
    assert_eq!(run2.new_articles_count, 0);
    assert_eq!(run2.updated_articles_count, 0);

    // Change one page, run again: exactly one update.
    pages.lock().unwrap().insert(
        "/post/1".to_string(),
        "First Post, Revised\nBody one".to_string(),
    );
    let run3 = pipeline.run("rss:fixture").await.expect("run 3");
    assert_eq!(run3.new_articles_count, 0);
    assert_eq!(run3.updated_articles_count, 1);

    let articles = store.articles_for_source("rss:fixture").await.unwrap();
    assert_eq!(articles.len(), 2);
    let revised = articles
        .iter()
        .find(|a| a.canonical_url.contains("/post/1"))
        .unwrap();
    assert_eq!(revised.version, 2);
    assert_eq!(revised.title.as_deref(), Some("First Post, Revised"));

    // Undo the third run: back to the first-pass content.
    let rollback = RollbackCoordinator::new(store.clone())
        .rollback_run(run3.id)
        .await
        .unwrap();
    assert_eq!(rollback.versions_deleted, 1);
    assert_eq!(rollback.articles_reverted, 1);

    let reverted = store.article_by_id(revised.id).await.unwrap().unwrap();
    assert_eq!(reverted.version, 1);
    assert_eq!(reverted.title.as_deref(), Some("First Post"));
}

#[tokio::test]
async fn test_discovery_failure_marks_run_failed() {
    struct FailingDiscovery;

    #[async_trait]
    impl DiscoverStage for FailingDiscovery {
        async fn discover(&self, _source_id: &str) -> Result<Vec<String>> {
            anyhow::bail!("feed unreachable")
        }
    }

    let store = Store::in_memory().await.expect("store");
    let mut config = ComplianceConfig::new(1_000_000);
    config.per_domain_delay = Duration::ZERO;
    let robots = Arc::new(RobotsPolicyCache::new(&config, Arc::new(StubRobots)));
    let gate = Arc::new(PolitenessGate::new(Duration::ZERO, 1));
    let fetcher = CompliantFetcher::with_parts(
        config,
        UrlValidator::new(),
        robots,
        gate,
    )
    .expect("fetcher");

    let pipeline = Pipeline::new(
        fetcher,
        store.clone(),
        Arc::new(FailingDiscovery),
        Arc::new(LineParser),
    );

    let run = pipeline.run("rss:fixture").await.expect("failed run returned");
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error_message.as_deref().unwrap_or_default().contains("feed unreachable"));
}
