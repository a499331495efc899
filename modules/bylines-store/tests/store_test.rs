//! End-to-end store behavior against an in-memory database: dedup and
//! versioning, the append-only evidence ledger, and run/merge compensation.

use chrono::Utc;
use uuid::Uuid;

use bylines_common::{ArticleDraft, EvidenceDraft, EvidenceType, RunStatus};
use bylines_store::{MergeRequest, RollbackCoordinator, Store};

async fn store() -> Store {
    Store::in_memory().await.expect("in-memory store")
}

fn draft(url: &str, title: &str) -> ArticleDraft {
    ArticleDraft {
        canonical_url: url.to_string(),
        source_id: "rss:techblog".to_string(),
        title: Some(title.to_string()),
        author_hint: Some("Jane Doe".to_string()),
        published_at: None,
        snippet: Some(format!("{title} — opening paragraph")),
    }
}

fn evidence(url: &str, text: &str) -> Vec<EvidenceDraft> {
    vec![EvidenceDraft {
        claim_path: "/title".to_string(),
        evidence_type: EvidenceType::MetaTag,
        source_url: url.to_string(),
        extraction_method: Some("og:title".to_string()),
        extracted_text: text.to_string(),
        confidence: 0.9,
        extractor_version: Some("meta-1".to_string()),
        input_ref: None,
        retrieved_at: Utc::now(),
    }]
}

#[tokio::test]
async fn test_unchanged_recrawl_creates_no_version() {
    let store = store().await;
    let run1 = store.begin_run("rss:techblog").await.unwrap();
    let run2 = store.begin_run("rss:techblog").await.unwrap();

    let url = "https://example.com/post/1";
    let first = store
        .upsert_article(&draft(url, "Title"), &evidence(url, "Title"), run1.id)
        .await
        .unwrap();
    assert!(first.created);
    assert!(first.version_created);
    assert_eq!(first.article.version, 1);

    let second = store
        .upsert_article(&draft(url, "Title"), &evidence(url, "Title"), run2.id)
        .await
        .unwrap();
    assert!(!second.created);
    assert!(!second.version_created);
    assert_eq!(second.article.version, 1);
    assert_eq!(second.article.id, first.article.id);

    // Evidence is only appended alongside a version.
    assert_eq!(second.article.evidence.len(), 1);
    let versions = store.versions_for_article(first.article.id).await.unwrap();
    assert_eq!(versions.len(), 1);
}

#[tokio::test]
async fn test_url_variants_dedup_to_one_article() {
    let store = store().await;
    let run = store.begin_run("rss:techblog").await.unwrap();

    let a = store
        .upsert_article(
            &draft("https://Example.com/post/1?utm_source=x", "Title"),
            &[],
            run.id,
        )
        .await
        .unwrap();
    let b = store
        .upsert_article(&draft("https://example.com/post/1", "Title"), &[], run.id)
        .await
        .unwrap();
    assert_eq!(a.article.id, b.article.id);
    assert!(!b.version_created);
}

#[tokio::test]
async fn test_changed_content_appends_version_and_evidence() {
    let store = store().await;
    let run1 = store.begin_run("rss:techblog").await.unwrap();
    let run2 = store.begin_run("rss:techblog").await.unwrap();

    let url = "https://example.com/post/1";
    let first = store
        .upsert_article(&draft(url, "Original"), &evidence(url, "Original"), run1.id)
        .await
        .unwrap();
    let second = store
        .upsert_article(&draft(url, "Revised"), &evidence(url, "Revised"), run2.id)
        .await
        .unwrap();

    assert!(second.version_created);
    assert_eq!(second.article.version, 2);
    assert_eq!(second.article.title.as_deref(), Some("Revised"));

    // First version's provenance survives the update.
    assert_eq!(second.article.evidence.len(), 2);
    let versions = store.versions_for_article(first.article.id).await.unwrap();
    assert_eq!(
        versions.iter().map(|v| v.version).collect::<Vec<_>>(),
        vec![1, 2]
    );
    assert_ne!(versions[0].content_hash, versions[1].content_hash);
}

#[tokio::test]
async fn test_versions_stay_contiguous_across_runs() {
    let store = store().await;
    let url = "https://example.com/post/1";
    let mut article_id = None;
    for title in ["One", "Two", "Three"] {
        let run = store.begin_run("rss:techblog").await.unwrap();
        let result = store
            .upsert_article(&draft(url, title), &[], run.id)
            .await
            .unwrap();
        article_id = Some(result.article.id);
    }
    let versions = store.versions_for_article(article_id.unwrap()).await.unwrap();
    assert_eq!(
        versions.iter().map(|v| v.version).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
}

#[tokio::test]
async fn test_rollback_reverts_update_and_keeps_prior_evidence() {
    let store = store().await;
    let run1 = store.begin_run("rss:techblog").await.unwrap();
    let run2 = store.begin_run("rss:techblog").await.unwrap();

    let url = "https://example.com/post/1";
    let first = store
        .upsert_article(&draft(url, "Original"), &evidence(url, "Original"), run1.id)
        .await
        .unwrap();
    store
        .upsert_article(&draft(url, "Revised"), &evidence(url, "Revised"), run2.id)
        .await
        .unwrap();

    let coordinator = RollbackCoordinator::new(store.clone());
    let summary = coordinator.rollback_run(run2.id).await.unwrap();
    assert_eq!(summary.versions_deleted, 1);
    assert_eq!(summary.evidence_deleted, 1);
    assert_eq!(summary.articles_reverted, 1);
    assert_eq!(summary.articles_deleted, 0);

    let article = store
        .article_by_id(first.article.id)
        .await
        .unwrap()
        .expect("article survives");
    assert_eq!(article.version, 1);
    assert_eq!(article.title.as_deref(), Some("Original"));
    assert_eq!(article.evidence.len(), 1);
    assert_eq!(article.evidence[0].run_id, run1.id);

    let run = store.get_run(run2.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::RolledBack);
}

#[tokio::test]
async fn test_rollback_deletes_articles_the_run_created() {
    let store = store().await;
    let run = store.begin_run("rss:techblog").await.unwrap();
    let url = "https://example.com/post/1";
    let created = store
        .upsert_article(&draft(url, "Only"), &evidence(url, "Only"), run.id)
        .await
        .unwrap();

    let coordinator = RollbackCoordinator::new(store.clone());
    let summary = coordinator.rollback_run(run.id).await.unwrap();
    assert_eq!(summary.articles_deleted, 1);
    assert!(store.article_by_id(created.article.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_rollback_replay_is_a_no_op() {
    let store = store().await;
    let run = store.begin_run("rss:techblog").await.unwrap();
    store
        .upsert_article(&draft("https://example.com/post/1", "Only"), &[], run.id)
        .await
        .unwrap();

    let coordinator = RollbackCoordinator::new(store.clone());
    coordinator.rollback_run(run.id).await.unwrap();
    let replay = coordinator.rollback_run(run.id).await.unwrap();
    assert_eq!(replay.versions_deleted, 0);
    assert_eq!(replay.evidence_deleted, 0);
    assert_eq!(replay.articles_reverted, 0);
    assert_eq!(replay.articles_deleted, 0);
}

#[tokio::test]
async fn test_rollback_unknown_ids_are_no_ops() {
    let store = store().await;
    let coordinator = RollbackCoordinator::new(store);

    let run_summary = coordinator.rollback_run(Uuid::new_v4()).await.unwrap();
    assert_eq!(run_summary.versions_deleted, 0);
    assert!(run_summary.steps.is_empty());

    let merge_summary = coordinator
        .rollback_merge("no-such-candidate", None, None)
        .await
        .unwrap();
    assert!(!merge_summary.reverted);
}

#[tokio::test]
async fn test_fetch_outcomes_follow_their_run() {
    let store = store().await;
    let run = store.begin_run("rss:techblog").await.unwrap();

    let outcome = bylines_common::FetchOutcome {
        id: Uuid::new_v4(),
        url: "https://example.com/post/1".to_string(),
        status_code: Some(200),
        latency_ms: Some(42),
        bytes_received: Some(1024),
        error_kind: None,
        created_at: Utc::now(),
        run_id: run.id,
    };
    store.record_fetch_outcome(&outcome).await.unwrap();
    assert_eq!(store.fetch_outcomes_for_run(run.id).await.unwrap().len(), 1);

    let coordinator = RollbackCoordinator::new(store.clone());
    let summary = coordinator.rollback_run(run.id).await.unwrap();
    assert_eq!(summary.fetch_outcomes_deleted, 1);
    assert!(store.fetch_outcomes_for_run(run.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_merge_apply_moves_accounts_and_is_idempotent() {
    let store = store().await;
    let run = store.begin_run("resolve").await.unwrap();

    let from = Uuid::new_v4();
    let to = Uuid::new_v4();
    store.ensure_author(from, "Jane Do").await.unwrap();
    store.ensure_author(to, "Jane Doe").await.unwrap();
    let account = store
        .upsert_account("rss:techblog", "@janedo", Some(from))
        .await
        .unwrap();

    let request = MergeRequest {
        decision_id: "candidate-1".to_string(),
        from_author_id: from,
        from_name: "Jane Do".to_string(),
        to_author_id: to,
        to_name: "Jane Doe".to_string(),
        evidence_ids: vec![],
        decision_criteria: Some("name_similarity+shared_domain".to_string()),
        created_by: Some("reviewer@example.com".to_string()),
    };
    let applied = store.apply_merge(&request, run.id).await.unwrap();
    assert!(applied.inserted);
    assert_eq!(applied.reassigned_account_ids, vec![account.id]);

    let moved = store.accounts_for_author(to).await.unwrap();
    assert_eq!(moved.len(), 1);

    let replay = store.apply_merge(&request, run.id).await.unwrap();
    assert!(!replay.inserted);
    assert!(replay.reassigned_account_ids.is_empty());
}

#[tokio::test]
async fn test_merge_rollback_restores_accounts_and_tombstones() {
    let store = store().await;
    let run = store.begin_run("resolve").await.unwrap();

    let from = Uuid::new_v4();
    let to = Uuid::new_v4();
    store.ensure_author(from, "Jane Do").await.unwrap();
    store.ensure_author(to, "Jane Doe").await.unwrap();
    let account = store
        .upsert_account("rss:blog", "@jane", Some(from))
        .await
        .unwrap();

    let request = MergeRequest {
        decision_id: "candidate-2".to_string(),
        from_author_id: from,
        from_name: "Jane Do".to_string(),
        to_author_id: to,
        to_name: "Jane Doe".to_string(),
        evidence_ids: vec![],
        decision_criteria: None,
        created_by: None,
    };
    store.apply_merge(&request, run.id).await.unwrap();

    let coordinator = RollbackCoordinator::new(store.clone());
    let rollback = coordinator
        .rollback_merge("candidate-2", Some("reviewer@example.com"), Some("mistake"))
        .await
        .unwrap();
    assert!(rollback.reverted);
    assert_eq!(rollback.accounts_restored, 1);

    let restored = store.accounts_for_author(from).await.unwrap();
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].id, account.id);

    let decision = store
        .get_merge_decision("candidate-2")
        .await
        .unwrap()
        .unwrap();
    assert!(decision.reverted_at.is_some());
    assert_eq!(decision.reverted_reason.as_deref(), Some("mistake"));

    // Second reversal finds the tombstone and does nothing.
    let replay = coordinator
        .rollback_merge("candidate-2", None, None)
        .await
        .unwrap();
    assert!(!replay.reverted);
    assert_eq!(replay.accounts_restored, 0);
}

#[tokio::test]
async fn test_author_profiles_group_by_source_and_name() {
    let store = store().await;
    let run = store.begin_run("rss:techblog").await.unwrap();

    for (url, hint) in [
        ("https://example.com/post/1", "Jane Doe"),
        ("https://example.com/post/2", "jane  doe"),
        ("https://example.com/post/3", "Sam Roe"),
    ] {
        let mut d = draft(url, url);
        d.author_hint = Some(hint.to_string());
        store.upsert_article(&d, &[], run.id).await.unwrap();
    }

    let profiles = store.author_profiles().await.unwrap();
    assert_eq!(profiles.len(), 2);
    let jane = profiles
        .iter()
        .find(|p| p.canonical_name.to_lowercase().contains("jane"))
        .unwrap();
    assert_eq!(jane.article_count, 2);
    assert_eq!(jane.domains, vec!["example.com".to_string()]);

    // Derivation is repeatable with stable ids.
    let again = store.author_profiles().await.unwrap();
    assert_eq!(again.len(), 2);
    assert!(again.iter().any(|p| p.id == jane.id));
}

#[tokio::test]
async fn test_author_profiles_split_across_domains() {
    let store = store().await;
    let run = store.begin_run("rss:network").await.unwrap();

    // Same byline on two domains under one source stays two profiles.
    for url in [
        "https://alpha.example/post/1",
        "https://beta.example/post/1",
    ] {
        let mut d = draft(url, url);
        d.author_hint = Some("Jane Doe".to_string());
        store.upsert_article(&d, &[], run.id).await.unwrap();
    }

    let profiles = store.author_profiles().await.unwrap();
    assert_eq!(profiles.len(), 2);
    assert_ne!(profiles[0].id, profiles[1].id);

    let domains: Vec<_> = profiles
        .iter()
        .map(|p| p.domains.clone())
        .collect();
    assert!(domains.contains(&vec!["alpha.example".to_string()]));
    assert!(domains.contains(&vec!["beta.example".to_string()]));

    // Ids stay put on re-derivation.
    let again = store.author_profiles().await.unwrap();
    for p in &profiles {
        assert!(again.iter().any(|q| q.id == p.id));
    }
}
