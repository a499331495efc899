//! Export determinism against an in-memory store.

use bylines_collector::export::export_jsonl;
use bylines_common::ArticleDraft;
use bylines_store::Store;

fn draft(url: &str, title: &str) -> ArticleDraft {
    ArticleDraft {
        canonical_url: url.to_string(),
        source_id: "rss:techblog".to_string(),
        title: Some(title.to_string()),
        author_hint: Some("Jane Doe".to_string()),
        published_at: None,
        snippet: None,
    }
}

#[tokio::test]
async fn test_repeated_exports_are_byte_identical_and_url_ordered() {
    let store = Store::in_memory().await.expect("in-memory store");
    let run = store.begin_run("rss:techblog").await.unwrap();

    // Insert out of URL order.
    for (url, title) in [
        ("https://example.com/post/zebra", "Zebra"),
        ("https://example.com/post/apple", "Apple"),
        ("https://example.com/post/mango", "Mango"),
    ] {
        store
            .upsert_article(&draft(url, title), &[], run.id)
            .await
            .unwrap();
    }

    let mut first: Vec<u8> = Vec::new();
    let written = export_jsonl(&store, "rss:techblog", &mut first)
        .await
        .unwrap();
    assert_eq!(written, 3);

    let mut second: Vec<u8> = Vec::new();
    export_jsonl(&store, "rss:techblog", &mut second)
        .await
        .unwrap();
    assert_eq!(first, second);

    let urls: Vec<String> = String::from_utf8(first)
        .unwrap()
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            value["canonical_url"].as_str().unwrap().to_string()
        })
        .collect();
    let mut sorted = urls.clone();
    sorted.sort();
    assert_eq!(urls, sorted);
    assert!(urls[0].ends_with("/apple"));
}
