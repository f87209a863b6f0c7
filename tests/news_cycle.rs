//! End-to-end polling cycles against mock feed and chat servers.
//!
//! Each test builds the same pieces the binary wires together: a feeds
//! document on disk, an HTTP feed fetcher, the chat REST client and a feed
//! group persisting its watermark into the document.

use newsrelay::chat::{ChatClient, DiscordClient};
use newsrelay::feed::{FeedFetcher, HttpFeedFetcher};
use newsrelay::scheduler::{FeedGroup, RssSource};
use newsrelay::storage::{FeedsDocument, JsonStateStore, StateStore};
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use std::path::Path;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CHANNEL: u64 = 5;

/// Three entries, newest first: 1_700_000_000, 1_699_996_400, 1_699_992_800.
/// The middle one is tagged for another language.
const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel>
    <title>Ođđasat</title>
    <item>
        <title>Ođđa skuvla</title>
        <link>https://news.example.com/1</link>
        <description>Skuvla rahpojuvvo.</description>
        <category>Ođđasat - Davvisámegillii</category>
        <pubDate>Tue, 14 Nov 2023 22:13:20 GMT</pubDate>
    </item>
    <item>
        <title>Julevsámegiella</title>
        <link>https://news.example.com/2</link>
        <category>Ođđasat - julevsámegiellaj</category>
        <pubDate>Tue, 14 Nov 2023 21:13:20 GMT</pubDate>
    </item>
    <item>
        <title>Untagged story</title>
        <link>https://news.example.com/3</link>
        <pubDate>Tue, 14 Nov 2023 20:13:20 GMT</pubDate>
    </item>
</channel></rss>"#;

async fn feed_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/oddasat.rss"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(FEED)
                .insert_header("Content-Type", "application/rss+xml"),
        )
        .mount(&server)
        .await;
    server
}

async fn chat_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/channels/{CHANNEL}/messages")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "id": "900", "channel_id": "5" })),
        )
        .mount(&server)
        .await;
    server
}

fn write_feeds_file(dir: &Path, feed_url: &str, last_time: i64) -> std::path::PathBuf {
    let doc = serde_json::json!({
        "last_time": last_time,
        "sme": {
            "name": "Ođđasat - Davvisámegillii",
            "rss": feed_url,
            "color": 16711680,
            "url": "https://news.example.com/",
            "icon_url": "https://news.example.com/icon.png",
            "rule": { "tags": ["Ođđasat - Davvisámegillii"], "accept_untagged": true }
        },
        "smj": {
            "name": "Ođđasat - julevsámegiellaj",
            "rss": feed_url,
            "color": 65280,
            "url": "https://news.example.com/",
            "icon_url": "https://news.example.com/icon.png",
            "rule": { "tags": ["Ođđasat - julevsámegiellaj"] }
        }
    });
    let path = dir.join("newsfeeds.json");
    std::fs::write(&path, serde_json::to_vec_pretty(&doc).unwrap()).unwrap();
    path
}

fn news_group(feeds_file: &Path, keys: &[&str]) -> FeedGroup {
    let doc = FeedsDocument::load(feeds_file).unwrap();
    let fetcher: Arc<dyn FeedFetcher> = Arc::new(HttpFeedFetcher::new(reqwest::Client::new()));
    let mut group = FeedGroup::new(
        "news",
        CHANNEL,
        Box::new(JsonStateStore::new(feeds_file, "last_time")),
    );
    for key in keys {
        group = group.with_source(RssSource::new(doc.category(key).unwrap(), fetcher.clone()));
    }
    group
}

fn chat_client(server: &MockServer) -> DiscordClient {
    DiscordClient::new(
        reqwest::Client::new(),
        SecretString::from("test-token"),
        server.uri(),
    )
}

async fn posted_titles(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|req| {
            let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
            body["embeds"][0]["title"].as_str().unwrap().to_string()
        })
        .collect()
}

#[tokio::test]
async fn test_cycle_posts_oldest_first_and_persists_watermark() {
    let feeds = feed_server().await;
    let chat = chat_server().await;
    let dir = tempfile::tempdir().unwrap();
    let feeds_file = write_feeds_file(
        dir.path(),
        &format!("{}/oddasat.rss", feeds.uri()),
        1_699_990_000,
    );

    let group = news_group(&feeds_file, &["sme", "smj"]);
    let client = chat_client(&chat);

    let sent = group.tick(&client, 1_800_000_000).await.unwrap();
    assert_eq!(sent, 3);
    assert_eq!(
        posted_titles(&chat).await,
        vec!["Untagged story", "Julevsámegiella", "Ođđa skuvla"]
    );

    let written = std::fs::read_to_string(&feeds_file).unwrap();
    assert!(written.contains("\t\"last_time\": 1700000000"));
    assert!(written.contains("Ođđasat - Davvisámegillii"));
    let doc = FeedsDocument::load(&feeds_file).unwrap();
    assert_eq!(doc.categories().unwrap().len(), 2);
}

#[tokio::test]
async fn test_second_cycle_is_idempotent() {
    let feeds = feed_server().await;
    let chat = chat_server().await;
    let dir = tempfile::tempdir().unwrap();
    let feeds_file = write_feeds_file(
        dir.path(),
        &format!("{}/oddasat.rss", feeds.uri()),
        1_699_990_000,
    );

    let group = news_group(&feeds_file, &["sme"]);
    let client = chat_client(&chat);

    assert_eq!(group.tick(&client, 1_800_000_000).await.unwrap(), 2);
    assert_eq!(group.tick(&client, 1_800_000_000).await.unwrap(), 0);
    assert_eq!(chat.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_cycle_stops_at_watermark() {
    let feeds = feed_server().await;
    let chat = chat_server().await;
    let dir = tempfile::tempdir().unwrap();
    // Between the second and third entry
    let feeds_file = write_feeds_file(
        dir.path(),
        &format!("{}/oddasat.rss", feeds.uri()),
        1_699_995_000,
    );

    let group = news_group(&feeds_file, &["sme", "smj"]);
    group.tick(&chat_client(&chat), 1_800_000_000).await.unwrap();

    assert_eq!(
        posted_titles(&chat).await,
        vec!["Julevsámegiella", "Ođđa skuvla"]
    );
}

#[tokio::test]
async fn test_unreachable_feed_leaves_watermark() {
    let feeds = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&feeds)
        .await;
    let chat = chat_server().await;
    let dir = tempfile::tempdir().unwrap();
    let feeds_file = write_feeds_file(
        dir.path(),
        &format!("{}/oddasat.rss", feeds.uri()),
        1_699_990_000,
    );

    let group = news_group(&feeds_file, &["sme"]);
    assert!(group.tick(&chat_client(&chat), 1_800_000_000).await.is_err());

    assert!(chat.received_requests().await.unwrap().is_empty());
    let store = JsonStateStore::new(&feeds_file, "last_time");
    assert_eq!(store.load().unwrap().last_seen, 1_699_990_000);
}

#[tokio::test]
async fn test_rejected_send_keeps_delivered_prefix() {
    let feeds = feed_server().await;
    let chat = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "id": "900", "channel_id": "5" })),
        )
        .up_to_n_times(1)
        .mount(&chat)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&chat)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let feeds_file = write_feeds_file(
        dir.path(),
        &format!("{}/oddasat.rss", feeds.uri()),
        1_699_990_000,
    );

    let group = news_group(&feeds_file, &["sme"]);
    assert!(group.tick(&chat_client(&chat), 1_800_000_000).await.is_err());

    // Only "Untagged story" (20:13:20) went out
    let store = JsonStateStore::new(&feeds_file, "last_time");
    assert_eq!(store.load().unwrap().last_seen, 1_699_992_800);
}

#[tokio::test]
async fn test_chat_client_trait_object_usable_by_groups() {
    let feeds = feed_server().await;
    let chat = chat_server().await;
    let dir = tempfile::tempdir().unwrap();
    let feeds_file = write_feeds_file(
        dir.path(),
        &format!("{}/oddasat.rss", feeds.uri()),
        -1,
    );

    let client: Arc<dyn ChatClient> = Arc::new(chat_client(&chat));
    let group = news_group(&feeds_file, &["sme"]);

    // First run: the unset watermark becomes "now" and the backlog is skipped
    assert_eq!(group.tick(client.as_ref(), 1_800_000_000).await.unwrap(), 0);
    let doc = FeedsDocument::load(&feeds_file).unwrap();
    assert_eq!(doc.watermark("last_time").unwrap(), Some(1_800_000_000));
}
