//! Social media timeline retrieval.
//!
//! A timeline is a list of posts of a single account, newest first. It is
//! consumed exactly like an RSS feed: early-exit scan against a watermark,
//! then one message per post.

use crate::feed::detect::is_newer;
use crate::feed::fetcher::{get_limited, FetchError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

const MAX_TIMELINE_SIZE: usize = 2 * 1024 * 1024; // 2MB

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
    Album,
}

/// One post of a media timeline.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MediaItem {
    /// Short code used in the public post URL.
    pub code: String,
    pub taken_at: DateTime<Utc>,
    #[serde(default)]
    pub caption: String,
    pub kind: MediaKind,
    /// Seconds; zero for photos and albums.
    #[serde(default)]
    pub video_duration: f64,
    pub username: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

#[async_trait]
pub trait TimelineFetcher: Send + Sync {
    async fn fetch_timeline(&self, account_id: &str, count: usize)
        -> Result<Vec<MediaItem>, FetchError>;

    /// Fetches one post by its short code.
    async fn fetch_post(&self, code: &str) -> Result<MediaItem, FetchError>;
}

/// Extracts the short code from a post link such as
/// `https://www.instagram.com/p/Cx1abc/`.
///
/// Everything after the last `p/` is taken, minus slashes and any query or
/// fragment. Returns `None` when that leaves nothing usable.
pub fn post_code(link: &str) -> Option<String> {
    let tail = link.trim().rsplit("p/").next()?;
    let tail = tail.split(['?', '#']).next()?;
    let code: String = tail.chars().filter(|&c| c != '/').collect();
    let valid = !code.is_empty()
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    valid.then_some(code)
}

/// Reads timelines from a JSON endpoint serving
/// `GET {endpoint}/users/{account_id}/media?count={count}` and single posts
/// from `GET {endpoint}/posts/{code}`.
#[derive(Clone)]
pub struct HttpTimelineFetcher {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTimelineFetcher {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl TimelineFetcher for HttpTimelineFetcher {
    async fn fetch_timeline(
        &self,
        account_id: &str,
        count: usize,
    ) -> Result<Vec<MediaItem>, FetchError> {
        let url = format!(
            "{}/users/{}/media?count={}",
            self.endpoint, account_id, count
        );
        let bytes = get_limited(&self.client, &url, MAX_TIMELINE_SIZE).await?;
        let items: Vec<MediaItem> =
            serde_json::from_slice(&bytes).map_err(|e| FetchError::Parse(e.to_string()))?;
        tracing::debug!(account = %account_id, items = items.len(), "Fetched timeline");
        Ok(items)
    }

    async fn fetch_post(&self, code: &str) -> Result<MediaItem, FetchError> {
        let url = format!("{}/posts/{}", self.endpoint, code);
        let bytes = get_limited(&self.client, &url, MAX_TIMELINE_SIZE).await?;
        serde_json::from_slice(&bytes).map_err(|e| FetchError::Parse(e.to_string()))
    }
}

/// Returns the posts newer than `watermark`, stopping at the first older one.
///
/// Videos longer than `max_video_secs` are skipped without ending the scan.
pub fn filter_new_media(items: Vec<MediaItem>, watermark: i64, max_video_secs: f64) -> Vec<MediaItem> {
    items
        .into_iter()
        .take_while(|m| is_newer(Some(m.taken_at.timestamp()), watermark))
        .filter(|m| m.video_duration <= max_video_secs)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn post(code: &str, ts: i64, video_duration: f64) -> MediaItem {
        MediaItem {
            code: code.to_string(),
            taken_at: Utc.timestamp_opt(ts, 0).unwrap(),
            caption: String::new(),
            kind: if video_duration > 0.0 {
                MediaKind::Video
            } else {
                MediaKind::Photo
            },
            video_duration,
            username: "noereh".to_string(),
            full_name: "Noereh".to_string(),
            thumbnail_url: None,
        }
    }

    #[test]
    fn test_long_videos_skipped_without_stopping() {
        let items = vec![post("a", 300, 0.0), post("b", 250, 600.0), post("c", 200, 30.0)];
        let codes: Vec<_> = filter_new_media(items, 100, 120.0)
            .into_iter()
            .map(|m| m.code)
            .collect();
        assert_eq!(codes, vec!["a", "c"]);
    }

    #[test]
    fn test_stops_at_watermark() {
        let items = vec![post("a", 300, 0.0), post("b", 100, 0.0), post("c", 400, 0.0)];
        let found = filter_new_media(items, 100, 120.0);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].code, "a");
    }

    #[tokio::test]
    async fn test_http_timeline_fetch() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/42/media"))
            .and(query_param("count", "11"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[{"code":"Cx1","taken_at":"2023-11-14T22:13:20Z","caption":"Hei",
                     "kind":"photo","username":"noereh","full_name":"Noereh",
                     "thumbnail_url":"https://cdn.example.com/1.jpg"}]"#,
            ))
            .mount(&mock_server)
            .await;

        let fetcher = HttpTimelineFetcher::new(reqwest::Client::new(), mock_server.uri());
        let items = fetcher.fetch_timeline("42", 11).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].code, "Cx1");
        assert_eq!(items[0].taken_at.timestamp(), 1_700_000_000);
        assert_eq!(items[0].kind, MediaKind::Photo);
    }

    #[test]
    fn test_post_code_from_links() {
        assert_eq!(
            post_code("https://www.instagram.com/p/Cx1abc/").as_deref(),
            Some("Cx1abc")
        );
        assert_eq!(
            post_code("https://www.instagram.com/p/Cx1abc/?igsh=xyz").as_deref(),
            Some("Cx1abc")
        );
        assert_eq!(post_code("instagram.com/p/A-b_9").as_deref(), Some("A-b_9"));
        assert_eq!(post_code("https://www.instagram.com/p/"), None);
        assert_eq!(post_code("https://example.com/p/../users"), None);
    }

    #[tokio::test]
    async fn test_http_fetch_single_post() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/posts/Cx1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"code":"Cx1","taken_at":"2023-11-14T22:13:20Z","kind":"video",
                    "video_duration":45.0,"username":"noereh"}"#,
            ))
            .expect(1)
            .mount(&mock_server)
            .await;

        let fetcher = HttpTimelineFetcher::new(reqwest::Client::new(), mock_server.uri());
        let item = fetcher.fetch_post("Cx1").await.unwrap();
        assert_eq!(item.code, "Cx1");
        assert_eq!(item.kind, MediaKind::Video);
        assert_eq!(item.video_duration, 45.0);
        assert!(item.caption.is_empty());
    }

    #[tokio::test]
    async fn test_http_timeline_bad_json() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"oops\": true}"))
            .mount(&mock_server)
            .await;

        let fetcher = HttpTimelineFetcher::new(reqwest::Client::new(), mock_server.uri());
        let result = fetcher.fetch_timeline("42", 11).await;
        assert!(matches!(result, Err(FetchError::Parse(_))));
    }
}
