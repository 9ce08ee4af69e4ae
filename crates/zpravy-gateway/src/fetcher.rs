//! JSON feed fetcher: one GET per attempt against the source's `feed_url`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::debug;
use zpravy_core::SourceRegistry;
use zpravy_executor::{FetchError, FetchRequest, Fetcher, RawRecord};

const USER_AGENT: &str = concat!("zpravy-gateway/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A feed body: either a bare array of records or an object wrapping one.
#[derive(Deserialize)]
#[serde(untagged)]
enum Feed {
    Records(Vec<RawRecord>),
    Wrapped {
        #[serde(alias = "articles")]
        items: Vec<RawRecord>,
    },
}

pub struct JsonFeedFetcher {
    client: reqwest::Client,
    sources: SourceRegistry,
}

impl JsonFeedFetcher {
    pub fn new(sources: SourceRegistry) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { client, sources })
    }

    fn feed_url(&self, source: &str) -> Result<&str, FetchError> {
        self.sources
            .get(source)
            .map(|s| s.feed_url.trim())
            .filter(|url| !url.is_empty())
            .ok_or_else(|| FetchError::parse(format!("no feed_url configured for {source}")))
    }
}

#[async_trait]
impl Fetcher for JsonFeedFetcher {
    async fn fetch(&self, req: FetchRequest) -> Result<Vec<RawRecord>, FetchError> {
        let url = self.feed_url(&req.source)?;
        let remaining = req.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(FetchError::network("deadline already passed"));
        }

        let request = self.client.get(url).timeout(remaining).send();
        let response = tokio::select! {
            _ = req.cancel.cancelled() => return Err(FetchError::network("cancelled")),
            r = request => r.map_err(transport_error)?,
        };

        if let Some(e) = classify_status(response.status()) {
            return Err(e);
        }

        let body = tokio::select! {
            _ = req.cancel.cancelled() => return Err(FetchError::network("cancelled")),
            b = response.bytes() => b.map_err(transport_error)?,
        };
        debug!(source = %req.source, bytes = body.len(), "feed downloaded");

        decode_feed(&req.source, &body, req.max_articles)
    }
}

fn transport_error(e: reqwest::Error) -> FetchError {
    FetchError::network(e.to_string())
}

/// Map a non-success status to the failure kind it represents.
fn classify_status(status: StatusCode) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }
    let message = format!("feed returned {status}");
    Some(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
            FetchError::blocked(message)
        }
        StatusCode::REQUEST_TIMEOUT => FetchError::network(message),
        s if s.is_server_error() => FetchError::network(message),
        _ => FetchError::parse(message),
    })
}

/// Decode a feed body, keep the first `max_articles` records and stamp
/// each with `source` when the feed leaves it blank.
fn decode_feed(source: &str, body: &[u8], max_articles: usize) -> Result<Vec<RawRecord>, FetchError> {
    let feed: Feed = serde_json::from_slice(body)
        .map_err(|e| FetchError::parse(format!("undecodable feed: {e}")))?;
    let mut records = match feed {
        Feed::Records(records) | Feed::Wrapped { items: records } => records,
    };
    records.truncate(max_articles);
    for record in &mut records {
        if record.source.is_empty() {
            record.source = source.to_string();
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode as AxumStatus, routing::get, Router};
    use tokio_util::sync::CancellationToken;
    use zpravy_core::config::SourceConfig;
    use zpravy_executor::FetchErrorKind;

    fn request(source: &str) -> FetchRequest {
        FetchRequest {
            source: source.to_string(),
            deadline: Instant::now() + Duration::from_secs(5),
            max_articles: 2,
            cancel: CancellationToken::new(),
        }
    }

    fn fetcher_for(feed_url: String) -> JsonFeedFetcher {
        JsonFeedFetcher::new(SourceRegistry::new([SourceConfig {
            name: "novinky".into(),
            feed_url,
        }]))
        .unwrap()
    }

    /// Serve `router` on an ephemeral port and return its base URL.
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn statuses_are_classified() {
        let kind = |s: StatusCode| classify_status(s).map(|e| e.kind);
        assert_eq!(kind(StatusCode::OK), None);
        assert_eq!(kind(StatusCode::FORBIDDEN), Some(FetchErrorKind::Blocked));
        assert_eq!(kind(StatusCode::UNAUTHORIZED), Some(FetchErrorKind::Blocked));
        assert_eq!(kind(StatusCode::TOO_MANY_REQUESTS), Some(FetchErrorKind::Blocked));
        assert_eq!(kind(StatusCode::BAD_GATEWAY), Some(FetchErrorKind::Network));
        assert_eq!(kind(StatusCode::REQUEST_TIMEOUT), Some(FetchErrorKind::Network));
        assert_eq!(kind(StatusCode::NOT_FOUND), Some(FetchErrorKind::Parse));
    }

    #[test]
    fn decodes_array_and_wrapped_feeds() {
        let array = br#"[
            {"url": "https://www.novinky.cz/a", "title": "A"},
            {"canonical_url": "https://www.novinky.cz/b", "title": "B", "source": "jiny"},
            {"url": "https://www.novinky.cz/c", "title": "C"}
        ]"#;
        let records = decode_feed("novinky", array, 2).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].source, "novinky");
        assert_eq!(records[1].source, "jiny");

        let wrapped = br#"{"articles": [{"url": "https://www.novinky.cz/a", "title": "A"}]}"#;
        assert_eq!(decode_feed("novinky", wrapped, 50).unwrap().len(), 1);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = decode_feed("novinky", b"<html>Not JSON</html>", 50).unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Parse);
    }

    #[tokio::test]
    async fn unknown_source_is_not_retried() {
        let fetcher = fetcher_for("http://127.0.0.1:9/feed.json".into());
        let err = fetcher.fetch(request("bbc")).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Parse);
    }

    #[tokio::test]
    async fn fetches_a_live_feed() {
        let base = serve(Router::new().route(
            "/feed.json",
            get(|| async {
                r#"[{"url":"https://www.novinky.cz/a","title":"A"},
                    {"url":"https://www.novinky.cz/b","title":"B"},
                    {"url":"https://www.novinky.cz/c","title":"C"}]"#
            }),
        ))
        .await;

        let fetcher = fetcher_for(format!("{base}/feed.json"));
        let records = fetcher.fetch(request("novinky")).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.source == "novinky"));
    }

    #[tokio::test]
    async fn forbidden_feed_is_blocked() {
        let base = serve(Router::new().route(
            "/feed.json",
            get(|| async { AxumStatus::FORBIDDEN }),
        ))
        .await;

        let fetcher = fetcher_for(format!("{base}/feed.json"));
        let err = fetcher.fetch(request("novinky")).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Blocked);
    }

    #[tokio::test]
    async fn refused_connection_is_a_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let fetcher = fetcher_for(format!("http://{addr}/feed.json"));
        let err = fetcher.fetch(request("novinky")).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Network);
    }

    #[tokio::test]
    async fn cancellation_stops_waiting() {
        let base = serve(Router::new().route(
            "/feed.json",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "[]"
            }),
        ))
        .await;

        let fetcher = fetcher_for(format!("{base}/feed.json"));
        let req = request("novinky");
        let cancel = req.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let started = std::time::Instant::now();
        let err = fetcher.fetch(req).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Network);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
