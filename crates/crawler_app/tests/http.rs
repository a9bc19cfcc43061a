use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use crawler_app::{router, AppState};
use crawler_core::{CancellationToken, SlidingWindowLimiter, TtlLruCache};
use crawler_engine::{
    build_pipeline, CrawlService, FailureKind, FetchError, FetchMetadata, FetchOutput, Fetcher,
    Html2MdConverter, RetryPolicy, ServiceSettings,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;

const PAGE: &str =
    "<html><head><title>T</title></head><body><article><p>Hi</p></article></body></html>";

struct StubFetcher {
    status: Option<u16>,
    calls: AtomicUsize,
}

impl StubFetcher {
    fn serving_page() -> Self {
        Self {
            status: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing_with(status: u16) -> Self {
        Self {
            status: Some(status),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(
        &self,
        url: &str,
        _cancel: &CancellationToken,
    ) -> Result<FetchOutput, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.status {
            return Err(FetchError::new(
                FailureKind::HttpStatus {
                    status,
                    status_text: "Not Found".into(),
                },
                url,
                "stubbed status",
            ));
        }
        Ok(FetchOutput {
            bytes: PAGE.as_bytes().to_vec(),
            metadata: FetchMetadata {
                original_url: url.to_string(),
                final_url: url.to_string(),
                redirect_count: 0,
                content_type: Some("text/html".to_string()),
                byte_len: PAGE.len() as u64,
            },
        })
    }
}

/// Router behind a trusted proxy, so `crawl_request` picks the client.
fn app_with(fetcher: Arc<StubFetcher>, settings: ServiceSettings) -> Router {
    router(state_with(fetcher, settings).trust_proxy_headers(true))
}

fn state_with(fetcher: Arc<StubFetcher>, settings: ServiceSettings) -> AppState {
    let pipeline = build_pipeline(fetcher, RetryPolicy::none(), Arc::new(Html2MdConverter));
    let service = CrawlService::new(
        pipeline,
        Arc::new(TtlLruCache::new(100, Duration::from_millis(300_000))),
        Arc::new(SlidingWindowLimiter::new()),
        settings,
    );
    AppState::new(Arc::new(service))
}

fn crawl_request(body: &str, client: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/crawl")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", client)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Option<String>, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .map(|value| value.to_str().unwrap().to_string());
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, retry_after, body)
}

#[tokio::test]
async fn liveness_probe_answers() {
    let app = app_with(Arc::new(StubFetcher::serving_page()), ServiceSettings::default());
    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn crawl_returns_markdown_envelope_and_caches() {
    let fetcher = Arc::new(StubFetcher::serving_page());
    let app = app_with(fetcher.clone(), ServiceSettings::default());
    let body = r#"{"url":"https://example.com"}"#;

    let (status, _, first) = send(&app, crawl_request(body, "10.0.0.1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        first,
        json!({
            "success": true,
            "data": { "markdown": "Hi", "title": "T", "metadata": { "title": "T" } },
        })
    );

    let (status, _, second) = send(&app, crawl_request(body, "10.0.0.1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second, first);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn eleventh_request_gets_429_with_retry_after() {
    let app = app_with(Arc::new(StubFetcher::serving_page()), ServiceSettings::default());
    let body = r#"{"url":"https://example.com"}"#;

    for _ in 0..10 {
        let (status, _, _) = send(&app, crawl_request(body, "10.0.0.9")).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, retry_after, envelope) = send(&app, crawl_request(body, "10.0.0.9")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(retry_after.as_deref(), Some("60"));
    assert_eq!(envelope["success"], json!(false));
    assert_eq!(envelope["error"]["code"], json!("rate_limited"));

    let (status, _, _) = send(&app, crawl_request(body, "10.0.0.10")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn invalid_input_is_rejected_before_the_limiter() {
    let settings = ServiceSettings {
        rate_limit_max_requests: 1,
        ..ServiceSettings::default()
    };
    let app = app_with(Arc::new(StubFetcher::serving_page()), settings);

    let cases = [
        (r#"{"url": "#, ""),
        (r#"{"link":"https://example.com"}"#, "url"),
        (r#"{"url": 7}"#, "url"),
        (r#"{"url":"not a url"}"#, "url"),
        (r#"{"url":"mailto:someone@example.com"}"#, "url"),
    ];
    for (body, path) in cases {
        let (status, _, failure) = send(&app, crawl_request(body, "10.0.0.3")).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");
        assert_eq!(failure["error"], json!("Invalid request"));
        assert_eq!(failure["issues"][0]["path"], json!(path), "{body}");
    }

    let (status, _, _) = send(
        &app,
        crawl_request(r#"{"url":"https://example.com"}"#, "10.0.0.3"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn fetch_failures_map_to_bad_gateway() {
    let app = app_with(Arc::new(StubFetcher::failing_with(404)), ServiceSettings::default());

    let (status, _, envelope) = send(
        &app,
        crawl_request(r#"{"url":"https://example.com/missing"}"#, "10.0.0.4"),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(envelope["success"], json!(false));
    assert_eq!(envelope["error"]["code"], json!("fetch_failed"));
    assert_eq!(envelope["error"]["details"]["status"], json!(404));
    assert!(envelope.get("data").is_none());
}

#[tokio::test]
async fn rotating_forwarded_for_does_not_escape_the_peer_limit() {
    let fetcher = Arc::new(StubFetcher::serving_page());
    let app = router(state_with(fetcher, ServiceSettings::default()));
    let peer: SocketAddr = "198.51.100.20:50123".parse().unwrap();
    let body = r#"{"url":"https://example.com"}"#;

    let mut statuses = Vec::new();
    for i in 0..11 {
        let mut request = crawl_request(body, &format!("1.2.3.{i}"));
        request.extensions_mut().insert(ConnectInfo(peer));
        let (status, _, _) = send(&app, request).await;
        statuses.push(status);
    }

    assert!(statuses[..10].iter().all(|status| *status == StatusCode::OK));
    assert_eq!(statuses[10], StatusCode::TOO_MANY_REQUESTS);
}
