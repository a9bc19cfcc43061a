//! HTTP adapter: exposes the crawl service as `POST /crawl`.
pub mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use crawler_core::{SlidingWindowLimiter, TtlLruCache};
use crawler_engine::{
    build_pipeline, CrawlOutcome, CrawlService, Html2MdConverter, ReqwestFetcher, RetryPolicy,
    RATE_LIMITED_CODE,
};
use crawler_logging::{crawler_debug, crawler_info};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use url::Url;

pub use config::{AppConfig, ConfigError};

const MAX_BODY_BYTES: usize = 64 * 1024;
const ANONYMOUS: &str = "anonymous";

#[derive(Clone)]
pub struct AppState {
    service: Arc<CrawlService>,
    trust_proxy_headers: bool,
}

impl AppState {
    /// State that keys the rate limiter on the peer address only.
    pub fn new(service: Arc<CrawlService>) -> Self {
        Self {
            service,
            trust_proxy_headers: false,
        }
    }

    pub fn trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    /// Wires the production fetcher, cache and limiter from `config`.
    pub fn from_config(config: &AppConfig) -> Self {
        let fetcher = Arc::new(ReqwestFetcher::new(config.fetch_settings()));
        let pipeline = build_pipeline(fetcher, RetryPolicy::default(), Arc::new(Html2MdConverter));
        let cache = Arc::new(TtlLruCache::new(config.cache_max_size, config.cache_ttl));
        let limiter = Arc::new(SlidingWindowLimiter::new());
        Self::new(Arc::new(CrawlService::new(
            pipeline,
            cache,
            limiter,
            config.service_settings(),
        )))
        .trust_proxy_headers(config.trust_proxy_headers)
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(liveness))
        .route("/crawl", post(crawl))
        .with_state(state)
        .layer(cors)
}

async fn liveness() -> &'static str {
    "crawler is running"
}

async fn crawl(State(state): State<AppState>, request: Request) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identifier = client_identifier(request.headers(), peer, state.trust_proxy_headers);

    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(err) => {
            return validation_failure(vec![Issue::new("", format!("Unreadable body: {err}"))])
        }
    };
    let url = match validate_body(&body) {
        Ok(url) => url,
        Err(issues) => return validation_failure(issues),
    };

    crawler_info!("crawl request from {} for {}", identifier, url);
    let outcome = state.service.crawl(&identifier, url.as_str()).await;
    outcome_response(&outcome)
}

/// One input validation problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Dotted path to the offending field; empty for the body itself.
    pub path: String,
    pub message: String,
}

impl Issue {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub error: String,
    pub issues: Vec<Issue>,
}

fn validate_body(body: &Bytes) -> Result<Url, Vec<Issue>> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|err| vec![Issue::new("", format!("Malformed JSON: {err}"))])?;
    let raw = match value.get("url") {
        Some(Value::String(raw)) => raw,
        Some(_) => return Err(vec![Issue::new("url", "Expected string")]),
        None => return Err(vec![Issue::new("url", "Required")]),
    };
    let url = Url::parse(raw).map_err(|_| vec![Issue::new("url", "Invalid url")])?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(vec![Issue::new("url", "URL must use http or https")]);
    }
    Ok(url)
}

fn validation_failure(issues: Vec<Issue>) -> Response {
    crawler_debug!("rejected crawl request: {:?}", issues);
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(ValidationFailure {
            error: "Invalid request".to_string(),
            issues,
        }),
    )
        .into_response()
}

fn outcome_response(outcome: &CrawlOutcome) -> Response {
    let envelope = outcome.envelope();
    let status = envelope
        .error
        .as_ref()
        .map_or(StatusCode::OK, |error| status_for(&error.code));

    match outcome {
        CrawlOutcome::RateLimited { retry_after_secs } => (
            status,
            [(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs))],
            Json(envelope),
        )
            .into_response(),
        _ => (status, Json(envelope)).into_response(),
    }
}

/// HTTP status for an error code.
pub fn status_for(code: &str) -> StatusCode {
    match code {
        "fetch_failed" => StatusCode::BAD_GATEWAY,
        "timeout" => StatusCode::GATEWAY_TIMEOUT,
        "parse_failed" | "invalid_html" => StatusCode::UNPROCESSABLE_ENTITY,
        "network_error" => StatusCode::SERVICE_UNAVAILABLE,
        RATE_LIMITED_CODE => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Rate-limit key for a request: the peer address, or `anonymous`.
///
/// With `trust_proxy_headers` the first `X-Forwarded-For` entry, then
/// `X-Real-IP`, take precedence over the peer.
pub fn client_identifier(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_proxy_headers: bool,
) -> String {
    let header_value = |name: &str| {
        if !trust_proxy_headers {
            return None;
        }
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    header_value("x-forwarded-for")
        .or_else(|| header_value("x-real-ip"))
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| ANONYMOUS.to_string())
}
