use std::fmt;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use crawler_core::{CancellationToken, CrawlError, Fetched, Initial, Stage};
use crawler_logging::{crawler_debug, crawler_warn};
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;

use crate::decode::decode_html;
use crate::dom::collapse_whitespace;

pub const FETCH_STAGE: &str = "fetch";

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    /// Bound on a single attempt, including reading the body.
    pub request_timeout: Duration,
    pub redirect_limit: usize,
    pub max_bytes: u64,
    pub allowed_content_types: Vec<String>,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(15),
            redirect_limit: 5,
            max_bytes: 5 * 1024 * 1024,
            allowed_content_types: vec![
                "text/html".to_string(),
                "application/xhtml+xml".to_string(),
            ],
            user_agent: concat!("crawler/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutput {
    pub bytes: Vec<u8>,
    pub metadata: FetchMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchMetadata {
    pub original_url: String,
    pub final_url: String,
    pub redirect_count: usize,
    pub content_type: Option<String>,
    pub byte_len: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus { status: u16, status_text: String },
    Timeout { after: Duration },
    RedirectLimitExceeded,
    TooLarge { max_bytes: u64, actual: Option<u64> },
    UnsupportedContentType { content_type: String },
    Cancelled,
    Network,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus { status, status_text } => {
                write!(f, "http status {status} {status_text}")
            }
            FailureKind::Timeout { after } => write!(f, "timeout after {}ms", after.as_millis()),
            FailureKind::RedirectLimitExceeded => write!(f, "redirect limit exceeded"),
            FailureKind::TooLarge { max_bytes, actual } => {
                write!(f, "response too large (max {max_bytes}, actual {actual:?})")
            }
            FailureKind::UnsupportedContentType { content_type } => {
                write!(f, "unsupported content type {content_type}")
            }
            FailureKind::Cancelled => write!(f, "cancelled"),
            FailureKind::Network => write!(f, "network error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} fetching {url}: {message}")]
pub struct FetchError {
    pub kind: FailureKind,
    pub url: String,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FailureKind, url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            message: message.into(),
        }
    }

    /// Failures worth another attempt: timeouts and connection-level errors.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, FailureKind::Timeout { .. } | FailureKind::Network)
    }
}

impl From<FetchError> for CrawlError {
    fn from(err: FetchError) -> Self {
        match err.kind {
            FailureKind::HttpStatus {
                status,
                status_text,
            } => CrawlError::FetchFailed {
                status,
                status_text,
                url: err.url,
            },
            FailureKind::Timeout { after } => CrawlError::timeout(
                u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
                FETCH_STAGE,
            ),
            FailureKind::TooLarge { .. } | FailureKind::UnsupportedContentType { .. } => {
                CrawlError::invalid_html(err.kind.to_string())
            }
            FailureKind::InvalidUrl
            | FailureKind::RedirectLimitExceeded
            | FailureKind::Cancelled
            | FailureKind::Network => {
                CrawlError::network(err.kind.to_string()).with_cause(err.message)
            }
        }
    }
}

/// Retrieves raw bytes for a URL. One call is one attempt; retrying is the
/// fetch stage's job.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, cancel: &CancellationToken)
        -> Result<FetchOutput, FetchError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    settings: FetchSettings,
}

impl ReqwestFetcher {
    pub fn new(settings: FetchSettings) -> Self {
        Self { settings }
    }

    fn build_client(
        &self,
        url: &str,
        redirect_counter: Arc<AtomicUsize>,
    ) -> Result<reqwest::Client, FetchError> {
        let redirect_limit = self.settings.redirect_limit;
        let policy = reqwest::redirect::Policy::custom(move |attempt| {
            let count = attempt.previous().len();
            redirect_counter.store(count, Ordering::Relaxed);
            if count >= redirect_limit {
                attempt.error("redirect limit exceeded")
            } else {
                attempt.follow()
            }
        });

        reqwest::Client::builder()
            .connect_timeout(self.settings.connect_timeout)
            .timeout(self.settings.request_timeout)
            .user_agent(self.settings.user_agent.clone())
            .redirect(policy)
            .build()
            .map_err(|err| FetchError::new(FailureKind::Network, url, err.to_string()))
    }

    fn is_content_type_allowed(&self, content_type: &str) -> bool {
        let ct = content_type.split(';').next().unwrap_or(content_type).trim();
        self.settings
            .allowed_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ct))
    }

    fn map_reqwest_error(&self, url: &str, err: reqwest::Error) -> FetchError {
        let kind = if err.is_timeout() {
            FailureKind::Timeout {
                after: self.settings.request_timeout,
            }
        } else if err.is_redirect() {
            FailureKind::RedirectLimitExceeded
        } else {
            FailureKind::Network
        };
        FetchError::new(kind, url, err.to_string())
    }

    async fn fetch_once(&self, url: &str) -> Result<FetchOutput, FetchError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|err| FetchError::new(FailureKind::InvalidUrl, url, err.to_string()))?;
        let redirect_counter = Arc::new(AtomicUsize::new(0));
        let client = self.build_client(url, redirect_counter.clone())?;

        let response = client
            .get(parsed)
            .send()
            .await
            .map_err(|err| self.map_reqwest_error(url, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::new(
                FailureKind::HttpStatus {
                    status: status.as_u16(),
                    status_text: status.canonical_reason().unwrap_or_default().to_string(),
                },
                url,
                status.to_string(),
            ));
        }

        if let Some(content_len) = response.content_length() {
            if content_len > self.settings.max_bytes {
                return Err(FetchError::new(
                    FailureKind::TooLarge {
                        max_bytes: self.settings.max_bytes,
                        actual: Some(content_len),
                    },
                    url,
                    "response too large",
                ));
            }
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        if let Some(ct) = content_type.as_deref() {
            if !self.is_content_type_allowed(ct) {
                return Err(FetchError::new(
                    FailureKind::UnsupportedContentType {
                        content_type: ct.to_string(),
                    },
                    url,
                    "unsupported content type",
                ));
            }
        }

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| self.map_reqwest_error(url, err))?;
            let next_len = bytes.len() as u64 + chunk.len() as u64;
            if next_len > self.settings.max_bytes {
                return Err(FetchError::new(
                    FailureKind::TooLarge {
                        max_bytes: self.settings.max_bytes,
                        actual: Some(next_len),
                    },
                    url,
                    "response too large",
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        let metadata = FetchMetadata {
            original_url: url.to_string(),
            final_url,
            redirect_count: redirect_counter.load(Ordering::Relaxed),
            content_type,
            byte_len: bytes.len() as u64,
        };

        Ok(FetchOutput { bytes, metadata })
    }
}

#[async_trait::async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchOutput, FetchError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Err(FetchError::new(FailureKind::Cancelled, url, "request cancelled"))
            }
            result = self.fetch_once(url) => result,
        }
    }
}

/// Exponential backoff between fetch attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (zero-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// `Initial -> Fetched`: downloads and decodes the page.
pub struct FetchStage {
    fetcher: Arc<dyn Fetcher>,
    retry: RetryPolicy,
}

impl FetchStage {
    pub fn new(fetcher: Arc<dyn Fetcher>, retry: RetryPolicy) -> Self {
        Self { fetcher, retry }
    }

    async fn fetch_with_retry(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchOutput, FetchError> {
        let mut retry = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::new(
                    FailureKind::Cancelled,
                    url,
                    "cancelled before attempt",
                ));
            }
            match self.fetcher.fetch(url, cancel).await {
                Ok(output) => return Ok(output),
                Err(err) if err.is_transient() && retry < self.retry.max_retries => {
                    let delay = self.retry.backoff(retry);
                    retry += 1;
                    crawler_warn!(
                        "fetch attempt {} of {} failed: {}; retrying in {}ms",
                        retry,
                        url,
                        err,
                        delay.as_millis()
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(err),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait::async_trait]
impl Stage for FetchStage {
    type Input = Initial;
    type Output = Fetched;

    fn name(&self) -> &'static str {
        FETCH_STAGE
    }

    async fn run(&self, input: Initial, cancel: &CancellationToken) -> Result<Fetched, CrawlError> {
        let output = self.fetch_with_retry(&input.url, cancel).await?;
        let decoded = decode_html(&output.bytes, output.metadata.content_type.as_deref())?;
        let title = scan_title(&decoded.html);
        crawler_debug!(
            "fetched url={} final_url={} bytes={} encoding={} redirects={}",
            input.url,
            output.metadata.final_url,
            output.metadata.byte_len,
            decoded.encoding_label,
            output.metadata.redirect_count
        );
        Ok(input.into_fetched(decoded.html, title))
    }
}

/// Cheap `<title>` lookup on raw markup, without building a DOM.
pub fn scan_title(html: &str) -> Option<String> {
    // ASCII lowercasing keeps byte offsets valid for `html`.
    let lowered = html.to_ascii_lowercase();
    let open = lowered.find("<title")?;
    let content_start = open + lowered[open..].find('>')? + 1;
    let content_end = content_start + lowered[content_start..].find("</title")?;
    let title = decode_basic_entities(&collapse_whitespace(&html[content_start..content_end]));
    (!title.is_empty()).then_some(title)
}

fn decode_basic_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
