use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use crawler_core::{Completed, CrawlError, Metadata, Pipeline, SlidingWindowLimiter, TtlLruCache};
use crawler_logging::{crawler_debug, crawler_error, crawler_info, crawler_warn};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::clean::CleanStage;
use crate::fetch::{FetchStage, Fetcher, RetryPolicy};
use crate::metadata::ExtractMetadataStage;
use crate::parse::ParseStage;
use crate::render::{Converter, RenderStage};

pub const RATE_LIMITED_CODE: &str = "rate_limited";

/// Markdown and page details returned for a successful crawl.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlPayload {
    pub markdown: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl From<Completed> for CrawlPayload {
    fn from(completed: Completed) -> Self {
        let title = completed
            .title
            .or_else(|| completed.metadata.title().map(str::to_string));
        Self {
            markdown: completed.markdown,
            title,
            metadata: completed.metadata,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// The caller-facing `{success, data | error}` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<CrawlPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlOutcome {
    Success { payload: CrawlPayload, cached: bool },
    RateLimited { retry_after_secs: u64 },
    Failed(CrawlError),
}

impl CrawlOutcome {
    pub fn envelope(&self) -> Envelope {
        match self {
            CrawlOutcome::Success { payload, .. } => Envelope {
                success: true,
                data: Some(payload.clone()),
                error: None,
            },
            CrawlOutcome::RateLimited { retry_after_secs } => Envelope {
                success: false,
                data: None,
                error: Some(ErrorBody {
                    code: RATE_LIMITED_CODE.to_string(),
                    message: format!("Too many requests, retry in {retry_after_secs} seconds"),
                    details: Some(json!({ "retryAfter": retry_after_secs })),
                }),
            },
            CrawlOutcome::Failed(error) => Envelope {
                success: false,
                data: None,
                error: Some(ErrorBody {
                    code: error.code().to_string(),
                    message: error.to_string(),
                    details: serde_json::to_value(error).ok(),
                }),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSettings {
    pub rate_limit_max_requests: usize,
    pub rate_limit_window: Duration,
    /// Overall deadline for one pipeline run.
    pub crawl_deadline: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            rate_limit_max_requests: 10,
            rate_limit_window: Duration::from_millis(60_000),
            crawl_deadline: Duration::from_millis(30_000),
        }
    }
}

/// Composes the default stages in order.
pub fn build_pipeline(
    fetcher: Arc<dyn Fetcher>,
    retry: RetryPolicy,
    converter: Arc<dyn Converter>,
) -> Pipeline {
    Pipeline::builder()
        .then(FetchStage::new(fetcher, retry))
        .then(ExtractMetadataStage)
        .then(ParseStage)
        .then(CleanStage)
        .then(RenderStage::new(converter))
        .build()
}

/// Admission control, caching and the pipeline behind one call.
pub struct CrawlService {
    pipeline: Pipeline,
    cache: Arc<TtlLruCache<String, CrawlPayload>>,
    limiter: Arc<SlidingWindowLimiter>,
    settings: ServiceSettings,
}

impl CrawlService {
    pub fn new(
        pipeline: Pipeline,
        cache: Arc<TtlLruCache<String, CrawlPayload>>,
        limiter: Arc<SlidingWindowLimiter>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            pipeline,
            cache,
            limiter,
            settings,
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub async fn crawl(&self, identifier: &str, url: &str) -> CrawlOutcome {
        let decision = self.limiter.check_limit(
            identifier,
            self.settings.rate_limit_max_requests,
            self.settings.rate_limit_window,
        );
        if !decision.allowed {
            let retry_after_secs = ceil_secs(self.settings.rate_limit_window);
            crawler_warn!("rate limited {} requesting {}", identifier, url);
            return CrawlOutcome::RateLimited { retry_after_secs };
        }

        if let Some(payload) = self.cache.get(url) {
            crawler_debug!("cache hit for {}", url);
            return CrawlOutcome::Success {
                payload,
                cached: true,
            };
        }
        crawler_debug!("cache miss for {}", url);

        crawler_info!("crawling {} for {}", url, identifier);
        let run = AssertUnwindSafe(self.pipeline.run(url, Some(self.settings.crawl_deadline)))
            .catch_unwind()
            .await;

        match run {
            Ok(Ok(completed)) => {
                let payload = CrawlPayload::from(completed);
                self.cache.set(url.to_string(), payload.clone());
                CrawlOutcome::Success {
                    payload,
                    cached: false,
                }
            }
            Ok(Err(error)) => {
                crawler_warn!("crawl of {} failed: {}", url, error);
                CrawlOutcome::Failed(error)
            }
            Err(panic) => {
                let message = panic_message(&*panic);
                crawler_error!("crawl of {} panicked: {}", url, message);
                CrawlOutcome::Failed(
                    CrawlError::unknown("crawl aborted unexpectedly").with_cause(message),
                )
            }
        }
    }
}

fn ceil_secs(window: Duration) -> u64 {
    let millis = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
    millis.div_ceil(1000)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
