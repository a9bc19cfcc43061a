//! Crawler core: stage model, pipeline engine, cache and admission control.
mod cache;
mod context;
mod error;
mod metadata;
mod pipeline;
mod rate_limit;
mod stage;

pub use cache::TtlLruCache;
pub use context::{
    Cleaned, Completed, ContextMismatch, ContextVariant, Failed, Fetched, Initial,
    MetadataExtracted, Parsed, StageContext, StageKind,
};
pub use error::CrawlError;
pub use metadata::{keys, Metadata};
pub use pipeline::{Chain, Link, Pipeline, PipelineBuilder, RunScope, Start};
pub use rate_limit::{RateLimitDecision, SlidingWindowLimiter};
pub use stage::{LogProgressSink, PipelineEvent, ProgressSink, Stage};

pub use tokio_util::sync::CancellationToken;
