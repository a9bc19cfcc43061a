use std::time::Duration;

use crawler_logging::crawler_debug;
use tokio_util::sync::CancellationToken;

use crate::{ContextVariant, CrawlError, StageKind};

/// One pipeline step: consumes one context variant and produces the next.
///
/// `cancel` fires when the run's overall deadline elapses; stages doing I/O
/// should stop promptly once it is cancelled.
#[async_trait::async_trait]
pub trait Stage: Send + Sync {
    type Input: ContextVariant;
    type Output: ContextVariant;

    /// Stable name used in logs and in `timeout` errors.
    fn name(&self) -> &'static str;

    async fn run(
        &self,
        input: Self::Input,
        cancel: &CancellationToken,
    ) -> Result<Self::Output, CrawlError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    StageStarted {
        url: String,
        stage: &'static str,
    },
    StageCompleted {
        url: String,
        stage: &'static str,
        reached: StageKind,
        elapsed: Duration,
    },
    StageFailed {
        url: String,
        stage: &'static str,
        error: CrawlError,
    },
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

/// Default sink: stage progress goes to the debug log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgressSink;

impl ProgressSink for LogProgressSink {
    fn emit(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::StageStarted { url, stage } => {
                crawler_debug!("stage={} url={} started", stage, url);
            }
            PipelineEvent::StageCompleted {
                url,
                stage,
                reached,
                elapsed,
            } => {
                crawler_debug!(
                    "stage={} url={} reached={} elapsed_ms={}",
                    stage,
                    url,
                    reached,
                    elapsed.as_millis()
                );
            }
            PipelineEvent::StageFailed { url, stage, error } => {
                crawler_debug!("stage={} url={} failed: {}", stage, url, error);
            }
        }
    }
}
