//! Sequential pipeline engine.
//!
//! Stages are composed with a typed builder: [`PipelineBuilder::then`] only
//! accepts a stage whose input is the previous stage's output, and
//! [`PipelineBuilder::build`] only exists once the chain produces
//! [`Completed`]. A mis-ordered pipeline therefore does not compile.
//!
//! A run may carry an overall deadline. It bounds the whole chain, not each
//! stage: every stage is awaited against the same absolute instant, and the
//! stage in flight when it passes is reported in the `timeout` error.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    Completed, ContextVariant, CrawlError, Failed, Initial, LogProgressSink, PipelineEvent,
    ProgressSink, Stage, StageContext,
};

#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    fn expired(&self, stage: &str) -> CrawlError {
        let timeout_ms = u64::try_from(self.budget.as_millis()).unwrap_or(u64::MAX);
        CrawlError::timeout(timeout_ms, stage)
    }
}

/// Per-run state shared by every stage of one run.
pub struct RunScope {
    url: String,
    cancel: CancellationToken,
    deadline: Option<Deadline>,
    sink: Arc<dyn ProgressSink>,
}

impl RunScope {
    fn new(url: String, deadline: Option<Duration>, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            url,
            cancel: CancellationToken::new(),
            deadline: deadline.map(|budget| Deadline {
                at: Instant::now() + budget,
                budget,
            }),
            sink,
        }
    }

    async fn step<S: Stage>(&self, stage: &S, input: S::Input) -> Result<S::Output, CrawlError> {
        let name = stage.name();
        self.sink.emit(PipelineEvent::StageStarted {
            url: self.url.clone(),
            stage: name,
        });
        let started = Instant::now();

        let result = match self.deadline {
            Some(deadline) if started >= deadline.at => {
                self.cancel.cancel();
                Err(deadline.expired(name))
            }
            Some(deadline) => {
                match tokio::time::timeout_at(deadline.at, stage.run(input, &self.cancel)).await {
                    Ok(result) => result,
                    Err(_) => {
                        // Dropping the stage future abandons its I/O; the token
                        // reaches anything it spawned.
                        self.cancel.cancel();
                        Err(deadline.expired(name))
                    }
                }
            }
            None => stage.run(input, &self.cancel).await,
        };

        match &result {
            Ok(_) => self.sink.emit(PipelineEvent::StageCompleted {
                url: self.url.clone(),
                stage: name,
                reached: <S::Output as ContextVariant>::KIND,
                elapsed: started.elapsed(),
            }),
            Err(error) => self.sink.emit(PipelineEvent::StageFailed {
                url: self.url.clone(),
                stage: name,
                error: error.clone(),
            }),
        }
        result
    }
}

/// A composed prefix of a pipeline producing `O` from [`Initial`].
#[async_trait::async_trait]
pub trait Chain<O: ContextVariant>: Send + Sync {
    async fn drive(&self, initial: Initial, scope: &RunScope) -> Result<O, CrawlError>;
}

/// The empty chain.
pub struct Start;

#[async_trait::async_trait]
impl Chain<Initial> for Start {
    async fn drive(&self, initial: Initial, _scope: &RunScope) -> Result<Initial, CrawlError> {
        Ok(initial)
    }
}

/// A chain extended by one stage.
pub struct Link<P, S> {
    prev: P,
    stage: S,
}

#[async_trait::async_trait]
impl<P, S> Chain<S::Output> for Link<P, S>
where
    S: Stage,
    P: Chain<S::Input>,
{
    async fn drive(&self, initial: Initial, scope: &RunScope) -> Result<S::Output, CrawlError> {
        let input = self.prev.drive(initial, scope).await?;
        scope.step(&self.stage, input).await
    }
}

pub struct PipelineBuilder<O, C> {
    chain: C,
    stage_names: Vec<&'static str>,
    sink: Arc<dyn ProgressSink>,
    _output: PhantomData<fn() -> O>,
}

impl PipelineBuilder<Initial, Start> {
    pub fn new() -> Self {
        Self {
            chain: Start,
            stage_names: Vec::new(),
            sink: Arc::new(LogProgressSink),
            _output: PhantomData,
        }
    }
}

impl Default for PipelineBuilder<Initial, Start> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O, C> PipelineBuilder<O, C>
where
    O: ContextVariant,
    C: Chain<O>,
{
    /// Appends a stage consuming this chain's output.
    pub fn then<S>(mut self, stage: S) -> PipelineBuilder<S::Output, Link<C, S>>
    where
        S: Stage<Input = O>,
    {
        self.stage_names.push(stage.name());
        PipelineBuilder {
            chain: Link {
                prev: self.chain,
                stage,
            },
            stage_names: self.stage_names,
            sink: self.sink,
            _output: PhantomData,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }
}

impl<C> PipelineBuilder<Completed, C>
where
    C: Chain<Completed> + 'static,
{
    pub fn build(self) -> Pipeline {
        Pipeline {
            chain: Box::new(self.chain),
            stage_names: self.stage_names,
            sink: self.sink,
        }
    }
}

/// A complete `Initial -> Completed` pipeline.
pub struct Pipeline {
    chain: Box<dyn Chain<Completed>>,
    stage_names: Vec<&'static str>,
    sink: Arc<dyn ProgressSink>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder<Initial, Start> {
        PipelineBuilder::new()
    }

    /// Names of the composed stages, in execution order.
    pub fn stage_names(&self) -> &[&'static str] {
        &self.stage_names
    }

    /// Drives `url` through every stage. The first error short-circuits the
    /// run and is returned unchanged.
    pub async fn run(
        &self,
        url: impl Into<String>,
        deadline: Option<Duration>,
    ) -> Result<Completed, CrawlError> {
        let url = url.into();
        let scope = RunScope::new(url.clone(), deadline, self.sink.clone());
        self.chain.drive(Initial::new(url), &scope).await
    }

    /// Like [`Pipeline::run`], but reports the outcome as a terminal context.
    pub async fn run_to_context(
        &self,
        url: impl Into<String>,
        deadline: Option<Duration>,
    ) -> StageContext {
        let url = url.into();
        match self.run(url.clone(), deadline).await {
            Ok(completed) => completed.into(),
            Err(error) => Failed::new(url, error).into(),
        }
    }
}
