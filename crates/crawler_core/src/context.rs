//! The tagged-union model of pipeline progress.
//!
//! Every successful stage consumes one variant and produces the next. The
//! variant structs can only be built from their predecessor through the
//! consuming `into_*`/`with_*` methods below, so a later variant always carries
//! every field of the earlier ones.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{CrawlError, Metadata};

/// Discriminant of [`StageContext`], in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Initial,
    Fetched,
    MetadataExtracted,
    Parsed,
    Cleaned,
    Completed,
    Failed,
}

impl StageKind {
    /// The successful progression; `Failed` sits outside it.
    pub const PROGRESSION: [StageKind; 6] = [
        StageKind::Initial,
        StageKind::Fetched,
        StageKind::MetadataExtracted,
        StageKind::Parsed,
        StageKind::Cleaned,
        StageKind::Completed,
    ];

    pub fn next(self) -> Option<StageKind> {
        match self {
            StageKind::Initial => Some(StageKind::Fetched),
            StageKind::Fetched => Some(StageKind::MetadataExtracted),
            StageKind::MetadataExtracted => Some(StageKind::Parsed),
            StageKind::Parsed => Some(StageKind::Cleaned),
            StageKind::Cleaned => Some(StageKind::Completed),
            StageKind::Completed | StageKind::Failed => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Initial => "initial",
            StageKind::Fetched => "fetched",
            StageKind::MetadataExtracted => "metadata_extracted",
            StageKind::Parsed => "parsed",
            StageKind::Cleaned => "cleaned",
            StageKind::Completed => "completed",
            StageKind::Failed => "failed",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Initial {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fetched {
    pub url: String,
    pub html: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataExtracted {
    pub url: String,
    pub html: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parsed {
    pub url: String,
    pub html: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub metadata: Metadata,
    pub document: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cleaned {
    pub url: String,
    pub html: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub metadata: Metadata,
    pub document: String,
    pub cleaned_document: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completed {
    pub url: String,
    pub html: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub metadata: Metadata,
    pub document: String,
    pub cleaned_document: String,
    pub markdown: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Failed {
    pub url: String,
    pub error: CrawlError,
    /// Reserved for diagnostics; the engine does not populate it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<Box<StageContext>>,
}

impl Initial {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn into_fetched(self, html: String, title: Option<String>) -> Fetched {
        Fetched {
            url: self.url,
            html,
            title,
        }
    }
}

impl Fetched {
    pub fn with_metadata(self, metadata: Metadata) -> MetadataExtracted {
        MetadataExtracted {
            url: self.url,
            html: self.html,
            title: self.title,
            metadata,
        }
    }
}

impl MetadataExtracted {
    pub fn with_document(self, document: String) -> Parsed {
        Parsed {
            url: self.url,
            html: self.html,
            title: self.title,
            metadata: self.metadata,
            document,
        }
    }
}

impl Parsed {
    pub fn with_cleaned_document(self, cleaned_document: String) -> Cleaned {
        Cleaned {
            url: self.url,
            html: self.html,
            title: self.title,
            metadata: self.metadata,
            document: self.document,
            cleaned_document,
        }
    }
}

impl Cleaned {
    pub fn with_markdown(self, markdown: String) -> Completed {
        Completed {
            url: self.url,
            html: self.html,
            title: self.title,
            metadata: self.metadata,
            document: self.document,
            cleaned_document: self.cleaned_document,
            markdown,
        }
    }
}

impl Failed {
    pub fn new(url: impl Into<String>, error: CrawlError) -> Self {
        Self {
            url: url.into(),
            error,
            partial: None,
        }
    }

    pub fn with_partial(mut self, partial: StageContext) -> Self {
        self.partial = Some(Box::new(partial));
        self
    }
}

/// Pipeline progress as a single tagged value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageContext {
    Initial(Initial),
    Fetched(Fetched),
    MetadataExtracted(MetadataExtracted),
    Parsed(Parsed),
    Cleaned(Cleaned),
    Completed(Completed),
    Failed(Failed),
}

impl StageContext {
    pub fn kind(&self) -> StageKind {
        match self {
            StageContext::Initial(_) => StageKind::Initial,
            StageContext::Fetched(_) => StageKind::Fetched,
            StageContext::MetadataExtracted(_) => StageKind::MetadataExtracted,
            StageContext::Parsed(_) => StageKind::Parsed,
            StageContext::Cleaned(_) => StageKind::Cleaned,
            StageContext::Completed(_) => StageKind::Completed,
            StageContext::Failed(_) => StageKind::Failed,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            StageContext::Initial(ctx) => &ctx.url,
            StageContext::Fetched(ctx) => &ctx.url,
            StageContext::MetadataExtracted(ctx) => &ctx.url,
            StageContext::Parsed(ctx) => &ctx.url,
            StageContext::Cleaned(ctx) => &ctx.url,
            StageContext::Completed(ctx) => &ctx.url,
            StageContext::Failed(ctx) => &ctx.url,
        }
    }

    /// `Completed` and `Failed` end a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageContext::Completed(_) | StageContext::Failed(_))
    }
}

/// Returned when a [`StageContext`] holds a different variant than requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("expected {expected} context, found {found}")]
pub struct ContextMismatch {
    pub expected: StageKind,
    pub found: StageKind,
}

/// Implemented by every variant struct of [`StageContext`].
pub trait ContextVariant:
    Into<StageContext> + TryFrom<StageContext, Error = ContextMismatch> + Send + Sync + 'static
{
    const KIND: StageKind;

    fn url(&self) -> &str;
}

macro_rules! context_variant {
    ($ty:ident) => {
        impl From<$ty> for StageContext {
            fn from(value: $ty) -> Self {
                StageContext::$ty(value)
            }
        }

        impl TryFrom<StageContext> for $ty {
            type Error = ContextMismatch;

            fn try_from(value: StageContext) -> Result<Self, Self::Error> {
                match value {
                    StageContext::$ty(inner) => Ok(inner),
                    other => Err(ContextMismatch {
                        expected: StageKind::$ty,
                        found: other.kind(),
                    }),
                }
            }
        }

        impl ContextVariant for $ty {
            const KIND: StageKind = StageKind::$ty;

            fn url(&self) -> &str {
                &self.url
            }
        }
    };
}

context_variant!(Initial);
context_variant!(Fetched);
context_variant!(MetadataExtracted);
context_variant!(Parsed);
context_variant!(Cleaned);
context_variant!(Completed);
context_variant!(Failed);
