use crawler_core::{CancellationToken, CrawlError, MetadataExtracted, Parsed, Stage};
use crawler_logging::crawler_debug;
use scraper::Html;

use crate::dom::selector;

pub const PARSE_STAGE: &str = "parse";

/// Which part of the page was taken as primary content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Article,
    Main,
    Body,
    Document,
}

impl Region {
    const PREFERENCE: [Region; 3] = [Region::Article, Region::Main, Region::Body];

    fn tag(self) -> &'static str {
        match self {
            Region::Article => "article",
            Region::Main => "main",
            Region::Body => "body",
            Region::Document => "html",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryContent {
    pub region: Region,
    pub html: String,
}

/// Returns the inner HTML of the first `<article>`, else `<main>`, else
/// `<body>`, else the serialized document.
pub fn select_primary_content(html: &str) -> Result<PrimaryContent, CrawlError> {
    if html.trim().is_empty() {
        return Err(CrawlError::invalid_html("document is empty"));
    }

    let document = Html::parse_document(html);
    for region in Region::PREFERENCE {
        let sel = selector(region.tag(), PARSE_STAGE)?;
        if let Some(node) = document.select(&sel).next() {
            return Ok(PrimaryContent {
                region,
                html: node.inner_html(),
            });
        }
    }

    // html5ever always synthesizes a <body>, so this only guards against a
    // parser that does not.
    Ok(PrimaryContent {
        region: Region::Document,
        html: document.root_element().html(),
    })
}

/// `MetadataExtracted -> Parsed`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParseStage;

#[async_trait::async_trait]
impl Stage for ParseStage {
    type Input = MetadataExtracted;
    type Output = Parsed;

    fn name(&self) -> &'static str {
        PARSE_STAGE
    }

    async fn run(
        &self,
        input: MetadataExtracted,
        _cancel: &CancellationToken,
    ) -> Result<Parsed, CrawlError> {
        let content = select_primary_content(&input.html)?;
        crawler_debug!("primary content of {} taken from {:?}", input.url, content.region);
        Ok(input.with_document(content.html))
    }
}
