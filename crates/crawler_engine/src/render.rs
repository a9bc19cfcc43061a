use std::sync::Arc;

use crawler_core::{CancellationToken, Cleaned, Completed, CrawlError, Stage};

pub const RENDER_STAGE: &str = "render";

pub trait Converter: Send + Sync {
    fn to_markdown(&self, html: &str) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Html2MdConverter;

impl Converter for Html2MdConverter {
    fn to_markdown(&self, html: &str) -> String {
        html2md::parse_html(html).trim().to_string()
    }
}

/// `Cleaned -> Completed`.
#[derive(Clone)]
pub struct RenderStage {
    converter: Arc<dyn Converter>,
}

impl RenderStage {
    pub fn new(converter: Arc<dyn Converter>) -> Self {
        Self { converter }
    }
}

impl Default for RenderStage {
    fn default() -> Self {
        Self::new(Arc::new(Html2MdConverter))
    }
}

#[async_trait::async_trait]
impl Stage for RenderStage {
    type Input = Cleaned;
    type Output = Completed;

    fn name(&self) -> &'static str {
        RENDER_STAGE
    }

    async fn run(
        &self,
        input: Cleaned,
        _cancel: &CancellationToken,
    ) -> Result<Completed, CrawlError> {
        let markdown = self.converter.to_markdown(&input.cleaned_document);
        Ok(input.with_markdown(markdown))
    }
}
