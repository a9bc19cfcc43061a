use crawler_core::CrawlError;
use scraper::Selector;

/// Compiles a selector, reporting a bad one as a parse failure of `stage`.
pub(crate) fn selector(css: &str, stage: &str) -> Result<Selector, CrawlError> {
    Selector::parse(css).map_err(|err| CrawlError::ParseFailed {
        message: format!("invalid selector {css:?}: {err}"),
        stage: stage.to_string(),
    })
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
