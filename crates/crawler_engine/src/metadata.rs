use crawler_core::{keys, CancellationToken, CrawlError, Fetched, Metadata, MetadataExtracted, Stage};
use crawler_logging::crawler_debug;
use scraper::Html;
use url::Url;

use crate::dom::{collapse_whitespace, selector};

pub const EXTRACT_METADATA_STAGE: &str = "extract-metadata";

/// `Fetched -> MetadataExtracted`: reads `<title>`, `<meta>` and icon links.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtractMetadataStage;

#[async_trait::async_trait]
impl Stage for ExtractMetadataStage {
    type Input = Fetched;
    type Output = MetadataExtracted;

    fn name(&self) -> &'static str {
        EXTRACT_METADATA_STAGE
    }

    async fn run(
        &self,
        input: Fetched,
        _cancel: &CancellationToken,
    ) -> Result<MetadataExtracted, CrawlError> {
        let base = Url::parse(&input.url).ok();
        let metadata = extract_metadata(&input.html, base.as_ref())?;
        crawler_debug!("extracted {} metadata keys from {}", metadata.len(), input.url);
        Ok(input.with_metadata(metadata))
    }
}

/// Collects page metadata. Missing tags are simply absent from the result.
///
/// Keys come from `name`, `property` or `itemprop` and are lowercased. The
/// first occurrence of a repeated key wins.
pub fn extract_metadata(html: &str, base: Option<&Url>) -> Result<Metadata, CrawlError> {
    let document = Html::parse_document(html);
    let title_sel = selector("title", EXTRACT_METADATA_STAGE)?;
    let meta_sel = selector("meta", EXTRACT_METADATA_STAGE)?;
    let link_sel = selector("link[rel][href]", EXTRACT_METADATA_STAGE)?;

    let mut metadata = Metadata::new();

    if let Some(title) = document
        .select(&title_sel)
        .next()
        .map(|node| collapse_whitespace(&node.text().collect::<String>()))
        .filter(|title| !title.is_empty())
    {
        metadata.insert(keys::TITLE, Some(title));
    }

    for meta in document.select(&meta_sel) {
        let element = meta.value();
        let Some(key) = element
            .attr("property")
            .or_else(|| element.attr("name"))
            .or_else(|| element.attr("itemprop"))
            .map(|key| key.trim().to_ascii_lowercase())
            .filter(|key| !key.is_empty())
        else {
            continue;
        };
        let content = element
            .attr("content")
            .map(collapse_whitespace)
            .filter(|content| !content.is_empty());
        metadata.insert_if_absent(key, content);
    }

    let favicon = document
        .select(&link_sel)
        .filter(|link| {
            link.value().attr("rel").is_some_and(|rel| {
                rel.split_ascii_whitespace()
                    .any(|token| token.eq_ignore_ascii_case("icon"))
            })
        })
        .find_map(|link| link.value().attr("href").and_then(|href| resolve(href, base)));
    if let Some(favicon) = favicon {
        metadata.insert(keys::FAVICON, Some(favicon));
    }

    Ok(metadata)
}

fn resolve(reference: &str, base: Option<&Url>) -> Option<String> {
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return None;
    }
    match base {
        Some(base) => base.join(trimmed).ok().map(String::from),
        None => Url::parse(trimmed).ok().map(String::from),
    }
}

#[cfg(test)]
mod tests {
    use super::resolve;
    use url::Url;

    #[test]
    fn icon_hrefs_resolve_against_the_page() {
        let base = Url::parse("https://example.com/blog/post").unwrap();
        assert_eq!(
            resolve("/favicon.ico", Some(&base)).as_deref(),
            Some("https://example.com/favicon.ico")
        );
        assert_eq!(
            resolve("https://cdn.example.net/i.png", Some(&base)).as_deref(),
            Some("https://cdn.example.net/i.png")
        );
        assert_eq!(resolve("  ", Some(&base)), None);
        assert_eq!(resolve("relative.png", None), None);
    }
}
