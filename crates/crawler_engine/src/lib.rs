//! Crawler engine: the concrete pipeline stages and the crawl service.
mod clean;
mod decode;
mod dom;
mod fetch;
mod metadata;
mod parse;
mod render;
mod service;

pub use clean::{clean_html, CleanStage, CLEAN_STAGE};
pub use decode::{decode_html, DecodeError, DecodedHtml};
pub use fetch::{
    scan_title, FailureKind, FetchError, FetchMetadata, FetchOutput, FetchSettings, FetchStage,
    Fetcher, ReqwestFetcher, RetryPolicy, FETCH_STAGE,
};
pub use metadata::{extract_metadata, ExtractMetadataStage, EXTRACT_METADATA_STAGE};
pub use parse::{select_primary_content, ParseStage, PrimaryContent, Region, PARSE_STAGE};
pub use render::{Converter, Html2MdConverter, RenderStage, RENDER_STAGE};
pub use service::{
    build_pipeline, CrawlOutcome, CrawlPayload, CrawlService, Envelope, ErrorBody,
    ServiceSettings, RATE_LIMITED_CODE,
};
