use std::collections::BTreeSet;

use crawler_core::{
    keys, Cleaned, ContextMismatch, CrawlError, Failed, Fetched, Initial, Metadata, StageContext,
    StageKind,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn field_names(context: &StageContext) -> BTreeSet<String> {
    match serde_json::to_value(context).unwrap() {
        Value::Object(map) => map.keys().filter(|k| *k != "stage").cloned().collect(),
        other => panic!("context serialized to {other}"),
    }
}

fn progression() -> Vec<StageContext> {
    let mut metadata = Metadata::new();
    metadata.insert(keys::TITLE, Some("T".into()));

    let initial = Initial::new("https://example.com");
    let fetched = initial.clone().into_fetched("<html/>".into(), Some("T".into()));
    let extracted = fetched.clone().with_metadata(metadata);
    let parsed = extracted.clone().with_document("<p>Hi</p>".into());
    let cleaned = parsed.clone().with_cleaned_document("<p>Hi</p>".into());
    let completed = cleaned.clone().with_markdown("Hi".into());

    vec![
        initial.into(),
        fetched.into(),
        extracted.into(),
        parsed.into(),
        cleaned.into(),
        completed.into(),
    ]
}

#[test]
fn every_transition_strictly_adds_fields() {
    let contexts = progression();
    let kinds = contexts.iter().map(StageContext::kind).collect::<Vec<_>>();
    assert_eq!(kinds, StageKind::PROGRESSION.to_vec());

    for pair in contexts.windows(2) {
        let before = field_names(&pair[0]);
        let after = field_names(&pair[1]);
        assert!(
            before.is_subset(&after) && after.len() > before.len(),
            "{:?} -> {:?} dropped or added nothing: {before:?} vs {after:?}",
            pair[0].kind(),
            pair[1].kind()
        );
    }
}

#[test]
fn earlier_values_survive_every_transition() {
    let contexts = progression();
    let completed = contexts.last().unwrap();
    let value = serde_json::to_value(completed).unwrap();

    assert_eq!(
        value,
        json!({
            "stage": "completed",
            "url": "https://example.com",
            "html": "<html/>",
            "title": "T",
            "metadata": { "title": "T" },
            "document": "<p>Hi</p>",
            "cleanedDocument": "<p>Hi</p>",
            "markdown": "Hi",
        })
    );
}

#[test]
fn kinds_advance_in_fixed_order() {
    let mut kind = StageKind::Initial;
    let mut seen = vec![kind];
    while let Some(next) = kind.next() {
        seen.push(next);
        kind = next;
    }
    assert_eq!(seen, StageKind::PROGRESSION.to_vec());
    assert_eq!(StageKind::Failed.next(), None);
}

#[test]
fn try_from_narrows_to_the_matching_variant() {
    let context: StageContext = Initial::new("https://example.com")
        .into_fetched("<p/>".into(), None)
        .into();

    let fetched = Fetched::try_from(context.clone()).expect("fetched variant");
    assert_eq!(fetched.html, "<p/>");

    let err = Cleaned::try_from(context).unwrap_err();
    assert_eq!(
        err,
        ContextMismatch {
            expected: StageKind::Cleaned,
            found: StageKind::Fetched,
        }
    );
}

#[test]
fn failed_context_round_trips_through_json() {
    let failed = Failed::new(
        "https://example.com",
        CrawlError::Timeout {
            timeout_ms: 30_000,
            stage: "fetch".into(),
        },
    );
    let context = StageContext::from(failed);

    let value = serde_json::to_value(&context).unwrap();
    assert_eq!(
        value,
        json!({
            "stage": "failed",
            "url": "https://example.com",
            "error": { "type": "timeout", "timeoutMs": 30000, "stage": "fetch" },
        })
    );

    let back: StageContext = serde_json::from_value(value).unwrap();
    assert_eq!(back, context);
}

#[test]
fn failed_context_may_carry_partial_progress() {
    let partial: StageContext = Initial::new("https://example.com").into();
    let failed = Failed::new("https://example.com", CrawlError::network("reset"))
        .with_partial(partial.clone());

    assert_eq!(failed.partial.as_deref(), Some(&partial));
}

#[test]
fn crawl_errors_serialize_with_camel_case_fields() {
    let error = CrawlError::FetchFailed {
        status: 503,
        status_text: "Service Unavailable".into(),
        url: "https://example.com".into(),
    };
    assert_eq!(error.code(), "fetch_failed");
    assert!(!error.is_transient());
    assert_eq!(
        serde_json::to_value(&error).unwrap(),
        json!({
            "type": "fetch_failed",
            "status": 503,
            "statusText": "Service Unavailable",
            "url": "https://example.com",
        })
    );

    let network = CrawlError::network("connection reset").with_cause("os error 104");
    assert!(network.is_transient());
    assert_eq!(
        serde_json::to_value(&network).unwrap(),
        json!({
            "type": "network_error",
            "message": "connection reset",
            "cause": "os error 104",
        })
    );
}
