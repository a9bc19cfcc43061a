use crawler_core::{CancellationToken, Cleaned, CrawlError, Parsed, Stage};
use crawler_logging::crawler_debug;
use ego_tree::NodeRef;
use scraper::node::{Element, Node};
use scraper::Html;

pub const CLEAN_STAGE: &str = "clean";

/// Elements removed together with everything inside them.
const STRIPPED_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "template", "iframe", "svg", "link", "meta",
];

const KEPT_ATTRIBUTES: &[&str] = &[
    "href", "src", "alt", "title", "colspan", "rowspan", "start", "lang", "datetime", "cite",
    "class",
];

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "source", "track", "wbr",
];

/// Class prefixes emitted by CSS-in-JS tooling.
const GENERATED_CLASS_PREFIXES: &[&str] =
    &["css-", "sc-", "jsx-", "emotion-", "svelte-", "makestyles-"];

/// `Parsed -> Cleaned`: reduces the primary content to semantic markup.
#[derive(Debug, Default, Clone, Copy)]
pub struct CleanStage;

#[async_trait::async_trait]
impl Stage for CleanStage {
    type Input = Parsed;
    type Output = Cleaned;

    fn name(&self) -> &'static str {
        CLEAN_STAGE
    }

    async fn run(&self, input: Parsed, _cancel: &CancellationToken) -> Result<Cleaned, CrawlError> {
        let cleaned = clean_html(&input.document);
        crawler_debug!(
            "cleaned {}: {} -> {} bytes",
            input.url,
            input.document.len(),
            cleaned.len()
        );
        Ok(input.with_cleaned_document(cleaned))
    }
}

/// Serializes `html` back to markup without presentation-only elements,
/// comments, copy-to-clipboard controls or non-semantic attributes.
pub fn clean_html(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut out = String::with_capacity(html.len());
    for child in fragment.root_element().children() {
        write_node(child, &mut out);
    }
    out
}

fn write_node(node: NodeRef<'_, Node>, out: &mut String) {
    match node.value() {
        Node::Text(text) => escape_into(text, false, out),
        Node::Comment(_) => {}
        Node::Element(element) => write_element(node, element, out),
        _ => {
            for child in node.children() {
                write_node(child, out);
            }
        }
    }
}

fn write_element(node: NodeRef<'_, Node>, element: &Element, out: &mut String) {
    let tag = element.name().to_ascii_lowercase();
    if STRIPPED_ELEMENTS.contains(&tag.as_str()) || is_copy_control(&tag, element) {
        return;
    }

    out.push('<');
    out.push_str(&tag);
    // Emitted in a fixed order so output does not depend on source order.
    for &name in KEPT_ATTRIBUTES {
        let Some(value) = element.attr(name) else {
            continue;
        };
        let value = if name == "class" {
            let kept = filter_classes(value);
            if kept.is_empty() {
                continue;
            }
            kept
        } else {
            value.to_string()
        };
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        escape_into(&value, true, out);
        out.push('"');
    }
    out.push('>');

    if VOID_ELEMENTS.contains(&tag.as_str()) {
        return;
    }
    for child in node.children() {
        write_node(child, out);
    }
    out.push_str("</");
    out.push_str(&tag);
    out.push('>');
}

/// Buttons (or `role=button` elements) labelled as copy actions.
fn is_copy_control(tag: &str, element: &Element) -> bool {
    let is_button = tag == "button"
        || element
            .attr("role")
            .is_some_and(|role| role.trim().eq_ignore_ascii_case("button"));
    is_button
        && ["class", "aria-label", "title"].iter().any(|attr| {
            element
                .attr(attr)
                .is_some_and(|value| value.to_ascii_lowercase().contains("copy"))
        })
}

fn filter_classes(value: &str) -> String {
    value
        .split_ascii_whitespace()
        .filter(|token| !is_generated_class(token))
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn is_generated_class(token: &str) -> bool {
    let lower = token.to_ascii_lowercase();
    if GENERATED_CLASS_PREFIXES
        .iter()
        .any(|prefix| lower.starts_with(prefix))
    {
        return true;
    }
    match token.rsplit_once(['-', '_']) {
        Some((_, tail)) => looks_like_hash(tail, 5),
        None => looks_like_hash(token, 8),
    }
}

/// Mixed letters and at least two digits; a single trailing digit
/// (`python3`, `level2`) reads as a word.
fn looks_like_hash(candidate: &str, min_len: usize) -> bool {
    candidate.len() >= min_len
        && candidate.chars().all(|c| c.is_ascii_alphanumeric())
        && candidate.chars().filter(|c| c.is_ascii_digit()).count() >= 2
        && candidate.chars().any(|c| c.is_ascii_alphabetic())
}

fn escape_into(text: &str, attribute: bool, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(c),
        }
    }
}
