use chardetng::EncodingDetector;
use crawler_core::CrawlError;
use encoding_rs::Encoding;

/// How far into the body a `<meta charset>` declaration is looked for.
const META_PRESCAN_BYTES: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedHtml {
    pub html: String,
    pub encoding_label: &'static str,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("body is not valid {encoding}")]
    Malformed { encoding: &'static str },
}

impl From<DecodeError> for CrawlError {
    fn from(err: DecodeError) -> Self {
        CrawlError::invalid_html(err.to_string())
    }
}

/// Decode a response body to UTF-8.
///
/// Encoding precedence: byte order mark, Content-Type charset, `<meta>`
/// charset in the first KiB, then `chardetng` detection.
pub fn decode_html(bytes: &[u8], content_type: Option<&str>) -> Result<DecodedHtml, DecodeError> {
    let encoding = Encoding::for_bom(bytes)
        .map(|(encoding, _)| encoding)
        .or_else(|| content_type.and_then(charset_param).and_then(label_to_encoding))
        .or_else(|| meta_charset(bytes).and_then(label_to_encoding))
        .unwrap_or_else(|| {
            let mut detector = EncodingDetector::new();
            detector.feed(bytes, true);
            detector.guess(None, true)
        });

    // `decode` strips a BOM and lets it override the chosen encoding.
    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        return Err(DecodeError::Malformed {
            encoding: used.name(),
        });
    }
    Ok(DecodedHtml {
        html: text.into_owned(),
        encoding_label: used.name(),
    })
}

fn label_to_encoding(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.as_bytes())
}

fn charset_param(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches(&['"', '\''][..]))
    })
}

fn meta_charset(bytes: &[u8]) -> Option<&str> {
    let head = &bytes[..bytes.len().min(META_PRESCAN_BYTES)];
    let lowered = head.to_ascii_lowercase();
    let start = find(&lowered, b"charset=")? + "charset=".len();
    let rest = &head[start..];
    let rest = rest.strip_prefix(b"\"").or_else(|| rest.strip_prefix(b"'")).unwrap_or(rest);
    let end = rest
        .iter()
        .position(|b| matches!(b, b'"' | b'\'' | b' ' | b';' | b'>' | b'/'))
        .unwrap_or(rest.len());
    std::str::from_utf8(&rest[..end]).ok().filter(|label| !label.is_empty())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::{charset_param, meta_charset};

    #[test]
    fn charset_parameter_is_case_insensitive_and_unquoted() {
        assert_eq!(charset_param("text/html; Charset=\"UTF-8\""), Some("UTF-8"));
        assert_eq!(charset_param("text/html;charset=iso-8859-1"), Some("iso-8859-1"));
        assert_eq!(charset_param("text/html"), None);
    }

    #[test]
    fn meta_charset_is_found_in_the_prescan_window() {
        let html = br#"<html><head><meta charset="windows-1252"></head></html>"#;
        assert_eq!(meta_charset(html), Some("windows-1252"));

        let http_equiv =
            br#"<meta http-equiv="Content-Type" content="text/html; charset=Shift_JIS">"#;
        assert_eq!(meta_charset(http_equiv), Some("Shift_JIS"));

        assert_eq!(meta_charset(b"<html><body>plain</body></html>"), None);
    }
}
