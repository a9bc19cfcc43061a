use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Well-known metadata keys. Any other string is a valid custom key.
pub mod keys {
    pub const TITLE: &str = "title";
    pub const DESCRIPTION: &str = "description";
    pub const OG_TITLE: &str = "og:title";
    pub const OG_DESCRIPTION: &str = "og:description";
    pub const OG_IMAGE: &str = "og:image";
    pub const OG_URL: &str = "og:url";
    pub const OG_SITE_NAME: &str = "og:site_name";
    pub const OG_TYPE: &str = "og:type";
    pub const TWITTER_TITLE: &str = "twitter:title";
    pub const TWITTER_DESCRIPTION: &str = "twitter:description";
    pub const TWITTER_IMAGE: &str = "twitter:image";
    pub const TWITTER_CARD: &str = "twitter:card";
    pub const FAVICON: &str = "favicon";
}

/// Page metadata: string keys mapped to optional values.
///
/// Sorted so that serialization is deterministic. A key that is present with a
/// `None` value means the tag existed without usable content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, Option<String>>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Option<String>) {
        self.0.insert(key.into(), value);
    }

    /// Inserts only when the key is not yet present, so the first occurrence
    /// of a repeated tag wins.
    pub fn insert_if_absent(&mut self, key: impl Into<String>, value: Option<String>) {
        self.0.entry(key.into()).or_insert(value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.as_deref())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    /// `title`, then `og:title`, then `twitter:title`.
    pub fn title(&self) -> Option<&str> {
        self.first_of(&[keys::TITLE, keys::OG_TITLE, keys::TWITTER_TITLE])
    }

    /// `description`, then `og:description`, then `twitter:description`.
    pub fn description(&self) -> Option<&str> {
        self.first_of(&[
            keys::DESCRIPTION,
            keys::OG_DESCRIPTION,
            keys::TWITTER_DESCRIPTION,
        ])
    }

    fn first_of(&self, candidates: &[&str]) -> Option<&str> {
        candidates.iter().find_map(|key| self.get(key))
    }
}

impl FromIterator<(String, Option<String>)> for Metadata {
    fn from_iter<T: IntoIterator<Item = (String, Option<String>)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
