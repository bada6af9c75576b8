use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A trimmed, non-empty search query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query(String);

impl Query {
    /// Trims the raw field value. Returns `None` when nothing is left, which
    /// means "no query" rather than a search for the empty string.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub slug: String,
    pub text: String,
}

/// One category of suggestions. `url` is a path prefix without the leading
/// slash; each item's slug is appended to it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Category {
    pub url: String,
    pub list: Vec<Item>,
}

impl Category {
    pub fn href(&self, item: &Item) -> String {
        format!("/{}{}", self.url, item.slug)
    }
}

/// Categories keyed by display name, in the order the server sent them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultSet(IndexMap<String, Category>);

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Category)> {
        self.0.iter().map(|(name, category)| (name.as_str(), category))
    }

    /// Categories that have at least one item.
    pub fn non_empty(&self) -> impl Iterator<Item = (&str, &Category)> {
        self.iter().filter(|(_, category)| !category.list.is_empty())
    }

    pub fn total_items(&self) -> usize {
        self.0.values().map(|category| category.list.len()).sum()
    }

    pub fn category_count(&self) -> usize {
        self.0.len()
    }
}

impl<N: Into<String>> FromIterator<(N, Category)> for ResultSet {
    fn from_iter<T: IntoIterator<Item = (N, Category)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, category)| (name.into(), category))
                .collect(),
        )
    }
}

/// Body returned by the search endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: ResultSet,
}
