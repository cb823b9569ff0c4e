use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Namespace every user-created note lives in.
pub const DEFAULT_NAMESPACE: &str = "user";

/// A user-created note. Identity is `(namespace, id)`; only `text` is indexed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Note {
    pub namespace: String,
    pub id: String,
    pub text: String,
}

impl Note {
    /// Note in the default namespace.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            id: id.into(),
            text: text.into(),
        }
    }

    /// Note with a freshly generated UUID v4 id.
    pub fn with_generated_id(text: impl Into<String>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), text)
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn same_identity(&self, other: &Note) -> bool {
        self.namespace == other.namespace && self.id == other.id
    }
}

/// Byte range into a property's text. Always lies on `char` boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRange {
    pub start: usize,
    pub end: usize,
}

impl MatchRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn as_range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Snippet metadata for one matched term in one property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchInfo {
    /// Property the match was found in, e.g. `"text"`.
    pub property_path: String,
    /// Full text of that property.
    pub full_text: String,
    /// The whole token that matched.
    pub exact_match_range: MatchRange,
    /// The part of the token covered by the query term.
    pub submatch_range: MatchRange,
}

impl MatchInfo {
    pub fn exact_match(&self) -> &str {
        self.full_text
            .get(self.exact_match_range.as_range())
            .unwrap_or_default()
    }

    pub fn submatch(&self) -> &str {
        self.full_text
            .get(self.submatch_range.as_range())
            .unwrap_or_default()
    }
}

/// A matched note plus where it matched. Rebuilt for every query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteSearchResult {
    pub note: Note,
    /// Creation time in the index (Unix ms).
    pub creation_timestamp_millis: i64,
    pub matches: Vec<MatchInfo>,
}
