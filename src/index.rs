//! Query matching over stored documents.
//!
//! Text is split into tokens on anything that is not alphanumeric. A query
//! is a list of terms that must all match some indexed property of a
//! document (AND semantics). Matching is case-insensitive; properties
//! indexed with [`IndexingType::Prefixes`] also match when the term is a
//! prefix of a token.

use crate::document::{GenericDocument, IndexingType, Schema};
use crate::types::{MatchInfo, MatchRange};

/// A token and its byte offset in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub text: &'a str,
    pub start: usize,
}

impl Token<'_> {
    pub fn end(&self) -> usize {
        self.start + self.text.len()
    }
}

pub fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (idx, ch) in text.char_indices() {
        match (ch.is_alphanumeric(), start) {
            (true, None) => start = Some(idx),
            (false, Some(s)) => {
                tokens.push(Token { text: &text[s..idx], start: s });
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        tokens.push(Token { text: &text[s..], start: s });
    }
    tokens
}

/// Bytes of `token` covered by `term` when `term` (already lowercase) is a
/// case-insensitive prefix of it.
fn covered_prefix(token: &str, term: &str) -> Option<usize> {
    let mut term_chars = term.chars().peekable();
    for (idx, ch) in token.char_indices() {
        if term_chars.peek().is_none() {
            return Some(idx);
        }
        for lower in ch.to_lowercase() {
            match term_chars.next() {
                Some(t) if t == lower => {}
                _ => return None,
            }
        }
    }
    term_chars.peek().is_none().then_some(token.len())
}

/// Bytes of `token` that `term` hits under the given indexing type.
fn term_hit(token: &str, term: &str, indexing_type: IndexingType) -> Option<usize> {
    match indexing_type {
        IndexingType::None => None,
        IndexingType::ExactTerms => covered_prefix(token, term).filter(|&len| len == token.len()),
        IndexingType::Prefixes => covered_prefix(token, term),
    }
}

/// A parsed query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryMatcher {
    terms: Vec<String>,
}

impl QueryMatcher {
    pub fn parse(query: &str) -> Self {
        let terms = tokenize(query)
            .into_iter()
            .map(|t| t.text.to_lowercase())
            .collect();
        Self { terms }
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    /// A query with no terms matches every document.
    pub fn is_match_all(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn matches(&self, schema: &Schema, doc: &GenericDocument) -> bool {
        self.terms.iter().all(|term| {
            indexed_values(schema, doc).any(|(_, value, indexing_type)| {
                tokenize(value)
                    .iter()
                    .any(|token| term_hit(token.text, term, indexing_type).is_some())
            })
        })
    }

    /// Snippets for every token hit by any term, at most `max_per_property`
    /// per property, in property then text order.
    pub fn match_infos(
        &self,
        schema: &Schema,
        doc: &GenericDocument,
        max_per_property: usize,
    ) -> Vec<MatchInfo> {
        let mut infos = Vec::new();
        if self.is_match_all() {
            return infos;
        }
        for (path, value, indexing_type) in indexed_values(schema, doc) {
            let mut found = 0;
            for token in tokenize(value) {
                if found >= max_per_property {
                    break;
                }
                let hit = self
                    .terms
                    .iter()
                    .filter_map(|term| term_hit(token.text, term, indexing_type))
                    .max();
                if let Some(len) = hit {
                    infos.push(MatchInfo {
                        property_path: path.clone(),
                        full_text: value.to_string(),
                        exact_match_range: MatchRange::new(token.start, token.end()),
                        submatch_range: MatchRange::new(token.start, token.start + len),
                    });
                    found += 1;
                }
            }
        }
        infos
    }
}

/// `(property path, value, indexing type)` for every indexed value of `doc`.
/// Repeated values get an `[n]` suffix on their path.
fn indexed_values<'a>(
    schema: &'a Schema,
    doc: &'a GenericDocument,
) -> impl Iterator<Item = (String, &'a str, IndexingType)> + 'a {
    schema
        .properties
        .iter()
        .filter(|p| p.is_indexed())
        .filter_map(move |p| doc.properties.get(&p.name).map(|values| (p, values)))
        .flat_map(|(p, values)| {
            let repeated = values.len() > 1;
            values.iter().enumerate().map(move |(i, value)| {
                let path = if repeated {
                    format!("{}[{i}]", p.name)
                } else {
                    p.name.clone()
                };
                (path, value.as_str(), p.indexing_type)
            })
        })
}
