//! The index interface the rest of the crate consumes.
//!
//! A [`SearchSession`] is an open handle to one named database. It accepts a
//! schema once, then stores, searches and removes [`GenericDocument`]s.
//! [`crate::db::LocalStorage`] is the on-device implementation; tests swap in
//! fakes to script failures.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::document::{GenericDocument, Schema};
use crate::error::{NoteError, Result};
use crate::types::MatchInfo;

/// Results per page when the caller does not say otherwise.
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Upper bound on snippets reported per property of one document.
pub const DEFAULT_MAX_SNIPPETS_PER_PROPERTY: usize = 10_000;

/// Why a single document in a batch was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    NotFound,
    InvalidArgument,
    Internal,
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::Internal => write!(f, "internal error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationFailure {
    pub code: ResultCode,
    pub message: String,
}

/// Per-id outcome of a put or remove.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub successes: Vec<String>,
    pub failures: BTreeMap<String, OperationFailure>,
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn record_success(&mut self, id: impl Into<String>) {
        self.successes.push(id.into());
    }

    pub fn record_failure(&mut self, id: impl Into<String>, code: ResultCode, message: impl Into<String>) {
        self.failures.insert(
            id.into(),
            OperationFailure {
                code,
                message: message.into(),
            },
        );
    }

    /// Turns the first failure into an error.
    pub fn into_result(self) -> Result<()> {
        match self.failures.into_iter().next() {
            None => Ok(()),
            Some((id, failure)) => Err(NoteError::Operation {
                id,
                code: failure.code,
                message: failure.message,
            }),
        }
    }
}

/// Full replacement of the database's schema set.
#[derive(Debug, Clone, Default)]
pub struct SetSchemaRequest {
    pub schemas: Vec<Schema>,
    /// Drop documents whose type changed incompatibly instead of failing.
    pub force_override: bool,
}

impl SetSchemaRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_schema(mut self, schema: Schema) -> Self {
        self.schemas.push(schema);
        self
    }

    pub fn force_override(mut self, force: bool) -> Self {
        self.force_override = force;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingStrategy {
    /// Insertion order, oldest first.
    #[default]
    None,
    /// Most recently created first.
    CreationTimestamp,
}

#[derive(Debug, Clone)]
pub struct SearchSpec {
    pub ranking_strategy: RankingStrategy,
    pub result_count_per_page: usize,
    /// How many results at the top of each page carry match info.
    pub snippet_count: usize,
    pub max_snippets_per_property: usize,
    /// Restrict to these namespaces. Empty means all.
    pub namespaces: Vec<String>,
}

impl Default for SearchSpec {
    fn default() -> Self {
        Self {
            ranking_strategy: RankingStrategy::None,
            result_count_per_page: DEFAULT_PAGE_SIZE,
            snippet_count: 0,
            max_snippets_per_property: DEFAULT_MAX_SNIPPETS_PER_PROPERTY,
            namespaces: Vec::new(),
        }
    }
}

impl SearchSpec {
    pub fn with_ranking_strategy(mut self, strategy: RankingStrategy) -> Self {
        self.ranking_strategy = strategy;
        self
    }

    pub fn with_result_count_per_page(mut self, count: usize) -> Self {
        self.result_count_per_page = count.max(1);
        self
    }

    pub fn with_snippet_count(mut self, count: usize) -> Self {
        self.snippet_count = count;
        self
    }

    pub fn with_max_snippets_per_property(mut self, count: usize) -> Self {
        self.max_snippets_per_property = count;
        self
    }

    pub fn add_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespaces.push(namespace.into());
        self
    }
}

/// One document returned by a search, with its snippets (if any were requested).
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub document: GenericDocument,
    pub match_infos: Vec<MatchInfo>,
}

/// Pager over the results of one search. Returns an empty page once exhausted.
#[async_trait]
pub trait SearchResults: Send {
    async fn next_page(&mut self) -> Result<Vec<SearchResult>>;
}

/// An open handle to a named index database.
#[async_trait]
pub trait SearchSession: Send + Sync {
    async fn set_schema(&self, request: SetSchemaRequest) -> Result<()>;

    /// Inserts or replaces documents by `(namespace, id)`.
    async fn put(&self, documents: Vec<GenericDocument>) -> Result<BatchResult>;

    /// Runs `query` against all indexed properties. An empty query matches
    /// every stored document.
    async fn search(&self, query: &str, spec: SearchSpec) -> Result<Box<dyn SearchResults>>;

    async fn remove(&self, namespace: &str, ids: Vec<String>) -> Result<BatchResult>;

    /// Releases the underlying resources. Later calls fail with
    /// [`NoteError::SessionClosed`].
    fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_result_reports_first_failure() {
        let mut batch = BatchResult::default();
        batch.record_success("a");
        assert!(batch.is_success());
        batch.record_failure("b", ResultCode::NotFound, "no such document");

        match batch.into_result() {
            Err(NoteError::Operation { id, code, .. }) => {
                assert_eq!(id, "b");
                assert_eq!(code, ResultCode::NotFound);
            }
            other => panic!("expected operation failure, got {other:?}"),
        }
    }

    #[test]
    fn page_size_never_drops_to_zero() {
        let spec = SearchSpec::default().with_result_count_per_page(0);
        assert_eq!(spec.result_count_per_page, 1);
    }
}
