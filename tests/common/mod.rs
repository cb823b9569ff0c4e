use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use note_search::document::GenericDocument;
use note_search::manager::NoteSearchManager;
use note_search::scope::TaskScope;
use note_search::session::{
    BatchResult, ResultCode, SearchResult, SearchResults, SearchSession, SearchSpec,
    SetSchemaRequest,
};
use note_search::viewmodel::NoteViewModel;
use note_search::{Note, NoteError};

/// Session with scripted behaviour:
/// - a search starting with `"slow"` blocks until `release_slow` fires,
/// - a search containing `"broken"` fails,
/// - every other search returns one note whose id and text are the query,
/// - puts always fail.
#[derive(Default)]
pub struct ScriptedSession {
    pub slow_started: Notify,
    pub release_slow: Notify,
}

struct FixedPage(Option<Vec<SearchResult>>);

#[async_trait]
impl SearchResults for FixedPage {
    async fn next_page(&mut self) -> note_search::Result<Vec<SearchResult>> {
        Ok(self.0.take().unwrap_or_default())
    }
}

#[async_trait]
impl SearchSession for ScriptedSession {
    async fn set_schema(&self, _request: SetSchemaRequest) -> note_search::Result<()> {
        Ok(())
    }

    async fn put(&self, documents: Vec<GenericDocument>) -> note_search::Result<BatchResult> {
        let mut batch = BatchResult::default();
        for doc in documents {
            batch.record_failure(doc.id, ResultCode::Internal, "disk is read-only");
        }
        Ok(batch)
    }

    async fn search(
        &self,
        query: &str,
        _spec: SearchSpec,
    ) -> note_search::Result<Box<dyn SearchResults>> {
        if query.starts_with("slow") {
            self.slow_started.notify_one();
            self.release_slow.notified().await;
        }
        if query.contains("broken") {
            return Err(NoteError::Task(format!("index crashed on {query}")));
        }
        let document = GenericDocument::from(&Note::new(query, query));
        Ok(Box::new(FixedPage(Some(vec![SearchResult {
            document,
            match_infos: Vec::new(),
        }]))))
    }

    async fn remove(&self, _namespace: &str, ids: Vec<String>) -> note_search::Result<BatchResult> {
        let mut batch = BatchResult::default();
        for id in ids {
            batch.record_success(id);
        }
        Ok(batch)
    }

    fn close(&self) {}
}

pub fn scripted_view_model(session: &Arc<ScriptedSession>) -> Arc<NoteViewModel> {
    let scope = TaskScope::new();
    let session = Arc::clone(session);
    let manager = NoteSearchManager::start(
        async move { Ok::<_, NoteError>(session as Arc<dyn SearchSession>) },
        &scope,
    );
    Arc::new(NoteViewModel::new(manager, scope))
}
