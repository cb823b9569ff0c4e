use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::db::{LocalStorage, SearchContext};
use crate::document::{note_schema, GenericDocument};
use crate::error::{NoteError, Result};
use crate::scope::TaskScope;
use crate::session::{RankingStrategy, SearchSession, SearchSpec, SetSchemaRequest};
use crate::types::{Note, NoteSearchResult};

/// Name of the on-device database holding notes.
pub const DATABASE_NAME: &str = "notesDatabase";

/// Results returned by one query.
pub const PAGE_SIZE: usize = 10;

/// Results per query that carry highlighting metadata.
pub const SNIPPET_COUNT: usize = 10;

/// Written once by the session task: Pending, then Ready or Failed.
#[derive(Clone)]
enum InitState {
    Pending,
    Ready(Arc<dyn SearchSession>),
    Failed(String),
}

/// Closes the session exactly once, however the owning task ends.
struct CloseOnDrop(Arc<dyn SearchSession>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
        tracing::info!("Note search session released");
    }
}

/// Owns the note index session for the lifetime of a [`TaskScope`].
///
/// The session is opened and the [`Note`] schema registered in a background
/// task. Every operation waits for that to finish first; calls made while it
/// is still running simply queue up on the same readiness signal.
pub struct NoteSearchManager {
    state: watch::Receiver<InitState>,
}

impl NoteSearchManager {
    /// Start opening a session with `open` inside `scope`. The session is
    /// closed when the scope is cancelled.
    pub fn start<F>(open: F, scope: &TaskScope) -> Self
    where
        F: Future<Output = Result<Arc<dyn SearchSession>>> + Send + 'static,
    {
        let (tx, rx) = watch::channel(InitState::Pending);
        scope.spawn_tracked(run_session(open, tx, scope.token()));
        Self { state: rx }
    }

    /// Session over a file-backed [`LocalStorage`].
    pub fn open_local(context: SearchContext, scope: &TaskScope) -> Self {
        Self::start(
            async move {
                let storage = LocalStorage::open(context).await?;
                Ok::<_, NoteError>(Arc::new(storage) as Arc<dyn SearchSession>)
            },
            scope,
        )
    }

    /// Session over an in-memory [`LocalStorage`].
    pub fn open_in_memory(scope: &TaskScope) -> Self {
        Self::start(
            async {
                let storage = LocalStorage::open_in_memory().await?;
                Ok::<_, NoteError>(Arc::new(storage) as Arc<dyn SearchSession>)
            },
            scope,
        )
    }

    pub fn is_initialized(&self) -> bool {
        matches!(*self.state.borrow(), InitState::Ready(_))
    }

    /// Wait for initialization and hand out the session.
    async fn session(&self) -> Result<Arc<dyn SearchSession>> {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(|s| !matches!(s, InitState::Pending))
            .await
            .map_err(|_| {
                NoteError::Initialization("session task ended before the index was ready".into())
            })?;
        match &*state {
            InitState::Ready(session) => Ok(Arc::clone(session)),
            InitState::Failed(reason) => Err(NoteError::Initialization(reason.clone())),
            InitState::Pending => Err(NoteError::Initialization("index not ready".into())),
        }
    }

    /// Insert `note`, replacing any note with the same identity.
    pub async fn add_note(&self, note: &Note) -> Result<()> {
        let session = self.session().await?;
        let batch = session.put(vec![GenericDocument::from(note)]).await?;
        batch.into_result()
    }

    /// Most recently created notes matching `query`, at most [`PAGE_SIZE`].
    /// An empty query returns every note.
    pub async fn query_notes(&self, query: &str) -> Result<Vec<NoteSearchResult>> {
        let session = self.session().await?;
        let spec = SearchSpec::default()
            .with_ranking_strategy(RankingStrategy::CreationTimestamp)
            .with_result_count_per_page(PAGE_SIZE)
            .with_snippet_count(SNIPPET_COUNT);
        let mut results = session.search(query, spec).await?;
        results
            .next_page()
            .await?
            .into_iter()
            .map(|r| {
                Ok(NoteSearchResult {
                    note: Note::try_from(&r.document)?,
                    creation_timestamp_millis: r.document.creation_timestamp_millis,
                    matches: r.match_infos,
                })
            })
            .collect()
    }

    /// Delete the note with this identity. Fails if there is none.
    pub async fn remove_note(&self, namespace: &str, id: &str) -> Result<()> {
        let session = self.session().await?;
        let batch = session.remove(namespace, vec![id.to_string()]).await?;
        batch.into_result()
    }
}

async fn run_session<F>(open: F, tx: watch::Sender<InitState>, cancel: CancellationToken)
where
    F: Future<Output = Result<Arc<dyn SearchSession>>> + Send + 'static,
{
    let session = tokio::select! {
        _ = cancel.cancelled() => return,
        opened = open => match opened {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("Failed to open note search session: {e}");
                tx.send_replace(InitState::Failed(e.to_string()));
                return;
            }
        },
    };
    let _close = CloseOnDrop(Arc::clone(&session));

    let registered = tokio::select! {
        _ = cancel.cancelled() => return,
        r = session.set_schema(SetSchemaRequest::new().add_schema(note_schema())) => r,
    };
    if let Err(e) = registered {
        tracing::warn!("Failed to register note schema: {e}");
        tx.send_replace(InitState::Failed(e.to_string()));
        return;
    }

    tracing::info!("Note search session ready");
    tx.send_replace(InitState::Ready(session));
    cancel.cancelled().await;
}
