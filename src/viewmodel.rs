use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, watch};

use crate::error::Result;
use crate::manager::NoteSearchManager;
use crate::scope::TaskScope;
use crate::types::{Note, NoteSearchResult, DEFAULT_NAMESPACE};

/// Pending error messages kept for slow observers.
const ERROR_BACKLOG: usize = 16;

/// Observable note list and error messages on top of [`NoteSearchManager`].
///
/// Every add or remove is followed by a re-run of the current query, and the
/// call only returns once that re-query has settled. Queries are numbered;
/// a result is published only if no newer query was issued while it ran, so
/// a slow stale query can never overwrite a fresher list.
pub struct NoteViewModel {
    manager: NoteSearchManager,
    scope: TaskScope,
    notes: watch::Sender<Vec<NoteSearchResult>>,
    errors: broadcast::Sender<String>,
    /// Number of the latest issued query, and its text.
    latest_query: Mutex<(u64, String)>,
    in_flight: watch::Sender<usize>,
    namespace: String,
}

/// Counts one launched operation for as long as it lives.
struct InFlight(Arc<NoteViewModel>);

impl InFlight {
    fn start(vm: &Arc<NoteViewModel>) -> Self {
        vm.in_flight.send_modify(|n| *n += 1);
        Self(Arc::clone(vm))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl NoteViewModel {
    pub fn new(manager: NoteSearchManager, scope: TaskScope) -> Self {
        let (notes, _) = watch::channel(Vec::new());
        let (errors, _) = broadcast::channel(ERROR_BACKLOG);
        Self {
            manager,
            scope,
            notes,
            errors,
            latest_query: Mutex::new((0, String::new())),
            in_flight: watch::channel(0).0,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    /// Create new notes in `namespace` instead of the default one.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// View-model over an in-memory index, owning a fresh scope.
    pub fn in_memory() -> Self {
        let scope = TaskScope::new();
        let manager = NoteSearchManager::open_in_memory(&scope);
        Self::new(manager, scope)
    }

    /// Current result list; changes whenever a query settles.
    pub fn notes(&self) -> watch::Receiver<Vec<NoteSearchResult>> {
        self.notes.subscribe()
    }

    /// Transient error messages. Each subscriber sees each message once.
    pub fn errors(&self) -> broadcast::Receiver<String> {
        self.errors.subscribe()
    }

    /// Number of launched operations that have not settled yet.
    pub fn in_flight(&self) -> watch::Receiver<usize> {
        self.in_flight.subscribe()
    }

    pub fn current_notes(&self) -> Vec<NoteSearchResult> {
        self.notes.borrow().clone()
    }

    fn latest_query(&self) -> MutexGuard<'_, (u64, String)> {
        match self.latest_query.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn current_query(&self) -> String {
        self.latest_query().1.clone()
    }

    /// Record `query` as current and number it, in one step.
    fn issue_query(&self, query: &str) -> u64 {
        let mut latest = self.latest_query();
        latest.0 += 1;
        latest.1 = query.to_string();
        latest.0
    }

    /// Messages may carry note text, so they are not logged here.
    fn publish_error(&self, message: String) {
        // No subscribers is fine: nobody is showing errors right now.
        let _ = self.errors.send(message);
    }

    /// Create a note with a fresh id from `text`, then refresh the list.
    pub async fn add_note(&self, text: &str) -> Result<Note> {
        let note = Note::with_generated_id(text).in_namespace(&self.namespace);
        let added = self.manager.add_note(&note).await;
        if let Err(e) = &added {
            tracing::warn!(id = %note.id, "Failed to add note: {e}");
            self.publish_error(format!(
                "Failed to add note with id: {} and text: {}",
                note.id, note.text
            ));
        }
        self.requery().await;
        added.map(|_| note)
    }

    /// Delete a note by identity, then refresh the list.
    pub async fn remove_note(&self, namespace: &str, id: &str) -> Result<()> {
        let removed = self.manager.remove_note(namespace, id).await;
        if let Err(e) = &removed {
            tracing::warn!(namespace, id, "Failed to remove note: {e}");
            self.publish_error(format!(
                "Failed to remove note in namespace: {namespace} with id: {id}"
            ));
        }
        self.requery().await;
        removed
    }

    /// Replace the list with notes matching `query`. Empty means all notes.
    pub async fn query_notes(&self, query: &str) -> Result<()> {
        let seq = self.issue_query(query);
        let queried = self.manager.query_notes(query).await;

        // Held until published so a newer query cannot be issued in between.
        let latest = self.latest_query();
        if latest.0 != seq {
            tracing::debug!("Discarding outcome of superseded query #{seq}");
            return queried.map(|_| ());
        }
        let results = match queried {
            Ok(results) => results,
            Err(e) => {
                drop(latest);
                tracing::warn!("Failed to query notes: {e}");
                self.publish_error(format!("Failed to query notes: {e}"));
                return Err(e);
            }
        };
        tracing::debug!("Query #{seq} returned {} notes", results.len());
        self.notes.send_replace(results);
        Ok(())
    }

    async fn requery(&self) {
        let query = self.current_query();
        // Failures were already published as an error message.
        let _ = self.query_notes(&query).await;
    }

    /// Fire-and-forget variants for UI callers. Work is dropped if the
    /// scope ends first.
    pub fn launch_add_note(self: &Arc<Self>, text: impl Into<String>) {
        let vm = Arc::clone(self);
        let guard = InFlight::start(self);
        let text = text.into();
        self.scope.spawn(async move {
            let _guard = guard;
            let _ = vm.add_note(&text).await;
        });
    }

    pub fn launch_remove_note(self: &Arc<Self>, namespace: impl Into<String>, id: impl Into<String>) {
        let vm = Arc::clone(self);
        let guard = InFlight::start(self);
        let (namespace, id) = (namespace.into(), id.into());
        self.scope.spawn(async move {
            let _guard = guard;
            let _ = vm.remove_note(&namespace, &id).await;
        });
    }

    pub fn launch_query_notes(self: &Arc<Self>, query: impl Into<String>) {
        let vm = Arc::clone(self);
        let guard = InFlight::start(self);
        let query = query.into();
        self.scope.spawn(async move {
            let _guard = guard;
            let _ = vm.query_notes(&query).await;
        });
    }

    /// End the scope: in-flight work is dropped and the index session closed.
    pub async fn close(&self) {
        self.scope.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NoteError;

    #[tokio::test]
    async fn add_publishes_the_new_note() {
        let vm = NoteViewModel::in_memory();
        let mut notes = vm.notes();

        let note = vm.add_note("buy milk").await.unwrap();
        assert!(notes.has_changed().unwrap());
        let list = notes.borrow_and_update().clone();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].note, note);
        assert_eq!(note.namespace, DEFAULT_NAMESPACE);
        vm.close().await;
    }

    #[tokio::test]
    async fn failed_remove_reports_and_still_requeries() {
        let vm = NoteViewModel::in_memory();
        let mut errors = vm.errors();
        let mut notes = vm.notes();
        vm.add_note("keep me").await.unwrap();
        notes.borrow_and_update();

        let err = vm.remove_note("user", "ghost").await.unwrap_err();
        assert!(matches!(err, NoteError::Operation { .. }));
        assert_eq!(
            errors.recv().await.unwrap(),
            "Failed to remove note in namespace: user with id: ghost"
        );
        assert!(notes.has_changed().unwrap());
        assert_eq!(notes.borrow().len(), 1);
        vm.close().await;
    }

    #[tokio::test]
    async fn mutations_requery_with_the_current_query() {
        let vm = NoteViewModel::in_memory();
        vm.add_note("buy milk").await.unwrap();
        vm.query_notes("milk").await.unwrap();

        vm.add_note("walk dog").await.unwrap();
        assert_eq!(vm.current_query(), "milk");
        let list = vm.current_notes();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].note.text, "buy milk");

        vm.query_notes("").await.unwrap();
        assert_eq!(vm.current_notes().len(), 2);
        vm.close().await;
    }

    #[tokio::test]
    async fn notes_land_in_the_configured_namespace() {
        let vm = NoteViewModel::in_memory().with_namespace("work");
        let note = vm.add_note("standup at ten").await.unwrap();
        assert_eq!(note.namespace, "work");

        vm.remove_note("work", &note.id).await.unwrap();
        assert!(vm.current_notes().is_empty());
        vm.close().await;
    }

    struct LogSink(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_add_keeps_note_text_out_of_warnings() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || LogSink(Arc::clone(&sink)))
            .finish();
        let _default = tracing::subscriber::set_default(subscriber);

        let vm = NoteViewModel::in_memory();
        let mut errors = vm.errors();
        vm.close().await;
        let note_err = vm.add_note("my bank PIN is 4321").await;
        assert!(note_err.is_err());

        let message = errors.recv().await.unwrap();
        assert!(message.ends_with(" and text: my bank PIN is 4321"));

        let log = String::from_utf8(captured.lock().unwrap().clone()).unwrap();
        assert!(log.contains("Failed to add note"));
        assert!(!log.contains("4321"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn published_list_matches_the_current_query() {
        let vm = Arc::new(NoteViewModel::in_memory());
        vm.add_note("alpha").await.unwrap();
        vm.add_note("beta").await.unwrap();

        let mut handles = Vec::new();
        for i in 0..32 {
            let vm = Arc::clone(&vm);
            let query = if i % 2 == 0 { "alpha" } else { "beta" };
            handles.push(tokio::spawn(async move { vm.query_notes(query).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let list = vm.current_notes();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].note.text, vm.current_query());
        vm.close().await;
    }

    #[tokio::test]
    async fn launched_work_settles_through_observers() {
        let vm = Arc::new(NoteViewModel::in_memory());
        let mut notes = vm.notes();
        vm.launch_add_note("from the dialog");

        let mut busy = vm.in_flight();
        assert_eq!(*busy.borrow_and_update(), 1);

        notes.changed().await.unwrap();
        assert_eq!(notes.borrow()[0].note.text, "from the dialog");
        busy.wait_for(|n| *n == 0).await.unwrap();
        vm.close().await;
    }
}
