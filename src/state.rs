use std::sync::Arc;

use crate::blob::BlobStore;
use crate::prescription::AnalysisClient;
use crate::session::SessionRegistry;
use crate::store::DocumentStore;

/// Shared handles passed to every router.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub analysis: Arc<AnalysisClient>,
    pub sessions: Arc<SessionRegistry>,
}

#[cfg(test)]
pub fn test_state() -> (AppState, tempfile::TempDir) {
    use std::time::Duration;

    use crate::blob::LocalBlobStore;
    use crate::reminder::testing::RecordingNotifier;
    use crate::store::MemoryStore;

    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let state = AppState {
        store: store.clone(),
        blobs: Arc::new(LocalBlobStore::new(dir.path(), "http://localhost:3050")),
        analysis: Arc::new(
            AnalysisClient::new("http://127.0.0.1:9/process", Duration::from_secs(1)).unwrap(),
        ),
        sessions: Arc::new(SessionRegistry::new(store, notifier)),
    };
    (state, dir)
}
