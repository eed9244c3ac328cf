use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::Json;
use serde::Serialize;
use tracing::{info, warn};

use super::chat::TurnView;
use super::ApiError;
use crate::doc_processor::{self, SUPPORTED_EXTENSIONS};
use crate::index::DocumentIndex;
use crate::session::{DocumentStatus, SessionError, SessionStore};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub filename: String,
    pub chunk_count: usize,
    pub messages: Vec<TurnView>,
}

/// Reduce a client-supplied filename to a bare, supported file name.
fn upload_filename(original: &str) -> Result<String, ApiError> {
    let name = FsPath::new(original.trim())
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_string();
    if name.is_empty() || name.starts_with('.') {
        return Err(ApiError::BadRequest(format!("Invalid file name: {original:?}")));
    }
    if !doc_processor::is_supported(FsPath::new(&name)) {
        return Err(ApiError::BadRequest(format!(
            "Unsupported file type for '{name}' (expected one of: {})",
            SUPPORTED_EXTENSIONS.join(", ")
        )));
    }
    Ok(name)
}

/// Write the upload verbatim, replacing any earlier file of the same name.
async fn save_upload(dir: &FsPath, filename: &str, bytes: &[u8]) -> Result<PathBuf, ApiError> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(filename);
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}

/// Marks a document failed if its upload is dropped before indexing settles.
struct IndexingGuard<'a> {
    sessions: &'a SessionStore,
    session_id: &'a str,
    filename: &'a str,
    settled: bool,
}

impl<'a> IndexingGuard<'a> {
    fn start(
        sessions: &'a SessionStore,
        session_id: &'a str,
        filename: &'a str,
    ) -> Result<Self, SessionError> {
        sessions.set_status(session_id, filename, DocumentStatus::Indexing)?;
        Ok(Self {
            sessions,
            session_id,
            filename,
            settled: false,
        })
    }

    fn settle(mut self, status: DocumentStatus) -> Result<(), SessionError> {
        self.settled = true;
        self.sessions.set_status(self.session_id, self.filename, status)
    }
}

impl Drop for IndexingGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!(session = %self.session_id, file = %self.filename, "Upload dropped while indexing");
        let interrupted = DocumentStatus::Failed("upload was interrupted before indexing finished".into());
        // The session may have expired meanwhile; nothing left to mark then.
        let _ = self.sessions.set_status(self.session_id, self.filename, interrupted);
    }
}

/// Accept one file, persist it, and build (or reuse) its index.
pub async fn upload_document(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    // Fail fast before reading the body into memory.
    if !state.sessions.contains(&session_id) {
        return Err(SessionError::NotFound(session_id).into());
    }

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Multipart error: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let original = field.file_name().unwrap_or("").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read file: {e}")))?;
        upload = Some((original, bytes));
        break;
    }
    let (original, bytes) = upload.ok_or_else(|| ApiError::BadRequest("No file provided".into()))?;
    let filename = upload_filename(&original)?;

    let path = save_upload(&state.config.server.upload_dir, &filename, &bytes).await?;
    info!(session = %session_id, file = %filename, bytes = bytes.len(), "Saved upload");

    let guard = IndexingGuard::start(&state.sessions, &session_id, &filename)?;

    let embedder = state.pipeline.embedder().clone();
    let build_path = path.clone();
    let built = state
        .indexes
        .get_or_build(&path, || async move {
            DocumentIndex::build(&build_path, embedder.as_ref()).await
        })
        .await;

    let index = match built {
        Ok(index) => index,
        Err(e) => {
            warn!(file = %filename, error = %e, "Index build failed");
            guard.settle(DocumentStatus::Failed(e.to_string()))?;
            return Err(ApiError::Indexing(e));
        }
    };

    guard.settle(DocumentStatus::Ready)?;
    let transcript = state.sessions.get_or_create(&session_id, &filename)?;
    let messages = transcript.lock().await.turns().iter().map(TurnView::from).collect();

    Ok(Json(UploadResponse {
        filename,
        chunk_count: index.chunk_count(),
        messages,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    use crate::commands::test_support::Harness;
    use crate::testing::ScriptedModel;

    #[test]
    fn upload_filename_strips_directories() {
        assert_eq!(upload_filename("../../etc/report.pdf").unwrap(), "report.pdf");
        assert_eq!(upload_filename("C:/docs/My Paper.PDF").unwrap(), "My Paper.PDF");
        assert!(upload_filename("").is_err());
        assert!(upload_filename(".pdf").is_err());
        assert!(upload_filename("slides.pptx").is_err());
    }

    #[tokio::test]
    async fn upload_builds_index_once_per_path() {
        let h = Harness::new(ScriptedModel::answering("ok"));
        let session = h.open_session().await;

        let (status, body) = h.upload(&session, "guide.txt", "alpha beta gamma".as_bytes()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["filename"], "guide.txt");
        assert_eq!(body["chunk_count"], 1);
        assert_eq!(body["messages"].as_array().unwrap().len(), 0);

        let saved = h.state.config.server.upload_dir.join("guide.txt");
        assert_eq!(std::fs::read_to_string(&saved).unwrap(), "alpha beta gamma");
        let first = h.state.indexes.get(&saved).unwrap();

        // Second upload of the same name, from another session, reuses the cached index.
        let other = h.open_session().await;
        let (status, _) = h.upload(&other, "guide.txt", "alpha beta gamma".as_bytes()).await;
        assert_eq!(status, StatusCode::OK);
        let second = h.state.indexes.get(&saved).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(h.embedder.calls(), 1);
        assert_eq!(h.state.indexes.len(), 1);
    }

    #[tokio::test]
    async fn corrupt_pdf_reports_error_and_caches_nothing() {
        let h = Harness::new(ScriptedModel::answering("ok"));
        let session = h.open_session().await;

        let (status, body) = h.upload(&session, "broken.pdf", b"definitely not a pdf").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let error = body["error"].as_str().unwrap();
        assert!(error.starts_with("Failed to build index: PDF parse error"), "{error}");

        let saved = h.state.config.server.upload_dir.join("broken.pdf");
        assert!(h.state.indexes.get(&saved).is_none());
        assert!(h.state.indexes.is_empty());

        let status = h.state.sessions.status(&session, "broken.pdf").unwrap();
        assert!(matches!(status, Some(DocumentStatus::Failed(_))));
        assert_eq!(h.state.sessions.view(&session).unwrap().state, crate::session::SessionState::Failed);
    }

    #[tokio::test]
    async fn unsupported_upload_is_rejected() {
        let h = Harness::new(ScriptedModel::answering("ok"));
        let session = h.open_session().await;

        let (status, body) = h.upload(&session, "sheet.xlsx", b"cells").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("Unsupported file type"));
        assert!(!h.dir.path().join("uploads").join("sheet.xlsx").exists());
    }

    #[test]
    fn dropped_indexing_marks_document_failed() {
        let store = SessionStore::new();
        let session = store.open();

        let guard = IndexingGuard::start(&store, &session, "a.pdf").unwrap();
        assert_eq!(store.status(&session, "a.pdf").unwrap(), Some(DocumentStatus::Indexing));
        drop(guard);
        assert!(matches!(
            store.status(&session, "a.pdf").unwrap(),
            Some(DocumentStatus::Failed(reason)) if reason.contains("interrupted")
        ));

        let guard = IndexingGuard::start(&store, &session, "b.pdf").unwrap();
        guard.settle(DocumentStatus::Ready).unwrap();
        assert_eq!(store.status(&session, "b.pdf").unwrap(), Some(DocumentStatus::Ready));
    }

    #[tokio::test]
    async fn upload_to_unknown_session_is_404() {
        let h = Harness::new(ScriptedModel::answering("ok"));
        let (status, _) = h.upload("nobody", "guide.txt", b"text").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
