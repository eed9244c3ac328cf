use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Turn {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub is_error: bool,
}

/// Chat history for one uploaded document. Turns are only ever appended.
#[derive(Debug, Default)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn push(&mut self, role: Role, content: impl Into<String>, is_error: bool) -> Turn {
        let turn = Turn {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            is_error,
        };
        self.turns.push(turn.clone());
        turn
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Held for the whole of a question so turns land in request order.
pub type SharedTranscript = Arc<tokio::sync::Mutex<Transcript>>;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", content = "error", rename_all = "lowercase")]
pub enum DocumentStatus {
    Indexing,
    Ready,
    Failed(String),
}

/// Where a session stands with respect to its active document.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Indexing,
    Ready,
    Failed,
}

#[derive(Debug, Serialize)]
pub struct DocumentView {
    pub filename: String,
    #[serde(flatten)]
    pub status: DocumentStatus,
    pub turns: usize,
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub state: SessionState,
    pub active_document: Option<String>,
    pub documents: Vec<DocumentView>,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),
}

struct DocumentEntry {
    status: DocumentStatus,
    transcript: SharedTranscript,
}

struct Session {
    active: Option<String>,
    documents: BTreeMap<String, DocumentEntry>,
    last_seen: Instant,
}

impl Session {
    fn new() -> Self {
        Self {
            active: None,
            documents: BTreeMap::new(),
            last_seen: Instant::now(),
        }
    }

    fn entry(&mut self, filename: &str) -> &mut DocumentEntry {
        self.documents
            .entry(filename.to_string())
            .or_insert_with(|| DocumentEntry {
                status: DocumentStatus::Indexing,
                transcript: SharedTranscript::default(),
            })
    }
}

/// Per-browser-session transcripts and document statuses, keyed by filename.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_session<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut Session) -> T,
    ) -> Result<T, SessionError> {
        let mut sessions = self.lock();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        session.last_seen = Instant::now();
        Ok(f(session))
    }

    /// Start a new session and return its id.
    pub fn open(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.lock().insert(id.clone(), Session::new());
        id
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.lock().contains_key(session_id)
    }

    /// Drop sessions untouched for at least `max_idle`. Returns how many were removed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, session| session.last_seen.elapsed() < max_idle);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// The transcript for `filename` in this session, created empty on first use.
    pub fn get_or_create(
        &self,
        session_id: &str,
        filename: &str,
    ) -> Result<SharedTranscript, SessionError> {
        self.with_session(session_id, |session| session.entry(filename).transcript.clone())
    }

    /// The transcript for `filename` if the document was ever uploaded in this session.
    pub fn transcript(
        &self,
        session_id: &str,
        filename: &str,
    ) -> Result<Option<SharedTranscript>, SessionError> {
        self.with_session(session_id, |session| {
            session.documents.get(filename).map(|d| d.transcript.clone())
        })
    }

    /// Record `status` for `filename`; an upload (`Indexing`) also makes it the active document.
    pub fn set_status(
        &self,
        session_id: &str,
        filename: &str,
        status: DocumentStatus,
    ) -> Result<(), SessionError> {
        self.with_session(session_id, |session| {
            if status == DocumentStatus::Indexing {
                session.active = Some(filename.to_string());
            }
            session.entry(filename).status = status;
        })
    }

    pub fn status(
        &self,
        session_id: &str,
        filename: &str,
    ) -> Result<Option<DocumentStatus>, SessionError> {
        self.with_session(session_id, |session| {
            session.documents.get(filename).map(|d| d.status.clone())
        })
    }

    pub fn view(&self, session_id: &str) -> Result<SessionView, SessionError> {
        self.with_session(session_id, |session| {
            let state = match session.active.as_ref().and_then(|f| session.documents.get(f)) {
                None => SessionState::Idle,
                Some(entry) => match entry.status {
                    DocumentStatus::Indexing => SessionState::Indexing,
                    DocumentStatus::Ready => SessionState::Ready,
                    DocumentStatus::Failed(_) => SessionState::Failed,
                },
            };
            let documents = session
                .documents
                .iter()
                .map(|(filename, entry)| DocumentView {
                    filename: filename.clone(),
                    status: entry.status.clone(),
                    // A transcript busy answering a question is reported as empty.
                    turns: entry.transcript.try_lock().map(|t| t.len()).unwrap_or(0),
                })
                .collect();
            SessionView {
                session_id: session_id.to_string(),
                state,
                active_document: session.active.clone(),
                documents,
            }
        })
    }
}
