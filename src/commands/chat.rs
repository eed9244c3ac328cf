use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::ApiError;
use crate::db::models::ScoredChunk;
use crate::session::{DocumentStatus, Role, Turn};
use crate::state::AppState;
use crate::ui::render_markdown;

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub content: String,
}

/// A transcript turn as the browser renders it.
#[derive(Debug, Serialize)]
pub struct TurnView {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub html: String,
    pub is_error: bool,
}

impl From<&Turn> for TurnView {
    fn from(turn: &Turn) -> Self {
        Self {
            id: turn.id.clone(),
            role: turn.role,
            content: turn.content.clone(),
            html: render_markdown(&turn.content),
            is_error: turn.is_error,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub user: TurnView,
    pub assistant: TurnView,
    pub sources: Vec<ScoredChunk>,
}

pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path((session_id, filename)): Path<(String, String)>,
) -> Result<Json<Vec<TurnView>>, ApiError> {
    let transcript = state
        .sessions
        .transcript(&session_id, &filename)?
        .ok_or(ApiError::DocumentNotFound(filename))?;
    let turns = transcript.lock().await.turns().iter().map(TurnView::from).collect();
    Ok(Json(turns))
}

/// Answer one question about an indexed document and record both turns.
pub async fn ask(
    State(state): State<Arc<AppState>>,
    Path((session_id, filename)): Path<(String, String)>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let question = request.content.trim();
    if question.is_empty() {
        return Err(ApiError::BadRequest("Question must not be empty".into()));
    }

    let not_ready = |reason: &str| ApiError::NotReady {
        filename: filename.clone(),
        reason: reason.to_string(),
    };
    match state.sessions.status(&session_id, &filename)? {
        Some(DocumentStatus::Ready) => {}
        Some(DocumentStatus::Indexing) => return Err(not_ready("indexing in progress")),
        Some(DocumentStatus::Failed(reason)) => return Err(not_ready(&reason)),
        None => return Err(ApiError::DocumentNotFound(filename.clone())),
    }

    let path = state.config.server.upload_dir.join(&filename);
    let index = state
        .indexes
        .get(&path)
        .ok_or_else(|| not_ready("no index is cached for this file"))?;

    let transcript = state.sessions.get_or_create(&session_id, &filename)?;
    // Held across the answer so concurrent questions land in request order. Both turns are
    // appended only once the answer is in, so a dropped request leaves the transcript untouched.
    let mut transcript = transcript.lock().await;
    let outcome = state.pipeline.answer(question, &index, transcript.turns()).await;

    let (reply, is_error, sources) = match outcome {
        Ok(answer) => {
            info!(file = %filename, sources = answer.sources.len(), "Answered question");
            (answer.content, false, answer.sources)
        }
        Err(e) => {
            warn!(file = %filename, error = %e, "Answer pipeline failed");
            (format!("Error while answering: {e}"), true, Vec::new())
        }
    };
    let user = transcript.push(Role::User, question, false);
    let assistant = transcript.push(Role::Assistant, reply, is_error);

    Ok(Json(AskResponse {
        user: TurnView::from(&user),
        assistant: TurnView::from(&assistant),
        sources,
    }))
}
