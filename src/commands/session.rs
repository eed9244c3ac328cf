use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use tracing::info;

use super::ApiError;
use crate::session::SessionView;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SessionOpened {
    pub session_id: String,
}

pub async fn open_session(State(state): State<Arc<AppState>>) -> Json<SessionOpened> {
    let session_id = state.sessions.open();
    info!(session = %session_id, "Opened session");
    Json(SessionOpened { session_id })
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    Ok(Json(state.sessions.view(&session_id)?))
}
