pub mod cache;
pub mod commands;
pub mod config;
pub mod db;
pub mod doc_processor;
pub mod embedding;
pub mod index;
pub mod llm;
pub mod rag;
pub mod session;
pub mod state;
pub mod ui;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use commands::{chat, documents, session as session_api};
use config::AppConfig;
use state::AppState;

/// Routes for the page, the JSON API, and health checks.
pub fn app(state: Arc<AppState>) -> Router {
    let body_limit = state.config.server.max_upload_bytes;
    Router::new()
        .route("/", get(ui::index_page))
        .route("/health", get(ui::health))
        .route("/api/sessions", post(session_api::open_session))
        .route("/api/sessions/{session_id}", get(session_api::get_session))
        .route(
            "/api/sessions/{session_id}/documents",
            post(documents::upload_document),
        )
        .route(
            "/api/sessions/{session_id}/documents/{filename}/messages",
            get(chat::list_messages).post(chat::ask),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Periodically drop sessions that have been idle longer than the configured timeout.
pub fn spawn_session_sweeper(state: Arc<AppState>) -> JoinHandle<()> {
    let max_idle = state.config.server.session_idle;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_SWEEP_INTERVAL.min(max_idle));
        loop {
            interval.tick().await;
            let removed = state.sessions.evict_idle(max_idle);
            if removed > 0 {
                info!("Expired {} idle session(s)", removed);
            } else {
                debug!("Session sweep: nothing to expire");
            }
        }
    })
}

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    config.log_summary();
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::new(config)?);
    spawn_session_sweeper(state.clone());

    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on http://{addr}");
    axum::serve(listener, app(state)).await?;
    Ok(())
}
