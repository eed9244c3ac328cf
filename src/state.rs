use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::ResourceCache;
use crate::config::AppConfig;
use crate::embedding::Embedder;
use crate::index::DocumentIndex;
use crate::llm::LanguageModel;
use crate::rag::AnswerPipeline;
use crate::session::SessionStore;
use crate::ui::Pages;

/// Services shared by every request handler.
pub struct AppState {
    pub config: AppConfig,
    /// Document indexes keyed by the uploaded file's path.
    pub indexes: ResourceCache<PathBuf, DocumentIndex>,
    pub sessions: SessionStore,
    pub pipeline: AnswerPipeline,
    pub pages: Pages,
}

impl AppState {
    /// Wire the configured embedding service and language model.
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let embedder = Arc::new(config.embedding.embedder());
        let model = Arc::new(config.llm.provider());
        Self::with_services(config, embedder, model)
    }

    pub fn with_services(
        config: AppConfig,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn LanguageModel>,
    ) -> anyhow::Result<Self> {
        let pipeline = AnswerPipeline::new(
            embedder,
            model,
            config.llm.model.clone(),
            config.retrieval.clone(),
        )?;
        let pages = Pages::new()?;
        Ok(Self {
            config,
            indexes: ResourceCache::new(),
            sessions: SessionStore::new(),
            pipeline,
            pages,
        })
    }
}
