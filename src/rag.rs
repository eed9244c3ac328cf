use std::sync::Arc;

use minijinja::{context, Environment};
use serde::Serialize;
use tracing::{debug, info};

use crate::db::models::ScoredChunk;
use crate::embedding::Embedder;
use crate::index::{DocumentIndex, IndexError};
use crate::llm::{ChatMessage, ChatRequest, LanguageModel, LlmError};
use crate::session::{Role, Turn};

/// Returned verbatim when retrieval finds nothing to answer from.
pub const FALLBACK_ANSWER: &str = "I don't know";

const PROMPT_TEMPLATE: &str = "\
You are a question-answering assistant. Use the material below to answer the question.
Please answer only from the supplied material; if unknown, answer 'I don't know'.

Material:
{{ context }}

Question:
{{ question }}
";

#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error("Retrieval failed: {0}")]
    Retrieval(#[from] IndexError),
    #[error("Model call failed: {0}")]
    Model(#[from] LlmError),
    #[error("Prompt template error: {0}")]
    Template(#[from] minijinja::Error),
}

#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub min_score: Option<f32>,
    /// Prior turns forwarded to the model; zero answers every question on its own.
    pub history_turns: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 4,
            min_score: None,
            history_turns: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub content: String,
    pub sources: Vec<ScoredChunk>,
}

/// Retrieve, fill the prompt template, ask the model.
pub struct AnswerPipeline {
    embedder: Arc<dyn Embedder>,
    model: Arc<dyn LanguageModel>,
    model_name: String,
    settings: RetrievalSettings,
    templates: Environment<'static>,
}

impl AnswerPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn LanguageModel>,
        model_name: impl Into<String>,
        settings: RetrievalSettings,
    ) -> Result<Self, RagError> {
        let mut templates = Environment::new();
        templates.add_template("answer", PROMPT_TEMPLATE)?;
        Ok(Self {
            embedder,
            model,
            model_name: model_name.into(),
            settings,
            templates,
        })
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn render_prompt(&self, sources: &[ScoredChunk], question: &str) -> Result<String, RagError> {
        let material = sources
            .iter()
            .map(|s| s.chunk.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = self
            .templates
            .get_template("answer")?
            .render(context! { context => material, question => question })?;
        Ok(prompt)
    }

    /// Chunks relevant to `question`, after the optional score floor.
    pub async fn retrieve(
        &self,
        index: &DocumentIndex,
        question: &str,
    ) -> Result<Vec<ScoredChunk>, RagError> {
        let mut hits = index
            .search(self.embedder.as_ref(), question, self.settings.top_k)
            .await?;
        if let Some(floor) = self.settings.min_score {
            hits.retain(|hit| hit.score >= floor);
        }
        Ok(hits)
    }

    /// Answer `question` from `index`. `history` is the transcript before this question.
    pub async fn answer(
        &self,
        question: &str,
        index: &DocumentIndex,
        history: &[Turn],
    ) -> Result<Answer, RagError> {
        let sources = self.retrieve(index, question).await?;
        if sources.is_empty() {
            info!("No relevant material in {} for question", index.path().display());
            return Ok(Answer {
                content: FALLBACK_ANSWER.to_string(),
                sources,
            });
        }

        let prompt = self.render_prompt(&sources, question)?;
        debug!(chunks = sources.len(), "Rendered prompt");

        let mut messages = self.history_messages(history);
        messages.push(ChatMessage::user(prompt));
        let request = ChatRequest {
            messages,
            model: self.model_name.clone(),
        };

        let response = self.model.chat(&request).await?;
        Ok(Answer {
            content: response.content,
            sources,
        })
    }

    fn history_messages(&self, history: &[Turn]) -> Vec<ChatMessage> {
        if self.settings.history_turns == 0 {
            return Vec::new();
        }
        let usable: Vec<&Turn> = history.iter().filter(|t| !t.is_error).collect();
        let skip = usable.len().saturating_sub(self.settings.history_turns);
        let window = &usable[skip..];
        // Chat APIs expect the conversation to open with a user message.
        let first_user = window
            .iter()
            .position(|t| t.role == Role::User)
            .unwrap_or(window.len());
        window[first_user..]
            .iter()
            .map(|t| ChatMessage {
                role: t.role.as_str().to_string(),
                content: t.content.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Transcript;
    use crate::testing::{LetterEmbedder, ScriptedModel};
    use std::path::Path;

    async fn index_of(chunks: &[&str]) -> DocumentIndex {
        let chunks: Vec<String> = chunks.iter().map(|c| c.to_string()).collect();
        let embeddings = LetterEmbedder::default().embed(&chunks).await.unwrap();
        DocumentIndex::from_parts(Path::new("doc.pdf"), chunks, embeddings).unwrap()
    }

    fn pipeline(model: Arc<ScriptedModel>, settings: RetrievalSettings) -> AnswerPipeline {
        AnswerPipeline::new(Arc::new(LetterEmbedder::default()), model, "deepseek-chat", settings).unwrap()
    }

    #[test]
    fn prompt_carries_instruction_material_and_question() {
        let p = pipeline(Arc::new(ScriptedModel::answering("x")), RetrievalSettings::default());
        let sources = vec![ScoredChunk {
            chunk: crate::db::models::Chunk {
                chunk_index: 0,
                content: "Rust was first released in 2015.".into(),
            },
            score: 0.9,
        }];
        let prompt = p.render_prompt(&sources, "When was Rust released?").unwrap();
        assert!(prompt.contains("answer only from the supplied material; if unknown, answer 'I don't know'"));
        assert!(prompt.contains("Rust was first released in 2015."));
        assert!(prompt.contains("When was Rust released?"));
    }

    #[tokio::test]
    async fn answers_with_model_output_and_sources() {
        let model = Arc::new(ScriptedModel::answering("In 2015."));
        let p = pipeline(model.clone(), RetrievalSettings::default());
        let index = index_of(&["rust release", "unrelated zebra"]).await;

        let answer = p.answer("rust", &index, &[]).await.unwrap();
        assert_eq!(answer.content, "In 2015.");
        assert_eq!(answer.sources.len(), 2);

        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, "deepseek-chat");
        assert_eq!(requests[0].messages.len(), 1);
        assert!(requests[0].messages[0].content.contains("rust release"));
    }

    #[tokio::test]
    async fn empty_retrieval_falls_back_without_model_call() {
        let model = Arc::new(ScriptedModel::answering("should not be used"));
        let settings = RetrievalSettings {
            min_score: Some(0.99),
            ..Default::default()
        };
        let p = pipeline(model.clone(), settings);
        let index = index_of(&["aaaa bbbb"]).await;

        let answer = p.answer("zzz", &index, &[]).await.unwrap();
        assert_eq!(answer.content, FALLBACK_ANSWER);
        assert!(answer.sources.is_empty());
        assert!(model.requests().is_empty());
    }

    #[tokio::test]
    async fn history_is_ignored_by_default() {
        let model = Arc::new(ScriptedModel::answering("ok"));
        let p = pipeline(model.clone(), RetrievalSettings::default());
        let index = index_of(&["some text"]).await;

        let mut transcript = Transcript::default();
        transcript.push(Role::User, "earlier question", false);
        transcript.push(Role::Assistant, "earlier answer", false);

        p.answer("text", &index, transcript.turns()).await.unwrap();
        assert_eq!(model.requests()[0].messages.len(), 1);
    }

    #[tokio::test]
    async fn history_turns_are_forwarded_when_enabled() {
        let model = Arc::new(ScriptedModel::answering("ok"));
        let settings = RetrievalSettings {
            history_turns: 2,
            ..Default::default()
        };
        let p = pipeline(model.clone(), settings);
        let index = index_of(&["some text"]).await;

        let mut transcript = Transcript::default();
        transcript.push(Role::User, "q1", false);
        transcript.push(Role::Assistant, "Error while answering: timeout", true);
        transcript.push(Role::User, "q2", false);
        transcript.push(Role::Assistant, "a2", false);

        p.answer("text", &index, transcript.turns()).await.unwrap();
        let messages = &model.requests()[0].messages;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, "q2");
        assert_eq!(messages[1].role, "assistant");
        assert_eq!(messages[2].role, "user");
    }

    #[tokio::test]
    async fn odd_history_window_starts_with_user() {
        let model = Arc::new(ScriptedModel::answering("ok"));
        let settings = RetrievalSettings {
            history_turns: 3,
            ..Default::default()
        };
        let p = pipeline(model.clone(), settings);
        let index = index_of(&["some text"]).await;

        let mut transcript = Transcript::default();
        for i in 1..=2 {
            transcript.push(Role::User, format!("q{i}"), false);
            transcript.push(Role::Assistant, format!("a{i}"), false);
        }

        p.answer("text", &index, transcript.turns()).await.unwrap();
        let messages = &model.requests()[0].messages;
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["user", "assistant", "user"]);
        assert_eq!(messages[0].content, "q2");
    }

    #[tokio::test]
    async fn single_turn_window_drops_a_lone_answer() {
        let model = Arc::new(ScriptedModel::answering("ok"));
        let settings = RetrievalSettings {
            history_turns: 1,
            ..Default::default()
        };
        let p = pipeline(model.clone(), settings);
        let index = index_of(&["some text"]).await;

        let mut transcript = Transcript::default();
        transcript.push(Role::User, "q1", false);
        transcript.push(Role::Assistant, "a1", false);

        p.answer("text", &index, transcript.turns()).await.unwrap();
        assert_eq!(model.requests()[0].messages.len(), 1);
    }

    #[tokio::test]
    async fn model_failure_surfaces_as_error() {
        let p = pipeline(Arc::new(ScriptedModel::failing(503)), RetrievalSettings::default());
        let index = index_of(&["some text"]).await;

        let err = p.answer("text", &index, &[]).await.unwrap_err();
        assert!(matches!(err, RagError::Model(LlmError::Api { status: 503, .. })));
    }
}
