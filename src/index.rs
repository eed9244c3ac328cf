use std::path::{Path, PathBuf};

use tracing::info;

use crate::db::models::ScoredChunk;
use crate::db::Database;
use crate::doc_processor::{self, DocumentError, CHUNK_OVERLAP, CHUNK_SIZE};
use crate::embedding::{search_similar, Embedder};
use crate::llm::LlmError;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error("Document is empty or could not be parsed")]
    Empty,
    #[error("Embedding failed: {0}")]
    Embedding(#[from] LlmError),
    #[error("Chunk store error: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("Text extraction aborted: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Queryable retrieval handle over one document.
pub struct DocumentIndex {
    path: PathBuf,
    store: Database,
    chunk_count: usize,
}

impl std::fmt::Debug for DocumentIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentIndex")
            .field("path", &self.path)
            .field("chunk_count", &self.chunk_count)
            .finish()
    }
}

impl DocumentIndex {
    /// Extract, chunk and embed the document at `path` into a fresh in-memory store.
    pub async fn build(path: &Path, embedder: &dyn Embedder) -> Result<Self, IndexError> {
        info!("Building index for {}", path.display());

        let owned = path.to_path_buf();
        let parsed = tokio::task::spawn_blocking(move || doc_processor::parse_file(&owned)).await??;

        let chunks = doc_processor::chunk_text(&parsed.content, CHUNK_SIZE, CHUNK_OVERLAP);
        if chunks.is_empty() {
            return Err(IndexError::Empty);
        }
        let embeddings = embedder.embed(&chunks).await?;

        Self::from_parts(path, chunks, embeddings)
    }

    /// Assemble an index from already embedded chunks.
    pub fn from_parts(
        path: &Path,
        chunks: Vec<String>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<Self, IndexError> {
        if chunks.len() != embeddings.len() {
            return Err(IndexError::Embedding(LlmError::Parse(format!(
                "{} chunks but {} embeddings",
                chunks.len(),
                embeddings.len()
            ))));
        }

        let store = Database::open_in_memory()?;
        store.insert_chunks(&chunks, &embeddings)?;
        let chunk_count = store.chunk_count()?;
        info!("Indexed {} ({} chunks)", path.display(), chunk_count);

        Ok(Self {
            path: path.to_path_buf(),
            store,
            chunk_count,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// The `top_k` chunks most similar to `query`, best first.
    pub async fn search(
        &self,
        embedder: &dyn Embedder,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        if top_k == 0 || self.chunk_count == 0 {
            return Ok(vec![]);
        }

        let query_embedding = embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Parse("no embedding returned for query".into()))?;

        let pairs = self.store.embeddings()?;
        let mut hits = Vec::new();
        for (chunk_index, score) in search_similar(&query_embedding, &pairs, top_k) {
            if let Some(chunk) = self.store.get_chunk(chunk_index)? {
                hits.push(ScoredChunk { chunk, score });
            }
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::LetterEmbedder;

    #[tokio::test]
    async fn build_indexes_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "word ".repeat(300)).unwrap();

        let embedder = LetterEmbedder::default();
        let index = DocumentIndex::build(&path, &embedder).await.unwrap();

        assert_eq!(index.path(), path.as_path());
        assert!(index.chunk_count() > 1);
        assert_eq!(embedder.calls(), 1);
    }

    #[tokio::test]
    async fn build_rejects_empty_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.md");
        std::fs::write(&path, "  \n\n  ").unwrap();

        let err = DocumentIndex::build(&path, &LetterEmbedder::default()).await.unwrap_err();
        assert!(matches!(err, IndexError::Empty));
    }

    #[tokio::test]
    async fn build_reports_corrupt_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"this is not a pdf").unwrap();

        let err = DocumentIndex::build(&path, &LetterEmbedder::default()).await.unwrap_err();
        assert!(err.to_string().starts_with("PDF parse error"));
    }

    #[tokio::test]
    async fn search_ranks_closest_chunk_first() {
        let chunks = vec!["aaaa".to_string(), "zzzz".to_string(), "mmmm".to_string()];
        let embedder = LetterEmbedder::default();
        let embeddings = embedder.embed(&chunks).await.unwrap();
        let index = DocumentIndex::from_parts(Path::new("x.txt"), chunks, embeddings).unwrap();

        let hits = index.search(&embedder, "zz", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.content, "zzzz");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn from_parts_rejects_mismatched_lengths() {
        let err = DocumentIndex::from_parts(Path::new("x.txt"), vec!["a".into()], vec![]).unwrap_err();
        assert!(matches!(err, IndexError::Embedding(_)));
    }
}
