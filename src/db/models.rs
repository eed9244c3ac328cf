use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Chunk {
    pub chunk_index: i64,
    pub content: String,
}

/// A retrieved chunk with its similarity to the query.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScoredChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub score: f32,
}
