pub mod models;

use crate::embedding::{bytes_to_embedding, embedding_to_bytes};
use models::Chunk;
use rusqlite::{params, Connection, OptionalExtension, Result};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// In-memory chunk store backing one document index.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open_in_memory() -> Result<Self> {
        let db = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn migrate(&self) -> Result<()> {
        self.conn().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS chunks (
                chunk_index INTEGER PRIMARY KEY,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL
            );
            ",
        )
    }

    /// Store chunk texts with their embeddings, numbered in the order given.
    pub fn insert_chunks(&self, chunks: &[String], embeddings: &[Vec<f32>]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO chunks (chunk_index, content, embedding) VALUES (?1, ?2, ?3)")?;
            for (i, (content, emb)) in chunks.iter().zip(embeddings).enumerate() {
                stmt.execute(params![i as i64, content, embedding_to_bytes(emb)])?;
            }
        }
        tx.commit()
    }

    pub fn chunk_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Every `(chunk_index, embedding)` pair in the store.
    pub fn embeddings(&self) -> Result<Vec<(i64, Vec<f32>)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT chunk_index, embedding FROM chunks ORDER BY chunk_index")?;
        let rows = stmt.query_map([], |row| {
            let bytes: Vec<u8> = row.get(1)?;
            Ok((row.get(0)?, bytes_to_embedding(&bytes)))
        })?;
        rows.collect()
    }

    pub fn get_chunk(&self, chunk_index: i64) -> Result<Option<Chunk>> {
        self.conn()
            .query_row(
                "SELECT chunk_index, content FROM chunks WHERE chunk_index = ?1",
                params![chunk_index],
                |row| {
                    Ok(Chunk {
                        chunk_index: row.get(0)?,
                        content: row.get(1)?,
                    })
                },
            )
            .optional()
    }
}
