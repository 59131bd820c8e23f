use std::path::Path;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Backend, RetrievalError};
use crate::models::{Chunk, ChunkMetadata, SearchFilters};

/// A stored embedding entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorEntry {
    chunk_id: String,
    document_id: String,
    text: String,
    metadata: ChunkMetadata,
    embedding: Vec<f32>,
}

/// In-memory nearest-neighbor store over chunk embeddings, with disk
/// persistence. Read-only during queries; concurrent queries never block
/// each other beyond the RwLock read path.
pub struct VectorStore {
    entries: RwLock<Vec<VectorEntry>>,
    persist_path: std::path::PathBuf,
}

/// A single vector hit with its cosine similarity in [-1, 1].
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub score: f32,
}

impl VectorStore {
    pub fn open_or_create(vector_dir: &Path) -> Result<Self, RetrievalError> {
        std::fs::create_dir_all(vector_dir)
            .map_err(|e| RetrievalError::backend(Backend::Vector, e.to_string()))?;
        let persist_path = vector_dir.join("vectors.json");

        let entries = if persist_path.exists() {
            let data = std::fs::read_to_string(&persist_path)
                .map_err(|e| RetrievalError::backend(Backend::Vector, e.to_string()))?;
            serde_json::from_str(&data).unwrap_or_default()
        } else {
            Vec::new()
        };

        Ok(Self {
            entries: RwLock::new(entries),
            persist_path,
        })
    }

    /// Add chunks whose embeddings were computed at ingestion time. Chunks
    /// with an empty embedding are skipped; the engine never fabricates
    /// zero vectors.
    pub fn add_chunks(&self, chunks: &[Chunk]) -> Result<(), RetrievalError> {
        let mut entries = self.entries.write();
        for chunk in chunks {
            if chunk.embedding.is_empty() {
                continue;
            }
            entries.push(VectorEntry {
                chunk_id: chunk.id.clone(),
                document_id: chunk.document_id.clone(),
                text: chunk.text.clone(),
                metadata: chunk.metadata.clone(),
                embedding: chunk.embedding.clone(),
            });
        }
        self.persist(&entries)
    }

    /// Delete every entry of a document, ahead of re-ingestion.
    pub fn delete_document(&self, document_id: &str) -> Result<(), RetrievalError> {
        let mut entries = self.entries.write();
        entries.retain(|e| e.document_id != document_id);
        self.persist(&entries)
    }

    /// Nearest-neighbor search by cosine similarity, strictly descending,
    /// at most `k` hits. An empty query embedding is a hard error: falling
    /// back to a zero vector would silently return garbage.
    pub fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<VectorHit>, RetrievalError> {
        if query_embedding.is_empty() {
            return Err(RetrievalError::backend(
                Backend::Vector,
                "query embedding is empty",
            ));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let entries = self.entries.read();
        let mut scored: Vec<(f32, &VectorEntry)> = entries
            .iter()
            .filter(|e| filters.matches(&e.metadata))
            .map(|e| (cosine_similarity(query_embedding, &e.embedding), e))
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, e)| VectorHit {
                chunk_id: e.chunk_id.clone(),
                document_id: e.document_id.clone(),
                text: e.text.clone(),
                metadata: e.metadata.clone(),
                score,
            })
            .collect())
    }

    /// Look up a stored embedding by chunk id (used by the MMR pass).
    pub fn embedding_of(&self, chunk_id: &str) -> Option<Vec<f32>> {
        self.entries
            .read()
            .iter()
            .find(|e| e.chunk_id == chunk_id)
            .map(|e| e.embedding.clone())
    }

    pub fn entry_count(&self) -> usize {
        self.entries.read().len()
    }

    fn persist(&self, entries: &[VectorEntry]) -> Result<(), RetrievalError> {
        let data = serde_json::to_string(entries)
            .map_err(|e| RetrievalError::backend(Backend::Vector, e.to_string()))?;
        std::fs::write(&self.persist_path, data)
            .map_err(|e| RetrievalError::backend(Backend::Vector, e.to_string()))
    }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        (dot / denom).clamp(-1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn make_chunk(doc: &str, position: usize, text: &str, embedding: Vec<f32>) -> Chunk {
        Chunk::new(
            doc,
            text,
            embedding,
            ChunkMetadata {
                position,
                ..Default::default()
            },
        )
    }

    fn sample_store() -> (tempfile::TempDir, VectorStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open_or_create(dir.path()).unwrap();
        store
            .add_chunks(&[
                make_chunk("a.pdf", 0, "schedule", vec![0.9, 0.1, 0.0]),
                make_chunk("a.pdf", 1, "checklist", vec![0.1, 0.9, 0.0]),
                make_chunk("b.pdf", 0, "office hours", vec![0.0, 0.1, 0.9]),
            ])
            .unwrap();
        (dir, store)
    }

    #[test]
    fn test_search_descending_and_capped() {
        let (_dir, store) = sample_store();
        let hits = store
            .search(&[1.0, 0.0, 0.0], 2, &SearchFilters::default())
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].score >= hits[1].score);
        assert_eq!(hits[0].text, "schedule");
    }

    #[test]
    fn test_empty_query_embedding_is_backend_error() {
        let (_dir, store) = sample_store();
        let result = store.search(&[], 5, &SearchFilters::default());
        assert!(matches!(
            result,
            Err(RetrievalError::BackendUnavailable {
                backend: Backend::Vector,
                ..
            })
        ));
    }

    #[test]
    fn test_k_zero_yields_empty() {
        let (_dir, store) = sample_store();
        let hits = store
            .search(&[1.0, 0.0, 0.0], 0, &SearchFilters::default())
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_delete_document_then_reingest_preserves_ids() {
        let (_dir, store) = sample_store();
        let before = store
            .search(&[0.9, 0.1, 0.0], 1, &SearchFilters::default())
            .unwrap();
        store.delete_document("a.pdf").unwrap();
        assert_eq!(store.entry_count(), 1);

        store
            .add_chunks(&[make_chunk("a.pdf", 0, "schedule", vec![0.9, 0.1, 0.0])])
            .unwrap();
        let after = store
            .search(&[0.9, 0.1, 0.0], 1, &SearchFilters::default())
            .unwrap();
        assert_eq!(before[0].chunk_id, after[0].chunk_id);
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = VectorStore::open_or_create(dir.path()).unwrap();
            store
                .add_chunks(&[make_chunk("a.pdf", 0, "hello", vec![1.0, 0.0])])
                .unwrap();
        }
        let reopened = VectorStore::open_or_create(dir.path()).unwrap();
        assert_eq!(reopened.entry_count(), 1);
    }

    #[test]
    fn test_embedding_of_round_trips() {
        let (_dir, store) = sample_store();
        let hits = store
            .search(&[0.9, 0.1, 0.0], 1, &SearchFilters::default())
            .unwrap();
        let emb = store.embedding_of(&hits[0].chunk_id).unwrap();
        assert_eq!(emb, vec![0.9, 0.1, 0.0]);
        assert!(store.embedding_of("missing").is_none());
    }

    #[test]
    fn test_cosine_similarity_bounds() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_filters_applied_before_ranking() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open_or_create(dir.path()).unwrap();
        let mut eng = make_chunk("a.pdf", 0, "for engineers", vec![1.0, 0.0]);
        eng.metadata.audience = Some("engineer".to_string());
        let mut pm = make_chunk("b.pdf", 0, "for pms", vec![1.0, 0.0]);
        pm.metadata.audience = Some("pm".to_string());
        store.add_chunks(&[eng, pm]).unwrap();

        let filters = SearchFilters {
            audience: Some("engineer".to_string()),
            ..Default::default()
        };
        let hits = store.search(&[1.0, 0.0], 10, &filters).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, "a.pdf");
    }
}
