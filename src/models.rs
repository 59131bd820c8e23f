use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Metadata attached to a chunk at ingestion time. The engine reads it for
/// feature boosts and filtering but never mutates it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub title: Option<String>,
    pub section: Option<String>,
    /// Ordinal index of the chunk within its source document.
    pub position: usize,
    pub doc_type: Option<String>,
    pub week: Option<u32>,
    pub audience: Option<String>,
    /// URLs extracted from the chunk body, in document order.
    #[serde(default)]
    pub links: Vec<String>,
    /// Original file or page the chunk came from.
    pub source: Option<String>,
    pub ingested_at: Option<DateTime<Utc>>,
}

/// An immutable unit of retrievable text, produced by the ingestion
/// collaborator. Replaced wholesale when its document is re-ingested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable id, derived from `(document_id, text, position)`.
    pub id: String,
    pub document_id: String,
    pub text: String,
    /// Precomputed embedding; opaque to the engine.
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Build a chunk with a deterministically derived id, so re-ingesting
    /// unchanged content preserves ids across runs.
    pub fn new(
        document_id: impl Into<String>,
        text: impl Into<String>,
        embedding: Vec<f32>,
        metadata: ChunkMetadata,
    ) -> Self {
        let document_id = document_id.into();
        let text = text.into();
        let id = chunk_id(&document_id, &text, metadata.position);
        Self {
            id,
            document_id,
            text,
            embedding,
            metadata,
        }
    }
}

/// Stable chunk id: `"{document_id}#{position}:{hex12(sha256(text))}"`.
pub fn chunk_id(document_id: &str, text: &str, position: usize) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut hex = String::with_capacity(12);
    for byte in digest.iter().take(6) {
        hex.push_str(&format!("{byte:02x}"));
    }
    format!("{document_id}#{position}:{hex}")
}

/// Structured pre-filters applied to both search legs before ranking.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    pub doc_type: Option<String>,
    pub week: Option<u32>,
    pub audience: Option<String>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.doc_type.is_none() && self.week.is_none() && self.audience.is_none()
    }

    /// Whether chunk metadata satisfies every present filter.
    pub fn matches(&self, meta: &ChunkMetadata) -> bool {
        if let Some(dt) = &self.doc_type {
            if meta.doc_type.as_deref() != Some(dt.as_str()) {
                return false;
            }
        }
        if let Some(week) = self.week {
            if meta.week != Some(week) {
                return false;
            }
        }
        if let Some(aud) = &self.audience {
            if meta.audience.as_deref() != Some(aud.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Transient per-query ranking record. Created fresh for each query and
/// discarded after the call returns; score fields are optional so it stays
/// explicit which pipeline stage populated what.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    /// Raw BM25 score, present when the lexical leg returned this chunk.
    pub bm25_score: Option<f32>,
    /// Cosine similarity, present when the vector leg returned this chunk.
    pub vec_score: Option<f32>,
    /// 1-based rank within the lexical result list.
    pub rank_bm25: Option<usize>,
    /// 1-based rank within the vector result list.
    pub rank_vec: Option<usize>,
    pub fused_score: f32,
    pub rerank_score: Option<f32>,
    /// Additive feature-boost correction.
    pub boost_score: f32,
    pub final_score: f32,
    pub highlights: Vec<String>,
}

impl Candidate {
    pub fn bare(
        chunk_id: impl Into<String>,
        document_id: impl Into<String>,
        text: impl Into<String>,
        metadata: ChunkMetadata,
    ) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            document_id: document_id.into(),
            text: text.into(),
            metadata,
            bm25_score: None,
            vec_score: None,
            rank_bm25: None,
            rank_vec: None,
            fused_score: 0.0,
            rerank_score: None,
            boost_score: 0.0,
            final_score: 0.0,
            highlights: Vec::new(),
        }
    }
}

/// Externally visible output: an independent copy of the chunk data plus the
/// final score, ready for downstream prompt assembly. No formatting applied.
#[derive(Debug, Clone, Serialize)]
pub struct RankedResult {
    pub chunk_id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub final_score: f32,
    pub highlights: Vec<String>,
}

impl From<&Candidate> for RankedResult {
    fn from(c: &Candidate) -> Self {
        Self {
            chunk_id: c.chunk_id.clone(),
            text: c.text.clone(),
            metadata: c.metadata.clone(),
            final_score: c.final_score,
            highlights: c.highlights.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_stable_across_reingestion() {
        let a = chunk_id("handbook.pdf", "Demo day is Friday.", 3);
        let b = chunk_id("handbook.pdf", "Demo day is Friday.", 3);
        assert_eq!(a, b);
    }

    #[test]
    fn test_chunk_id_changes_with_content_or_position() {
        let base = chunk_id("handbook.pdf", "Demo day is Friday.", 3);
        assert_ne!(base, chunk_id("handbook.pdf", "Demo day is Monday.", 3));
        assert_ne!(base, chunk_id("handbook.pdf", "Demo day is Friday.", 4));
        assert_ne!(base, chunk_id("faq.pdf", "Demo day is Friday.", 3));
    }

    #[test]
    fn test_chunk_new_derives_id() {
        let meta = ChunkMetadata {
            position: 2,
            ..Default::default()
        };
        let chunk = Chunk::new("doc-1", "hello world", vec![0.1, 0.2], meta);
        assert!(chunk.id.starts_with("doc-1#2:"));
    }

    #[test]
    fn test_filters_match_all_present_fields() {
        let meta = ChunkMetadata {
            doc_type: Some("schedule".to_string()),
            week: Some(3),
            audience: Some("engineer".to_string()),
            ..Default::default()
        };

        let filters = SearchFilters {
            doc_type: Some("schedule".to_string()),
            week: Some(3),
            audience: None,
        };
        assert!(filters.matches(&meta));

        let wrong_week = SearchFilters {
            week: Some(4),
            ..Default::default()
        };
        assert!(!wrong_week.matches(&meta));
    }

    #[test]
    fn test_empty_filters_match_everything() {
        let filters = SearchFilters::default();
        assert!(filters.is_empty());
        assert!(filters.matches(&ChunkMetadata::default()));
    }
}
