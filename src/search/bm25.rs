use std::path::Path;

use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{
    Field, IndexRecordOption, Schema, TantivyDocument, Value, INDEXED, STORED, STRING, TEXT,
};
use tantivy::{doc, Index, IndexWriter, ReloadPolicy, Term};

use crate::error::{Backend, RetrievalError};
use crate::models::{Chunk, ChunkMetadata, SearchFilters};

/// Characters with meaning in the tantivy query syntax. User text is plain
/// keywords, so these are stripped before parsing rather than escaped.
const QUERY_SPECIALS: &[char] = &[
    '+', '-', '!', '(', ')', '{', '}', '[', ']', '^', '"', '~', '*', '?', ':', '\\', '/', '&', '|',
];

/// BM25 full-text index over the chunk corpus, built on tantivy.
pub struct Bm25Index {
    index: Index,
    f_chunk_id: Field,
    f_document_id: Field,
    f_text: Field,
    f_title: Field,
    f_section: Field,
    f_doc_type: Field,
    f_week: Field,
    f_audience: Field,
    f_metadata: Field,
}

/// A single lexical hit with its raw BM25 score.
#[derive(Debug, Clone)]
pub struct Bm25Hit {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub score: f32,
    pub highlights: Vec<String>,
}

impl Bm25Index {
    /// Create or open an index at the given directory.
    pub fn open_or_create(index_dir: &Path) -> Result<Self, RetrievalError> {
        std::fs::create_dir_all(index_dir)
            .map_err(|e| RetrievalError::backend(Backend::Lexical, e.to_string()))?;

        let mut schema_builder = Schema::builder();
        let f_chunk_id = schema_builder.add_text_field("chunk_id", STRING | STORED);
        let f_document_id = schema_builder.add_text_field("document_id", STRING | STORED);
        let f_text = schema_builder.add_text_field("text", TEXT | STORED);
        let f_title = schema_builder.add_text_field("title", TEXT);
        let f_section = schema_builder.add_text_field("section", TEXT);
        let f_doc_type = schema_builder.add_text_field("doc_type", STRING);
        let f_week = schema_builder.add_u64_field("week", INDEXED);
        let f_audience = schema_builder.add_text_field("audience", STRING);
        let f_metadata = schema_builder.add_text_field("metadata_json", STORED);
        let schema = schema_builder.build();

        let index = if index_dir.join("meta.json").exists() {
            Index::open_in_dir(index_dir)
        } else {
            Index::create_in_dir(index_dir, schema)
        }
        .map_err(|e| RetrievalError::backend(Backend::Lexical, e.to_string()))?;

        Ok(Self {
            index,
            f_chunk_id,
            f_document_id,
            f_text,
            f_title,
            f_section,
            f_doc_type,
            f_week,
            f_audience,
            f_metadata,
        })
    }

    /// Index a batch of chunks. Ids are stable, so re-ingesting a document
    /// is delete + index.
    pub fn index_chunks(&self, chunks: &[Chunk]) -> Result<(), RetrievalError> {
        let mut writer = self.writer()?;

        for chunk in chunks {
            let meta_json = serde_json::to_string(&chunk.metadata)
                .map_err(|e| RetrievalError::backend(Backend::Lexical, e.to_string()))?;
            let mut document = doc!(
                self.f_chunk_id => chunk.id.clone(),
                self.f_document_id => chunk.document_id.clone(),
                self.f_text => chunk.text.clone(),
                self.f_metadata => meta_json,
            );
            if let Some(title) = &chunk.metadata.title {
                document.add_text(self.f_title, title);
            }
            if let Some(section) = &chunk.metadata.section {
                document.add_text(self.f_section, section);
            }
            if let Some(doc_type) = &chunk.metadata.doc_type {
                document.add_text(self.f_doc_type, doc_type);
            }
            if let Some(week) = chunk.metadata.week {
                document.add_u64(self.f_week, u64::from(week));
            }
            if let Some(audience) = &chunk.metadata.audience {
                document.add_text(self.f_audience, audience);
            }
            writer
                .add_document(document)
                .map_err(|e| RetrievalError::backend(Backend::Lexical, e.to_string()))?;
        }

        writer
            .commit()
            .map_err(|e| RetrievalError::backend(Backend::Lexical, e.to_string()))?;
        Ok(())
    }

    /// Delete every chunk of a document, ahead of re-ingestion.
    pub fn delete_document(&self, document_id: &str) -> Result<(), RetrievalError> {
        let mut writer = self.writer()?;
        writer.delete_term(Term::from_field_text(self.f_document_id, document_id));
        writer
            .commit()
            .map_err(|e| RetrievalError::backend(Backend::Lexical, e.to_string()))?;
        Ok(())
    }

    /// Keyword search, strictly descending by BM25 score, at most `k` hits.
    /// `k == 0` and queries that sanitize to nothing return empty without
    /// probing the index.
    pub fn search(
        &self,
        query_str: &str,
        k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<Bm25Hit>, RetrievalError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let sanitized = sanitize_query(query_str);
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }

        let reader = self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e: tantivy::TantivyError| {
                RetrievalError::backend(Backend::Lexical, e.to_string())
            })?;
        let searcher = reader.searcher();

        let query_parser = QueryParser::for_index(
            &self.index,
            vec![self.f_text, self.f_title, self.f_section],
        );
        let parsed = query_parser
            .parse_query(&sanitized)
            .map_err(|e| RetrievalError::backend(Backend::Lexical, e.to_string()))?;
        let query = self.with_filters(parsed, filters);

        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(k))
            .map_err(|e| RetrievalError::backend(Backend::Lexical, e.to_string()))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let document: TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| RetrievalError::backend(Backend::Lexical, e.to_string()))?;

            let chunk_id = stored_str(&document, self.f_chunk_id);
            let document_id = stored_str(&document, self.f_document_id);
            let text = stored_str(&document, self.f_text);
            let metadata: ChunkMetadata =
                serde_json::from_str(&stored_str(&document, self.f_metadata)).unwrap_or_default();

            let highlights = make_highlights(&text, &sanitized);
            hits.push(Bm25Hit {
                chunk_id,
                document_id,
                text,
                metadata,
                score,
                highlights,
            });
        }

        Ok(hits)
    }

    fn writer(&self) -> Result<IndexWriter, RetrievalError> {
        self.index
            .writer(50_000_000)
            .map_err(|e| RetrievalError::backend(Backend::Lexical, e.to_string()))
    }

    /// Wrap the parsed keyword query with must-clauses for any structured
    /// filters, so filtering happens inside the index rather than after.
    fn with_filters(&self, parsed: Box<dyn Query>, filters: &SearchFilters) -> Box<dyn Query> {
        if filters.is_empty() {
            return parsed;
        }
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![(Occur::Must, parsed)];
        if let Some(doc_type) = &filters.doc_type {
            clauses.push((
                Occur::Must,
                Box::new(TermQuery::new(
                    Term::from_field_text(self.f_doc_type, doc_type),
                    IndexRecordOption::Basic,
                )),
            ));
        }
        if let Some(week) = filters.week {
            clauses.push((
                Occur::Must,
                Box::new(TermQuery::new(
                    Term::from_field_u64(self.f_week, u64::from(week)),
                    IndexRecordOption::Basic,
                )),
            ));
        }
        if let Some(audience) = &filters.audience {
            clauses.push((
                Occur::Must,
                Box::new(TermQuery::new(
                    Term::from_field_text(self.f_audience, audience),
                    IndexRecordOption::Basic,
                )),
            ));
        }
        Box::new(BooleanQuery::new(clauses))
    }
}

/// Strip query-syntax operators so arbitrary user text never raises a
/// parse error, then collapse runs of whitespace.
pub fn sanitize_query(query: &str) -> String {
    let cleaned: String = query
        .chars()
        .map(|c| if QUERY_SPECIALS.contains(&c) { ' ' } else { c })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Up to two short context windows around matched query terms, for
/// downstream prompt assembly.
fn make_highlights(text: &str, query: &str) -> Vec<String> {
    const MAX_SNIPS: usize = 2;
    const WINDOW: usize = 60;

    let lower_text = text.to_lowercase();
    let mut snips = Vec::new();
    for term in query.split_whitespace() {
        let term_lower = term.to_lowercase();
        if let Some(pos) = lower_text.find(&term_lower) {
            let start = floor_char_boundary(text, pos.saturating_sub(WINDOW));
            let end = floor_char_boundary(text, (pos + term.len() + WINDOW).min(text.len()));
            snips.push(text[start..end].replace('\n', " "));
            if snips.len() >= MAX_SNIPS {
                break;
            }
        }
    }
    snips
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn stored_str(document: &TantivyDocument, field: Field) -> String {
    document
        .get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}
