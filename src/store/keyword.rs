//! Tantivy keyword index backing the optional keyword-boost re-ranker
//!
//! Keyword matching is never a retrieval mode; the search engine only uses
//! BM25 scores from this index to re-rank rows already retrieved by vector
//! search. Documents are addressed by segment slot, like the ANN graph, so
//! stale slots fall out naturally when their row lookup misses.

use crate::error::{Result, TrawlError};
use std::path::PathBuf;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Schema, INDEXED, STORED, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy};

/// A keyword match with its BM25 relevance score
#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub slot: u64,
    pub score: f32,
}

/// Per-collection tantivy index
pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    writer: IndexWriter,
    slot_field: Field,
    text_field: Field,
}

impl KeywordIndex {
    /// Open (or create) the index directory for a collection
    pub fn open(index_path: PathBuf) -> Result<Self> {
        let existing = index_path.exists() && index_path.join("meta.json").exists();

        let (index, slot_field, text_field) = if existing {
            let index = Index::open_in_dir(&index_path)
                .map_err(|e| TrawlError::KeywordIndex(e.to_string()))?;
            let schema = index.schema();
            let slot_field = schema
                .get_field("slot")
                .map_err(|_| TrawlError::KeywordIndex("missing 'slot' field".to_string()))?;
            let text_field = schema
                .get_field("text")
                .map_err(|_| TrawlError::KeywordIndex("missing 'text' field".to_string()))?;
            (index, slot_field, text_field)
        } else {
            std::fs::create_dir_all(&index_path).map_err(|e| TrawlError::Io {
                source: e,
                context: format!("Failed to create keyword index directory: {:?}", index_path),
            })?;

            let mut schema_builder = Schema::builder();
            let slot_field = schema_builder.add_u64_field("slot", INDEXED | STORED);
            let text_field = schema_builder.add_text_field("text", TEXT);
            let schema = schema_builder.build();

            let index = Index::create_in_dir(&index_path, schema)
                .map_err(|e| TrawlError::KeywordIndex(e.to_string()))?;
            (index, slot_field, text_field)
        };

        let writer = index
            .writer(50_000_000)
            .map_err(|e| TrawlError::KeywordIndex(e.to_string()))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e: tantivy::TantivyError| TrawlError::KeywordIndex(e.to_string()))?;

        Ok(Self {
            index,
            reader,
            writer,
            slot_field,
            text_field,
        })
    }

    /// Queue a document for indexing; call `commit` to make it searchable
    pub fn insert(&mut self, slot: u64, text: &str) -> Result<()> {
        self.writer
            .add_document(doc!(
                self.slot_field => slot,
                self.text_field => text,
            ))
            .map_err(|e| TrawlError::KeywordIndex(e.to_string()))?;
        Ok(())
    }

    /// Commit queued documents and reload the reader
    pub fn commit(&mut self) -> Result<()> {
        self.writer
            .commit()
            .map_err(|e| TrawlError::KeywordIndex(e.to_string()))?;
        self.reader
            .reload()
            .map_err(|e| TrawlError::KeywordIndex(e.to_string()))?;
        Ok(())
    }

    /// BM25 search over indexed documents
    ///
    /// Query strings come straight from investigators; anything tantivy's
    /// parser rejects simply yields no boost.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<KeywordHit>> {
        let searcher = self.reader.searcher();

        let query_parser = QueryParser::for_index(&self.index, vec![self.text_field]);
        let parsed = match query_parser.parse_query(query) {
            Ok(q) => q,
            Err(e) => {
                tracing::debug!("Keyword query not parseable, skipping boost: {}", e);
                return Ok(Vec::new());
            }
        };

        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit(limit.max(1)))
            .map_err(|e| TrawlError::KeywordIndex(e.to_string()))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let retrieved: tantivy::TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| TrawlError::KeywordIndex(e.to_string()))?;

            let slot = retrieved
                .get_first(self.slot_field)
                .and_then(|v| v.as_u64())
                .ok_or_else(|| TrawlError::KeywordIndex("missing slot value".to_string()))?;

            hits.push(KeywordHit { slot, score });
        }

        Ok(hits)
    }

    /// Number of searchable documents
    pub fn len(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
