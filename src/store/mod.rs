//! Persistent vector store
//!
//! Rows live in typed, named collections sharing one embedding dimension.
//! Layout under the storage root:
//! - `trawl.sqlite3`: collection metadata and per-row documents/metadata
//! - `segments/<collection>.vec`: raw vectors addressed by slot
//! - `keywords/<collection>/`: tantivy index for the keyword-boost re-ranker
//!
//! The ANN graph is in-memory, built lazily from the segment and updated
//! incrementally; it can always be rebuilt from raw vectors. One writer per
//! collection; readers share a collection-level lock that writes and resets
//! take exclusively, so a reset blocks queries until it completes.

pub mod database;
pub mod index;
pub mod keyword;
pub mod metadata;
pub mod segment;

pub use database::{Database, DbPool, DbStats};
pub use index::{cosine_distance, AnnIndex, AnnParams, Neighbor};
pub use keyword::{KeywordHit, KeywordIndex};
pub use metadata::{Bound, MetaValue, Metadata, Predicate};
pub use segment::VectorSegment;

use crate::error::{Result, TrawlError};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

/// Collection type, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    Messages,
    Chunks,
    Images,
}

impl CollectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionKind::Messages => "messages",
            CollectionKind::Chunks => "chunks",
            CollectionKind::Images => "images",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "messages" => Some(CollectionKind::Messages),
            "chunks" => Some(CollectionKind::Chunks),
            "images" => Some(CollectionKind::Images),
            _ => None,
        }
    }
}

impl std::fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retrieval mode for vector queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SearchMode {
    /// Approximate search through the HNSW graph
    Ann,
    /// Exhaustive exact scan over filtered candidates
    Knn,
}

impl SearchMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ANN" => Some(SearchMode::Ann),
            "KNN" => Some(SearchMode::Knn),
            _ => None,
        }
    }
}

/// Collection descriptor as returned by `list_collections`
#[derive(Debug, Clone, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub kind: CollectionKind,
    pub embedding_dim: usize,
    pub embedding_model: String,
    pub distance: String,
    pub created_at: i64,
    pub record_count: usize,
}

/// A row to be written
#[derive(Debug, Clone)]
pub struct NewRow {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    pub vector: Vec<f32>,
}

/// A row as read back from the store
#[derive(Debug, Clone, Serialize)]
pub struct StoredRow {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
}

/// A row with its distance to the query vector
#[derive(Debug, Clone, Serialize)]
pub struct ScoredRow {
    #[serde(flatten)]
    pub row: StoredRow,
    pub distance: f32,
}

/// Ordering for metadata-only scans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    /// Stable order by ascending id
    ById,
    /// Ascending (timestamp, id); rows without a timestamp sort first
    ByTimestampId,
}

/// Store tuning knobs
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    pub ann: AnnParams,
    /// Candidate multiplier for ANN queries carrying a metadata predicate
    pub over_retrieval: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ann: AnnParams::default(),
            over_retrieval: 4,
        }
    }
}

/// Build a collection name from its kind prefix and batch tag
pub fn collection_name(kind: CollectionKind, batch_tag: &str) -> Result<String> {
    let name = if batch_tag.is_empty() {
        kind.as_str().to_string()
    } else {
        format!("{}_{}", kind.as_str(), batch_tag)
    };
    validate_collection_name(&name)?;
    Ok(name)
}

/// Names are case-sensitive and must match `[A-Za-z0-9_-]{1,64}`
pub fn validate_collection_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(TrawlError::InvalidCollectionName(name.to_string()))
    }
}

/// Runtime state for one open collection
struct CollectionHandle {
    name: String,
    embedding_dim: usize,
    segment: VectorSegment,
    ann: Mutex<Option<Arc<AnnIndex>>>,
    keywords: Mutex<KeywordIndex>,
    /// Queries take this shared; writes and resets take it exclusively
    state: RwLock<()>,
}

/// The process-wide vector store
pub struct VectorStore {
    root: PathBuf,
    database: Database,
    config: StoreConfig,
    collections: RwLock<HashMap<String, Arc<CollectionHandle>>>,
}

impl VectorStore {
    /// Open the store rooted at a directory, creating it if needed
    pub fn open(root: impl Into<PathBuf>, config: StoreConfig) -> Result<Self> {
        let root = root.into();
        for dir in [root.clone(), root.join("segments"), root.join("keywords")] {
            std::fs::create_dir_all(&dir).map_err(|e| TrawlError::Io {
                source: e,
                context: format!("Failed to create store directory: {:?}", dir),
            })?;
        }

        let database = Database::new(&root.join("trawl.sqlite3"))?;

        Ok(Self {
            root,
            database,
            config,
            collections: RwLock::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Create a collection; idempotent when parameters are identical
    pub fn create_collection(
        &self,
        name: &str,
        kind: CollectionKind,
        embedding_dim: usize,
        embedding_model: &str,
    ) -> Result<()> {
        validate_collection_name(name)?;

        let conn = self.database.get_conn()?;
        let existing: Option<(usize, String)> = conn
            .query_row(
                "SELECT embedding_dim, embedding_model FROM collections WHERE name = ?1",
                params![name],
                |row| Ok((row.get::<_, i64>(0)? as usize, row.get(1)?)),
            )
            .optional()?;

        if let Some((dim, model)) = existing {
            if dim != embedding_dim {
                return Err(TrawlError::DimensionMismatch {
                    collection: name.to_string(),
                    expected: dim,
                    actual: embedding_dim,
                });
            }
            if model != embedding_model {
                return Err(TrawlError::Config(format!(
                    "Collection '{}' already uses embedding model '{}'",
                    name, model
                )));
            }
            return Ok(());
        }

        conn.execute(
            "INSERT INTO collections (name, kind, embedding_dim, embedding_model, distance, created_at)
             VALUES (?1, ?2, ?3, ?4, 'cosine', ?5)",
            params![
                name,
                kind.as_str(),
                embedding_dim as i64,
                embedding_model,
                chrono::Utc::now().timestamp(),
            ],
        )?;

        tracing::info!(
            "Created collection '{}' (kind={}, dim={}, model={})",
            name,
            kind,
            embedding_dim,
            embedding_model
        );

        // Materialize segment and keyword index eagerly
        self.handle(name)?;
        Ok(())
    }

    /// Remove a collection and all of its persisted state
    ///
    /// Holds the collection's state lock exclusively for the whole removal:
    /// in-flight queries and writes finish first, queries arriving during the
    /// reset block and then resolve to `CollectionNotFound`.
    ///
    /// Idempotent: deleting an absent collection is a no-op.
    pub fn delete_collection(&self, name: &str) -> Result<()> {
        let handle = match self.handle(name) {
            Ok(handle) => Some(handle),
            Err(TrawlError::CollectionNotFound(_)) => None,
            Err(e) => return Err(e),
        };
        let _state = handle.as_ref().map(|h| h.state.write().unwrap());

        let conn = self.database.get_conn()?;
        let removed = conn.execute("DELETE FROM collections WHERE name = ?1", params![name])?;

        let segment_path = self.root.join("segments").join(format!("{}.vec", name));
        if segment_path.exists() {
            std::fs::remove_file(&segment_path).map_err(|e| TrawlError::Io {
                source: e,
                context: format!("Failed to remove segment file: {:?}", segment_path),
            })?;
        }

        let keywords_path = self.root.join("keywords").join(name);
        if keywords_path.exists() {
            std::fs::remove_dir_all(&keywords_path).map_err(|e| TrawlError::Io {
                source: e,
                context: format!("Failed to remove keyword index: {:?}", keywords_path),
            })?;
        }

        // Unhook last: lookups during the removal found this handle and
        // blocked on its state lock; later ones re-resolve from the database
        self.collections.write().unwrap().remove(name);

        if removed > 0 {
            tracing::info!("Deleted collection '{}'", name);
        }
        Ok(())
    }

    /// All collections with their row counts
    pub fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let conn = self.database.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT c.name, c.kind, c.embedding_dim, c.embedding_model, c.distance, c.created_at,
                    (SELECT COUNT(*) FROM rows r WHERE r.collection = c.name)
             FROM collections c ORDER BY c.name",
        )?;

        let infos = stmt
            .query_map([], |row| {
                Ok(CollectionInfo {
                    name: row.get(0)?,
                    kind: CollectionKind::parse(&row.get::<_, String>(1)?)
                        .unwrap_or(CollectionKind::Messages),
                    embedding_dim: row.get::<_, i64>(2)? as usize,
                    embedding_model: row.get(3)?,
                    distance: row.get(4)?,
                    created_at: row.get(5)?,
                    record_count: row.get::<_, i64>(6)? as usize,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(infos)
    }

    /// Descriptor for one collection
    pub fn collection_info(&self, name: &str) -> Result<CollectionInfo> {
        self.list_collections()?
            .into_iter()
            .find(|c| c.name == name)
            .ok_or_else(|| TrawlError::CollectionNotFound(name.to_string()))
    }

    /// Write a batch of rows atomically; last-writer-wins on id collisions
    pub fn upsert(&self, name: &str, rows: &[NewRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let handle = self.handle(name)?;

        for row in rows {
            if row.vector.len() != handle.embedding_dim {
                return Err(TrawlError::DimensionMismatch {
                    collection: name.to_string(),
                    expected: handle.embedding_dim,
                    actual: row.vector.len(),
                });
            }
        }

        let _state = handle.state.write().unwrap();
        if !self.still_current(name, &handle) {
            return Err(TrawlError::CollectionNotFound(name.to_string()));
        }

        let vectors: Vec<Vec<f32>> = rows.iter().map(|r| r.vector.clone()).collect();
        let first_slot = handle.segment.append(&vectors)?;

        let mut conn = self.database.get_conn()?;
        let tx = conn.transaction()?;
        for (i, row) in rows.iter().enumerate() {
            let metadata_json =
                serde_json::to_string(&row.metadata).map_err(|e| TrawlError::Json {
                    source: e,
                    context: format!("Failed to serialize metadata for row '{}'", row.id),
                })?;
            tx.execute(
                "INSERT INTO rows (collection, id, document, metadata, slot)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(collection, id) DO UPDATE SET
                     document = excluded.document,
                     metadata = excluded.metadata,
                     slot = excluded.slot",
                params![
                    name,
                    &row.id,
                    &row.document,
                    metadata_json,
                    (first_slot + i as u64) as i64,
                ],
            )?;
        }
        tx.commit()?;

        // Keep the ANN graph current if it has already been built
        let ann = handle.ann.lock().unwrap().clone();
        if let Some(ann) = ann {
            let items: Vec<(u64, Vec<f32>)> = rows
                .iter()
                .enumerate()
                .map(|(i, r)| (first_slot + i as u64, r.vector.clone()))
                .collect();
            ann.insert_batch(&items)?;
        }

        let mut keywords = handle.keywords.lock().unwrap();
        for (i, row) in rows.iter().enumerate() {
            keywords.insert(first_slot + i as u64, &row.document)?;
        }
        keywords.commit()?;

        tracing::debug!("Upserted {} rows into '{}'", rows.len(), name);
        Ok(())
    }

    /// Fetch a row by id
    pub fn get_by_id(&self, name: &str, id: &str) -> Result<Option<StoredRow>> {
        let handle = self.handle(name)?;
        let _state = handle.state.read().unwrap();
        if !self.still_current(name, &handle) {
            return Err(TrawlError::CollectionNotFound(name.to_string()));
        }

        let conn = self.database.get_conn()?;
        let row = conn
            .query_row(
                "SELECT id, document, metadata FROM rows WHERE collection = ?1 AND id = ?2",
                params![name, id],
                Self::stored_row_from_sql,
            )
            .optional()?;

        match row {
            Some(r) => Ok(Some(r?)),
            None => Ok(None),
        }
    }

    /// Metadata-only scan, no vector search
    pub fn scan(
        &self,
        name: &str,
        predicate: &Predicate,
        limit: Option<usize>,
        order: ScanOrder,
    ) -> Result<Vec<StoredRow>> {
        let handle = self.handle(name)?;
        let _state = handle.state.read().unwrap();
        if !self.still_current(name, &handle) {
            return Err(TrawlError::CollectionNotFound(name.to_string()));
        }

        let conn = self.database.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, document, metadata FROM rows WHERE collection = ?1 ORDER BY id",
        )?;

        let mut rows = Vec::new();
        let mut iter = stmt.query(params![name])?;
        while let Some(sql_row) = iter.next()? {
            let row = Self::stored_row_from_sql(sql_row)??;
            if predicate.matches(&row.metadata) {
                rows.push(row);
            }
        }

        if order == ScanOrder::ByTimestampId {
            rows.sort_by(|a, b| {
                let ta = a.metadata.get("timestamp").and_then(MetaValue::as_f64);
                let tb = b.metadata.get("timestamp").and_then(MetaValue::as_f64);
                ta.partial_cmp(&tb)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.id.cmp(&b.id))
            });
        }

        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    /// Vector query in the requested mode
    ///
    /// Results are sorted by ascending distance, ties broken by ascending id,
    /// and truncated to `k`. ANN over-retrieves when a predicate is present;
    /// KNN filters first and is exact.
    pub fn query(
        &self,
        name: &str,
        qvec: &[f32],
        k: usize,
        predicate: &Predicate,
        mode: SearchMode,
    ) -> Result<Vec<ScoredRow>> {
        let handle = self.handle(name)?;
        let _state = handle.state.read().unwrap();
        if !self.still_current(name, &handle) {
            return Err(TrawlError::CollectionNotFound(name.to_string()));
        }

        if qvec.len() != handle.embedding_dim {
            return Err(TrawlError::DimensionMismatch {
                collection: name.to_string(),
                expected: handle.embedding_dim,
                actual: qvec.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored = match mode {
            SearchMode::Knn => self.knn_query(&handle, qvec, predicate)?,
            SearchMode::Ann => self.ann_query(&handle, qvec, k, predicate)?,
        };

        scored.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.row.id.cmp(&b.row.id))
        });
        scored.truncate(k);
        Ok(scored)
    }

    /// Number of rows in a collection
    pub fn count(&self, name: &str) -> Result<usize> {
        let handle = self.handle(name)?;
        let _state = handle.state.read().unwrap();
        if !self.still_current(name, &handle) {
            return Err(TrawlError::CollectionNotFound(name.to_string()));
        }
        let conn = self.database.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM rows WHERE collection = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// BM25 scores by row id for the keyword-boost re-ranker
    pub fn keyword_scores(
        &self,
        name: &str,
        query: &str,
        limit: usize,
    ) -> Result<HashMap<String, f32>> {
        let handle = self.handle(name)?;
        let _state = handle.state.read().unwrap();
        if !self.still_current(name, &handle) {
            return Err(TrawlError::CollectionNotFound(name.to_string()));
        }

        let hits = {
            let keywords = handle.keywords.lock().unwrap();
            keywords.search(query, limit)?
        };

        let conn = self.database.get_conn()?;
        let mut scores = HashMap::with_capacity(hits.len());
        for hit in hits {
            // Stale slots (overwritten rows) have no current row and drop out
            let id: Option<String> = conn
                .query_row(
                    "SELECT id FROM rows WHERE collection = ?1 AND slot = ?2",
                    params![name, hit.slot as i64],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(id) = id {
                scores.insert(id, hit.score);
            }
        }
        Ok(scores)
    }

    fn knn_query(
        &self,
        handle: &CollectionHandle,
        qvec: &[f32],
        predicate: &Predicate,
    ) -> Result<Vec<ScoredRow>> {
        let conn = self.database.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, document, metadata, slot FROM rows WHERE collection = ?1 ORDER BY id",
        )?;

        let mut candidates: Vec<(StoredRow, u64)> = Vec::new();
        let mut iter = stmt.query(params![&handle.name])?;
        while let Some(sql_row) = iter.next()? {
            let row = Self::stored_row_from_sql(sql_row)??;
            if predicate.matches(&row.metadata) {
                let slot: i64 = sql_row.get(3)?;
                candidates.push((row, slot as u64));
            }
        }

        let mut scored = Vec::with_capacity(candidates.len());
        for (row, slot) in candidates {
            let vector = handle.segment.read(slot)?;
            scored.push(ScoredRow {
                distance: cosine_distance(qvec, &vector),
                row,
            });
        }
        Ok(scored)
    }

    fn ann_query(
        &self,
        handle: &CollectionHandle,
        qvec: &[f32],
        k: usize,
        predicate: &Predicate,
    ) -> Result<Vec<ScoredRow>> {
        let ann = self.ensure_ann(handle)?;

        let fetch = if predicate.is_true() {
            k
        } else {
            k.saturating_mul(self.config.over_retrieval)
        };

        let neighbors = ann.search(qvec, fetch.max(k))?;

        let conn = self.database.get_conn()?;
        let mut scored = Vec::with_capacity(neighbors.len().min(k));
        for neighbor in neighbors {
            let row = conn
                .query_row(
                    "SELECT id, document, metadata FROM rows WHERE collection = ?1 AND slot = ?2",
                    params![&handle.name, neighbor.slot as i64],
                    Self::stored_row_from_sql,
                )
                .optional()?;

            // A missing row means the slot was superseded by an upsert
            let Some(row) = row else { continue };
            let row = row?;

            if predicate.matches(&row.metadata) {
                scored.push(ScoredRow {
                    distance: neighbor.distance,
                    row,
                });
            }
        }
        Ok(scored)
    }

    /// Build the ANN graph from raw vectors if it is not resident yet
    fn ensure_ann(&self, handle: &CollectionHandle) -> Result<Arc<AnnIndex>> {
        let mut guard = handle.ann.lock().unwrap();
        if let Some(ann) = guard.as_ref() {
            return Ok(ann.clone());
        }

        let capacity = handle.segment.len()? as usize + 1024;
        let ann = Arc::new(AnnIndex::new(
            handle.embedding_dim,
            capacity,
            self.config.ann,
        ));

        let conn = self.database.get_conn()?;
        let mut stmt = conn.prepare("SELECT slot FROM rows WHERE collection = ?1 ORDER BY slot")?;
        let slots = stmt
            .query_map(params![&handle.name], |row| row.get::<_, i64>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for slot in &slots {
            let vector = handle
                .segment
                .read(*slot as u64)
                .map_err(|e| TrawlError::CorruptIndex {
                    collection: handle.name.clone(),
                    reason: e.to_string(),
                })?;
            ann.insert(*slot as u64, &vector)?;
        }

        tracing::info!(
            "Built ANN graph for '{}' ({} points)",
            handle.name,
            slots.len()
        );

        *guard = Some(ann.clone());
        Ok(ann)
    }

    /// A handle that left the map was deleted after lookup; callers holding
    /// one must fail instead of reading removed state
    fn still_current(&self, name: &str, handle: &Arc<CollectionHandle>) -> bool {
        let map = self.collections.read().unwrap();
        map.get(name)
            .is_some_and(|current| Arc::ptr_eq(current, handle))
    }

    fn handle(&self, name: &str) -> Result<Arc<CollectionHandle>> {
        {
            let map = self.collections.read().unwrap();
            if let Some(handle) = map.get(name) {
                return Ok(handle.clone());
            }
        }

        let conn = self.database.get_conn()?;
        let dim: Option<i64> = conn
            .query_row(
                "SELECT embedding_dim FROM collections WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        let Some(dim) = dim else {
            return Err(TrawlError::CollectionNotFound(name.to_string()));
        };

        let segment = VectorSegment::open(
            self.root.join("segments").join(format!("{}.vec", name)),
            dim as usize,
        )?;
        let keywords = KeywordIndex::open(self.root.join("keywords").join(name))?;

        let handle = Arc::new(CollectionHandle {
            name: name.to_string(),
            embedding_dim: dim as usize,
            segment,
            ann: Mutex::new(None),
            keywords: Mutex::new(keywords),
            state: RwLock::new(()),
        });

        let mut map = self.collections.write().unwrap();
        let entry = map.entry(name.to_string()).or_insert(handle);
        Ok(entry.clone())
    }

    fn stored_row_from_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<StoredRow>> {
        let id: String = row.get(0)?;
        let document: String = row.get(1)?;
        let metadata_json: String = row.get(2)?;

        Ok(match serde_json::from_str::<Metadata>(&metadata_json) {
            Ok(metadata) => Ok(StoredRow {
                id,
                document,
                metadata,
            }),
            Err(e) => Err(TrawlError::Json {
                source: e,
                context: format!("Failed to parse metadata for row '{}'", id),
            }),
        })
    }
}
