//! End-to-end ingestion pipeline
//!
//! One pipeline run ingests one tabular source: normalize, flag noise, build
//! context chunks, encode in batches, then write all collections. Progress is
//! reported through the task registry at stage boundaries and per encode
//! batch. Storage happens only after every embedding is computed, so a batch
//! is either fully visible or fully absent.
//!
//! Stage anchors: parsing 0-25, denoising 25-30, chunking 30-40, encoding
//! (messages) 40-65, encoding (chunks) 65-80, storage 80-100.

use crate::chunking::{build_chunks, ChunkingConfig};
use crate::embedding::EmbeddingProvider;
use crate::error::{Result, TrawlError};
use crate::noise::NoiseFlagger;
use crate::records::{Normalizer, RawImageRecord, RawRecord};
use crate::store::{collection_name, CollectionKind, NewRow, VectorStore};
use crate::tasks::{CancelToken, TaskId, TaskRegistry};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Per-run options
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Suffix for target collection names; empty yields the bare kind prefix
    pub batch_tag: String,
    /// Drop target collections before ingesting
    pub reset: bool,
}

/// Statistics surfaced on task completion
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    pub source_tag: String,
    pub messages_indexed: usize,
    pub chunks_indexed: usize,
    pub images_indexed: usize,
    pub rows_skipped: usize,
    pub noise_flagged: usize,
    pub encode_batches: usize,
    pub parsing_sec: f64,
    pub denoising_sec: f64,
    pub chunking_sec: f64,
    pub encoding_messages_sec: f64,
    pub encoding_chunks_sec: f64,
    pub storage_sec: f64,
    pub total_sec: f64,
}

/// Orchestrates ingestion of one source into the store
pub struct Indexer {
    store: Arc<VectorStore>,
    provider: Arc<dyn EmbeddingProvider>,
    tasks: Arc<TaskRegistry>,
    noise: Arc<NoiseFlagger>,
    chunking: ChunkingConfig,
    batch_size: usize,
}

impl Indexer {
    pub fn new(
        store: Arc<VectorStore>,
        provider: Arc<dyn EmbeddingProvider>,
        tasks: Arc<TaskRegistry>,
        noise: Arc<NoiseFlagger>,
        chunking: ChunkingConfig,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            provider,
            tasks,
            noise,
            chunking,
            batch_size: batch_size.max(1),
        }
    }

    /// Launch a message ingestion job; observe it through the task registry
    pub fn spawn_messages(self: &Arc<Self>, rows: Vec<RawRecord>, options: IndexOptions) -> TaskId {
        let (task_id, cancel) = self.tasks.create();
        let indexer = self.clone();
        let id = task_id.clone();

        tokio::task::spawn_blocking(move || {
            indexer.finish(&id, indexer.index_messages(&id, &cancel, rows, options));
        });

        task_id
    }

    /// Launch an image ingestion job
    pub fn spawn_images(
        self: &Arc<Self>,
        rows: Vec<RawImageRecord>,
        options: IndexOptions,
    ) -> TaskId {
        let (task_id, cancel) = self.tasks.create();
        let indexer = self.clone();
        let id = task_id.clone();

        tokio::task::spawn_blocking(move || {
            indexer.finish(&id, indexer.index_images(&id, &cancel, rows, options));
        });

        task_id
    }

    fn finish(&self, task_id: &str, outcome: Result<IndexStats>) {
        match outcome {
            Ok(stats) => {
                let statistics = serde_json::to_value(&stats).unwrap_or_default();
                if let Err(e) = self.tasks.complete(task_id, statistics) {
                    tracing::error!("Failed to complete task {}: {}", task_id, e);
                }
            }
            Err(TrawlError::Cancelled) => {
                tracing::info!("Task {} cancelled", task_id);
                let _ = self.tasks.fail(task_id, "cancelled");
            }
            Err(e) => {
                tracing::error!("Task {} failed: {}", task_id, e);
                let _ = self.tasks.fail(task_id, &e.to_string());
            }
        }
    }

    /// Run the full message pipeline synchronously
    pub fn index_messages(
        &self,
        task_id: &str,
        cancel: &CancelToken,
        rows: Vec<RawRecord>,
        options: IndexOptions,
    ) -> Result<IndexStats> {
        let total_start = Instant::now();
        let mut stats = IndexStats {
            source_tag: options.batch_tag.clone(),
            ..Default::default()
        };

        let messages_collection = collection_name(CollectionKind::Messages, &options.batch_tag)?;
        let chunks_collection = collection_name(CollectionKind::Chunks, &options.batch_tag)?;

        // Stage 1: parsing
        self.tasks.update(
            task_id,
            0.0,
            "parsing",
            &format!("Normalizing {} raw rows", rows.len()),
        )?;
        let stage_start = Instant::now();
        let mut normalizer = Normalizer::new(&options.batch_tag);
        let mut messages = normalizer.normalize_messages(rows);
        stats.rows_skipped = normalizer.skipped();
        stats.parsing_sec = stage_start.elapsed().as_secs_f64();
        self.tasks.update(
            task_id,
            25.0,
            "parsing",
            &format!(
                "{} messages normalized ({} skipped)",
                messages.len(),
                stats.rows_skipped
            ),
        )?;
        cancel.check()?;

        // Stage 2: denoising
        self.tasks
            .update(task_id, 25.0, "denoising", "Flagging commercial noise")?;
        let stage_start = Instant::now();
        stats.noise_flagged = self.noise.flag_all(&mut messages);
        stats.denoising_sec = stage_start.elapsed().as_secs_f64();
        self.tasks.update(
            task_id,
            30.0,
            "denoising",
            &format!("{} messages flagged as noise", stats.noise_flagged),
        )?;
        cancel.check()?;

        // Stage 3: chunking
        self.tasks
            .update(task_id, 30.0, "chunking", "Building context windows")?;
        let stage_start = Instant::now();
        let chunks = build_chunks(&messages, self.chunking)?;
        stats.chunking_sec = stage_start.elapsed().as_secs_f64();
        self.tasks.update(
            task_id,
            40.0,
            "chunking",
            &format!("{} context chunks built", chunks.len()),
        )?;
        cancel.check()?;

        // Stage 4: encoding, messages then chunks
        let stage_start = Instant::now();
        let message_texts: Vec<String> = messages.iter().map(|m| m.text.clone()).collect();
        let message_vectors = self.encode_batched(
            task_id,
            cancel,
            &message_texts,
            40.0,
            65.0,
            "messages",
            &mut stats,
        )?;
        stats.encoding_messages_sec = stage_start.elapsed().as_secs_f64();

        let stage_start = Instant::now();
        let chunk_texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let chunk_vectors = self.encode_batched(
            task_id,
            cancel,
            &chunk_texts,
            65.0,
            80.0,
            "chunks",
            &mut stats,
        )?;
        stats.encoding_chunks_sec = stage_start.elapsed().as_secs_f64();
        cancel.check()?;

        // Stage 5: storage
        self.tasks
            .update(task_id, 80.0, "storage", "Writing collections")?;
        let stage_start = Instant::now();

        if options.reset {
            self.tasks
                .update(task_id, 82.0, "storage", "Dropping existing collections")?;
            self.store.delete_collection(&messages_collection)?;
            self.store.delete_collection(&chunks_collection)?;
        }

        self.store.create_collection(
            &messages_collection,
            CollectionKind::Messages,
            self.provider.dimension(),
            self.provider.model_id(),
        )?;
        self.store.create_collection(
            &chunks_collection,
            CollectionKind::Chunks,
            self.provider.dimension(),
            self.provider.model_id(),
        )?;

        let message_rows: Vec<NewRow> = messages
            .iter()
            .zip(message_vectors)
            .map(|(m, vector)| NewRow {
                id: m.id.clone(),
                document: m.text.clone(),
                metadata: m.metadata(),
                vector,
            })
            .collect();
        self.store.upsert(&messages_collection, &message_rows)?;
        stats.messages_indexed = message_rows.len();
        self.tasks.update(
            task_id,
            92.0,
            "storage",
            &format!("{} messages stored", stats.messages_indexed),
        )?;

        let chunk_rows: Vec<NewRow> = chunks
            .iter()
            .zip(chunk_vectors)
            .map(|(c, vector)| NewRow {
                id: c.id.clone(),
                document: c.text.clone(),
                metadata: c.metadata(),
                vector,
            })
            .collect();
        self.store.upsert(&chunks_collection, &chunk_rows)?;
        stats.chunks_indexed = chunk_rows.len();
        stats.storage_sec = stage_start.elapsed().as_secs_f64();
        stats.total_sec = total_start.elapsed().as_secs_f64();

        self.tasks.update(
            task_id,
            100.0,
            "storage",
            &format!(
                "Indexed {} messages and {} chunks into '{}' / '{}'",
                stats.messages_indexed,
                stats.chunks_indexed,
                messages_collection,
                chunks_collection
            ),
        )?;

        tracing::info!(
            "Indexing complete: {} messages, {} chunks, {:.2}s total",
            stats.messages_indexed,
            stats.chunks_indexed,
            stats.total_sec
        );

        Ok(stats)
    }

    /// Run the image pipeline: captions are the indexed documents
    pub fn index_images(
        &self,
        task_id: &str,
        cancel: &CancelToken,
        rows: Vec<RawImageRecord>,
        options: IndexOptions,
    ) -> Result<IndexStats> {
        let total_start = Instant::now();
        let mut stats = IndexStats {
            source_tag: options.batch_tag.clone(),
            ..Default::default()
        };

        let images_collection = collection_name(CollectionKind::Images, &options.batch_tag)?;

        self.tasks.update(
            task_id,
            0.0,
            "parsing",
            &format!("Normalizing {} image rows", rows.len()),
        )?;
        let stage_start = Instant::now();
        let mut normalizer = Normalizer::new(&options.batch_tag);
        let images = normalizer.normalize_images(rows);
        stats.rows_skipped = normalizer.skipped();
        stats.parsing_sec = stage_start.elapsed().as_secs_f64();
        self.tasks.update(
            task_id,
            25.0,
            "parsing",
            &format!(
                "{} images with descriptions ({} skipped)",
                images.len(),
                stats.rows_skipped
            ),
        )?;
        cancel.check()?;

        let stage_start = Instant::now();
        let texts: Vec<String> = images.iter().map(|i| i.description.clone()).collect();
        let vectors =
            self.encode_batched(task_id, cancel, &texts, 25.0, 80.0, "images", &mut stats)?;
        stats.encoding_messages_sec = stage_start.elapsed().as_secs_f64();
        cancel.check()?;

        self.tasks
            .update(task_id, 80.0, "storage", "Writing image collection")?;
        let stage_start = Instant::now();

        if options.reset {
            self.store.delete_collection(&images_collection)?;
        }
        self.store.create_collection(
            &images_collection,
            CollectionKind::Images,
            self.provider.dimension(),
            self.provider.model_id(),
        )?;

        let image_rows: Vec<NewRow> = images
            .iter()
            .zip(vectors)
            .map(|(img, vector)| NewRow {
                id: img.id.clone(),
                document: img.description.clone(),
                metadata: img.metadata(),
                vector,
            })
            .collect();
        self.store.upsert(&images_collection, &image_rows)?;
        stats.images_indexed = image_rows.len();
        stats.storage_sec = stage_start.elapsed().as_secs_f64();
        stats.total_sec = total_start.elapsed().as_secs_f64();

        self.tasks.update(
            task_id,
            100.0,
            "storage",
            &format!(
                "Indexed {} images into '{}'",
                stats.images_indexed, images_collection
            ),
        )?;

        Ok(stats)
    }

    /// Encode texts in batches, advancing progress from `from` to `to`
    #[allow(clippy::too_many_arguments)]
    fn encode_batched(
        &self,
        task_id: &str,
        cancel: &CancelToken,
        texts: &[String],
        from: f32,
        to: f32,
        label: &str,
        stats: &mut IndexStats,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            self.tasks
                .update(task_id, to, "encoding", &format!("No {} to encode", label))?;
            return Ok(Vec::new());
        }

        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            cancel.check()?;

            let vectors = self.provider.encode(batch)?;
            out.extend(vectors);
            stats.encode_batches += 1;

            let pct = from + (out.len() as f32 / texts.len() as f32) * (to - from);
            self.tasks.update(
                task_id,
                pct,
                "encoding",
                &format!("Encoding {}: {}/{}", label, out.len(), texts.len()),
            )?;
        }

        Ok(out)
    }
}
