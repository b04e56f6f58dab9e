//! Per-collection vector segment files
//!
//! An append-only binary file of fixed-width little-endian f32 records.
//! The record position (slot) is the address other layers use: the rows table
//! stores it, the ANN graph uses it as the point id, and the keyword index
//! stores it alongside documents. Slots are never reused; an upsert appends a
//! fresh record and repoints the row, leaving the old slot unreferenced.

use crate::error::{Result, TrawlError};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

/// Append-only vector storage for one collection
pub struct VectorSegment {
    path: PathBuf,
    dim: usize,
}

impl VectorSegment {
    /// Open (or create) the segment file for a collection
    pub fn open(path: PathBuf, dim: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TrawlError::Io {
                source: e,
                context: format!("Failed to create segment directory: {:?}", parent),
            })?;
        }
        if !path.exists() {
            File::create(&path).map_err(|e| TrawlError::Io {
                source: e,
                context: format!("Failed to create segment file: {:?}", path),
            })?;
        }
        Ok(Self { path, dim })
    }

    fn record_bytes(&self) -> u64 {
        (self.dim * 4) as u64
    }

    /// Number of vector records currently in the file
    pub fn len(&self) -> Result<u64> {
        let meta = std::fs::metadata(&self.path).map_err(|e| TrawlError::Io {
            source: e,
            context: format!("Failed to stat segment file: {:?}", self.path),
        })?;
        Ok(meta.len() / self.record_bytes())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    /// Append a batch of vectors; returns the slot of the first appended record
    pub fn append(&self, vectors: &[Vec<f32>]) -> Result<u64> {
        let first_slot = self.len()?;

        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| TrawlError::Io {
                source: e,
                context: format!("Failed to open segment for append: {:?}", self.path),
            })?;

        let mut buf = Vec::with_capacity(vectors.len() * self.dim * 4);
        for vector in vectors {
            debug_assert_eq!(vector.len(), self.dim);
            for value in vector {
                buf.extend_from_slice(&value.to_le_bytes());
            }
        }

        file.write_all(&buf).map_err(|e| TrawlError::Io {
            source: e,
            context: format!("Failed to append to segment: {:?}", self.path),
        })?;
        file.flush().map_err(|e| TrawlError::Io {
            source: e,
            context: format!("Failed to flush segment: {:?}", self.path),
        })?;

        Ok(first_slot)
    }

    /// Read the vector stored at a slot
    pub fn read(&self, slot: u64) -> Result<Vec<f32>> {
        let mut file = File::open(&self.path).map_err(|e| TrawlError::Io {
            source: e,
            context: format!("Failed to open segment: {:?}", self.path),
        })?;

        file.seek(SeekFrom::Start(slot * self.record_bytes()))
            .map_err(|e| TrawlError::Io {
                source: e,
                context: format!("Failed to seek segment: {:?}", self.path),
            })?;

        let mut buf = vec![0u8; self.dim * 4];
        file.read_exact(&mut buf).map_err(|e| TrawlError::Io {
            source: e,
            context: format!("Failed to read slot {} from segment: {:?}", slot, self.path),
        })?;

        Ok(decode_record(&buf))
    }

    /// Read several slots in one pass (sorted access keeps seeks short)
    pub fn read_many(&self, slots: &[u64]) -> Result<Vec<Vec<f32>>> {
        let mut file = File::open(&self.path).map_err(|e| TrawlError::Io {
            source: e,
            context: format!("Failed to open segment: {:?}", self.path),
        })?;

        let mut out = Vec::with_capacity(slots.len());
        let mut buf = vec![0u8; self.dim * 4];
        for &slot in slots {
            file.seek(SeekFrom::Start(slot * self.record_bytes()))
                .map_err(|e| TrawlError::Io {
                    source: e,
                    context: format!("Failed to seek segment: {:?}", self.path),
                })?;
            file.read_exact(&mut buf).map_err(|e| TrawlError::Io {
                source: e,
                context: format!("Failed to read slot {} from segment: {:?}", slot, self.path),
            })?;
            out.push(decode_record(&buf));
        }
        Ok(out)
    }

    /// Remove the backing file (collection deletion)
    pub fn remove(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).map_err(|e| TrawlError::Io {
                source: e,
                context: format!("Failed to remove segment file: {:?}", self.path),
            })?;
        }
        Ok(())
    }
}

fn decode_record(buf: &[u8]) -> Vec<f32> {
    buf.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
