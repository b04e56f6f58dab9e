//! Trawl - Forensic Semantic Search Engine
//!
//! Trawl ingests seized message and image dumps exported as tabular records,
//! indexes them into a persistent vector store, and answers natural-language
//! queries with ranked records and their conversational context. Results can
//! be constrained by time, geography, direction, or noise flags.

pub mod chunking;
pub mod cli;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod noise;
pub mod pipeline;
pub mod records;
pub mod search;
pub mod store;
pub mod tasks;

pub use error::{Result, TrawlError};
