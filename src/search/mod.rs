//! Query engine: filter compilation, semantic search, and conversation
//! reconstruction

pub mod conversation;
pub mod engine;
pub mod filters;

pub use conversation::{
    conversation_messages, grep_conversation, list_conversations, reconstruct,
    ConversationEntry, ConversationSummary,
};
pub use engine::{SearchConfig, SearchEngine, SearchHit, SearchRequest};
pub use filters::{compile, haversine_km, CompiledFilters, GeoFilter, SearchFilters};
