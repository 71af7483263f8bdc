//! # Vector Store
//!
//! Storage side of gitvec: the [`ContentPoint`] record, the [`VectorStore`]
//! trait with an in-memory and a JSON-file backend, and the
//! [`EmbeddingProvider`] trait with an offline hashing provider and an Ollama
//! client.
//!
//! Points carry a `hidden_branches` set instead of being deleted when a file
//! disappears from a branch; a point is visible in branch `B` iff `B` is not
//! in that set.

mod collection;
mod embedding;
mod error;
mod json_store;
mod memory;
mod ollama;
mod point;
mod store;

pub use collection::resolve_collection_name;
pub use embedding::{EmbeddingProvider, HashingEmbedder};
pub use error::{Result, VectorStoreError};
pub use json_store::JsonFileStore;
pub use memory::MemoryVectorStore;
pub use ollama::{OllamaEmbedder, DEFAULT_OLLAMA_URL};
pub use point::{ContentPoint, PointFilter, PointPayload, VisibilityUpdate};
pub use store::VectorStore;
