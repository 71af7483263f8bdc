//! # Code Chunker
//!
//! Splits source files into ordered, overlapping line windows that are small
//! enough to embed. Every non-empty file yields at least one chunk, and each
//! chunk knows its position (`chunk_index`) and the file's `total_chunks`, which
//! is what lets the indexer verify that a file's chunk set is complete.
//!
//! ```
//! use gitvec_code_chunker::{Chunker, ChunkerConfig};
//!
//! let chunker = Chunker::new(ChunkerConfig::default());
//! let chunks = chunker.chunk_str("fn main() {}\n", Some("src/main.rs")).unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].total_chunks, 1);
//! ```

mod chunker;
mod error;
mod language;

pub use chunker::{Chunker, ChunkerConfig, TextChunk};
pub use error::{ChunkerError, Result};
pub use language::Language;
