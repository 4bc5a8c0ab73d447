//! Vector store for analyzed invoices.
//!
//! This module keeps one embedding per analyzed invoice next to its metadata
//! record and answers filtered nearest-neighbor queries over them.
//!
//! # Architecture
//!
//! - `embeddings`: `Embedder` trait and the fastembed-backed model
//! - `index`: positional flat index with exact Euclidean search
//! - `storage`: binary file I/O for invoices.vec persistence
//! - `metadata`: CSV file I/O for invoices.csv persistence
//! - `filters`: metadata filters extracted from free-text questions
//! - `store`: the combined store with load, append and filtered search

pub mod embeddings;
pub mod filters;
mod index;
mod metadata;
mod storage;
mod store;

pub use embeddings::{Embedder, EmbeddingError, EmbeddingModel};
pub use filters::{extract_filters, Filters};
pub use index::{IndexError, VectorIndex};
pub use storage::VectorStorageError;
pub use store::{InvoiceStore, SearchHit, SearchStrategy, StoreError, METADATA_FILE, VECTORS_FILE};

/// Default embedding model name (384 dimensions)
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";
