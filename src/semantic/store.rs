//! Invoice store: vector index and metadata kept in lockstep.
//!
//! - Loads both artifacts together, or starts empty when neither exists
//! - Appends batches under an exclusive lock and rewrites both files
//! - Answers filtered nearest-neighbor queries under a shared lock

use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::invoice::{AnalyzedInvoice, InvoiceRecord};
use crate::semantic::embeddings::{Embedder, EmbeddingError};
use crate::semantic::filters::{self, Filters};
use crate::semantic::index::{self, IndexError, Neighbor, VectorIndex};
use crate::semantic::metadata::MetadataStorage;
use crate::semantic::storage::{VectorStorage, VectorStorageError};

/// Vector file name inside the data directory
pub const VECTORS_FILE: &str = "invoices.vec";
/// Metadata file name inside the data directory
pub const METADATA_FILE: &str = "invoices.csv";

/// How the filtered subset gets ranked. Both are exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    /// Compute distances against matching slots of the main index.
    LinearScan,
    /// Copy matching vectors into a throwaway index and query that.
    #[default]
    EphemeralIndex,
}

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Vector storage error: {0}")]
    Storage(#[from] VectorStorageError),

    #[error("Metadata storage error: {0}")]
    Metadata(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Found {present} but not {missing}; refusing to start from a partial store")]
    PartialState { present: String, missing: String },

    #[error("Store is inconsistent: {vectors} vectors but {records} records")]
    Inconsistent { vectors: usize, records: usize },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Squared Euclidean distance, smaller is more similar
    pub distance: f32,
    pub record: InvoiceRecord,
}

struct StoreState {
    index: VectorIndex,
    records: Vec<InvoiceRecord>,
}

/// Persistent, filterable similarity store for analyzed invoices.
pub struct InvoiceStore {
    embedder: Arc<dyn Embedder>,
    vectors: VectorStorage,
    metadata: MetadataStorage,
    strategy: SearchStrategy,
    state: RwLock<StoreState>,
}

impl InvoiceStore {
    /// Open the store kept in `data_dir`.
    ///
    /// Both files present: load and cross-check them. Neither present: start
    /// empty. Only one present: `StoreError::PartialState`.
    pub fn load(
        data_dir: &Path,
        embedder: Arc<dyn Embedder>,
        strategy: SearchStrategy,
    ) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir)?;

        let vectors = VectorStorage::new(data_dir.join(VECTORS_FILE));
        let metadata = MetadataStorage::new(data_dir.join(METADATA_FILE));
        let dimensions = embedder.dimensions();

        let state = match (vectors.exists(), metadata.exists()) {
            (true, true) => {
                let now = Instant::now();
                let index = vectors.load(&embedder.model_id_hash(), dimensions)?;
                let records = metadata.load()?;

                if index.len() != records.len() {
                    return Err(StoreError::Inconsistent {
                        vectors: index.len(),
                        records: records.len(),
                    });
                }

                log::info!(
                    "Loaded {} invoices from {} in {}ms",
                    records.len(),
                    data_dir.display(),
                    now.elapsed().as_millis()
                );
                StoreState { index, records }
            }
            (false, false) => {
                log::info!("No existing invoice store, starting fresh");
                StoreState {
                    index: VectorIndex::new(dimensions),
                    records: Vec::new(),
                }
            }
            (true, false) => {
                return Err(StoreError::PartialState {
                    present: vectors.path().display().to_string(),
                    missing: metadata.path().display().to_string(),
                })
            }
            (false, true) => {
                return Err(StoreError::PartialState {
                    present: metadata.path().display().to_string(),
                    missing: vectors.path().display().to_string(),
                })
            }
        };

        Ok(Self {
            embedder,
            vectors,
            metadata,
            strategy,
            state: RwLock::new(state),
        })
    }

    pub fn strategy(&self) -> SearchStrategy {
        self.strategy
    }

    /// Number of indexed invoices.
    pub fn len(&self) -> Result<usize, StoreError> {
        let state = self.read_state()?;
        Ok(state.records.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Snapshot of every stored record in insertion order.
    pub fn records(&self) -> Result<Vec<InvoiceRecord>, StoreError> {
        let state = self.read_state()?;
        Ok(state.records.clone())
    }

    /// Vector stored at `position`, if any.
    #[cfg(test)]
    pub fn vector(&self, position: usize) -> Result<Option<Vec<f32>>, StoreError> {
        let state = self.read_state()?;
        Ok(state.index.get(position).map(<[f32]>::to_vec))
    }

    /// Embed and append a batch, then rewrite both files.
    ///
    /// The write lock is held from embedding until the files are renamed into
    /// place. Any embedding failure leaves the store untouched. If persisting
    /// fails, the in-memory state is rolled back to what it was before the
    /// call and the error is returned.
    pub fn append(&self, invoices: Vec<AnalyzedInvoice>) -> Result<usize, StoreError> {
        if invoices.is_empty() {
            return Ok(0);
        }

        let mut state = self
            .state
            .write()
            .map_err(|e| StoreError::Internal(format!("Lock poisoned: {}", e)))?;

        let texts: Vec<String> = invoices.iter().map(AnalyzedInvoice::embedding_text).collect();
        let embeddings = self.embedder.embed_batch(&texts)?;
        if embeddings.len() != invoices.len() {
            return Err(StoreError::Embedding(EmbeddingError::EmbeddingFailed(format!(
                "expected {} embeddings, got {}",
                invoices.len(),
                embeddings.len()
            ))));
        }

        let previous_len = state.records.len();
        for (invoice, embedding) in invoices.into_iter().zip(embeddings) {
            if let Err(err) = state.index.add(&embedding) {
                Self::rollback(&mut state, previous_len);
                return Err(err.into());
            }
            state.records.push(invoice.record);
        }

        if let Err(err) = self.persist(&state) {
            log::error!("Failed to persist invoice store: {}", err);
            Self::rollback(&mut state, previous_len);
            return Err(err);
        }

        let added = state.records.len() - previous_len;
        log::info!(
            "Appended {} invoices to the store ({} total)",
            added,
            state.records.len()
        );

        Ok(added)
    }

    /// Rank the records matching `filters` by distance to `query`.
    ///
    /// Returns at most `top_k` hits, closest first, ties in insertion order.
    /// An empty store or an empty filtered subset gives an empty result
    /// without embedding the query.
    pub fn search(
        &self,
        query: &str,
        top_k: usize,
        filters: &Filters,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let state = self.read_state()?;

        if state.records.is_empty() || top_k == 0 {
            return Ok(vec![]);
        }

        let positions: Vec<usize> = state
            .records
            .iter()
            .enumerate()
            .filter(|(_, record)| filters::matches(filters, record))
            .map(|(position, _)| position)
            .collect();

        if positions.is_empty() {
            log::debug!("No invoices match filters {:?}", filters);
            return Ok(vec![]);
        }

        let query_embedding = self.embedder.embed(query)?;
        let k = top_k.min(positions.len());

        let neighbors = match self.strategy {
            SearchStrategy::LinearScan => {
                Self::linear_scan(&state.index, &positions, &query_embedding, k)?
            }
            SearchStrategy::EphemeralIndex => {
                Self::ephemeral_search(&state.index, &positions, &query_embedding, k)?
            }
        };

        Ok(neighbors
            .into_iter()
            .map(|neighbor| SearchHit {
                distance: neighbor.distance,
                record: state.records[neighbor.position].clone(),
            })
            .collect())
    }

    /// Distances computed in place; returned positions refer to the main index.
    fn linear_scan(
        index: &VectorIndex,
        positions: &[usize],
        query: &[f32],
        k: usize,
    ) -> Result<Vec<Neighbor>, StoreError> {
        if query.len() != index.dimensions() {
            return Err(IndexError::DimensionMismatch {
                expected: index.dimensions(),
                got: query.len(),
            }
            .into());
        }

        let mut neighbors = Vec::with_capacity(positions.len());
        for &position in positions {
            let vector = index.get(position).ok_or(IndexError::OutOfBounds {
                position,
                len: index.len(),
            })?;
            neighbors.push(Neighbor {
                position,
                distance: index::squared_l2(query, vector),
            });
        }

        Ok(index::top_k(neighbors, k))
    }

    /// Query a temporary index over the subset, then map back to main positions.
    fn ephemeral_search(
        index: &VectorIndex,
        positions: &[usize],
        query: &[f32],
        k: usize,
    ) -> Result<Vec<Neighbor>, StoreError> {
        let subset = index.reconstruct(positions)?;
        let neighbors = subset.search(query, k)?;

        Ok(neighbors
            .into_iter()
            .map(|neighbor| Neighbor {
                position: positions[neighbor.position],
                distance: neighbor.distance,
            })
            .collect())
    }

    fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        self.vectors
            .save(&state.index, &self.embedder.model_id_hash())?;
        self.metadata.save(&state.records)?;
        Ok(())
    }

    fn rollback(state: &mut StoreState, len: usize) {
        state.index.truncate(len);
        state.records.truncate(len);
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, StoreState>, StoreError> {
        self.state
            .read()
            .map_err(|e| StoreError::Internal(format!("Lock poisoned: {}", e)))
    }
}
