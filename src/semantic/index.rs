//! Positional flat vector index with exact Euclidean search.
//!
//! Vector `i` belongs to metadata record `i`; the index only ever grows by
//! append, so positions are stable for the lifetime of the store.

/// A neighbor found by [`VectorIndex::search`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Position of the vector in the index it was found in
    pub position: usize,
    /// Squared Euclidean distance to the query (smaller is closer)
    pub distance: f32,
}

/// Append-only exact-search index over fixed-dimension vectors.
///
/// Vectors are stored contiguously, `dimensions` floats per slot.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    data: Vec<f32>,
    dimensions: usize,
}

impl VectorIndex {
    /// Create a new empty vector index with specified dimensions.
    pub fn new(dimensions: usize) -> Self {
        Self {
            data: Vec::new(),
            dimensions,
        }
    }

    /// Create an index with pre-allocated capacity for `capacity` vectors.
    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(dimensions * capacity),
            dimensions,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        if self.dimensions == 0 {
            return 0;
        }
        self.data.len() / self.dimensions
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append a vector, returning its position.
    pub fn add(&mut self, embedding: &[f32]) -> Result<usize, IndexError> {
        if embedding.len() != self.dimensions || self.dimensions == 0 {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: embedding.len(),
            });
        }

        let position = self.len();
        self.data.extend_from_slice(embedding);
        Ok(position)
    }

    /// Vector stored at `position`.
    pub fn get(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimensions)?;
        self.data.get(start..start + self.dimensions)
    }

    /// Iterate over all vectors in position order.
    pub fn iter(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimensions.max(1))
    }

    /// Drop every vector at or after `len`.
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len * self.dimensions);
    }

    /// Copy the vectors at `positions` into a new index, in the given order.
    ///
    /// Position `j` of the result holds the vector found at `positions[j]`.
    pub fn reconstruct(&self, positions: &[usize]) -> Result<VectorIndex, IndexError> {
        let mut subset = VectorIndex::with_capacity(self.dimensions, positions.len());
        for &position in positions {
            let vector = self
                .get(position)
                .ok_or(IndexError::OutOfBounds { position, len: self.len() })?;
            subset.data.extend_from_slice(vector);
        }
        Ok(subset)
    }

    /// Exact k-nearest-neighbor search.
    ///
    /// Returns at most `k` neighbors sorted by ascending squared distance;
    /// equal distances keep position order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let neighbors = self
            .iter()
            .enumerate()
            .map(|(position, vector)| Neighbor {
                position,
                distance: squared_l2(query, vector),
            })
            .collect();

        Ok(top_k(neighbors, k))
    }
}

/// Squared Euclidean distance between two equally sized vectors.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Sort by distance (stable, so ties keep their incoming order) and keep `k`.
pub fn top_k(mut neighbors: Vec<Neighbor>, k: usize) -> Vec<Neighbor> {
    neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    neighbors.truncate(k);
    neighbors
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Position {position} out of bounds for index of {len} vectors")]
    OutOfBounds { position: usize, len: usize },
}
