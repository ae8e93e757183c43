//! In-memory vector index with a document store
//!
//! The index keeps every vector in one flat row-major buffer (exact L2
//! search, no training) next to the position-to-id table and the
//! id-to-document store.
//!
//! ## Invariants
//!
//! - every id in the position table has exactly one docstore entry
//! - no id appears twice, so merging is first-write-wins
//! - every vector has the index dimension
//!
//! ```text
//! EmbeddingUnit* ─ merge ─> VectorIndex ─ save ─> index/{vectors.bin, docstore.json, index.json}
//!                                ^                           │
//!                                └──────────── load ─────────┘
//! ```

use rxiv_records::{Metadata, NormalizedDocument};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

pub mod snapshot;

pub use snapshot::{SnapshotInfo, load, save};

/// One encoded document, held only until it is merged.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingUnit {
    pub id: String,
    pub text: String,
    pub vector: Vec<f32>,
    pub metadata: Metadata,
}

impl EmbeddingUnit {
    pub fn new(document: NormalizedDocument, vector: Vec<f32>) -> Self {
        Self {
            id: document.id,
            text: document.text,
            vector,
            metadata: document.metadata,
        }
    }
}

/// Docstore entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub text: String,
    pub metadata: Metadata,
}

/// Outcome of one merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub inserted: usize,
    /// Incoming units dropped because their id was already present
    pub overlapping: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Vector for {id} has {actual} dimensions, index expects {expected}")]
    DimensionMismatch {
        id: String,
        expected: usize,
        actual: usize,
    },

    #[error("Failed to persist index at {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Index snapshot at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Index was built with encoder {found}, this run uses {expected}")]
    IncompatibleEncoder { expected: String, found: String },
}

impl IndexError {
    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Flat L2 index plus id-to-document store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorIndex {
    dimension: Option<usize>,
    vectors: Vec<f32>,
    ids: Vec<String>,
    docstore: HashMap<String, StoredDocument>,
}

impl VectorIndex {
    /// Empty index whose dimension is fixed by the first merge.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty index with a known dimension.
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: Some(dimension),
            ..Self::default()
        }
    }

    pub(crate) fn from_parts(
        dimension: Option<usize>,
        vectors: Vec<f32>,
        ids: Vec<String>,
        docstore: HashMap<String, StoredDocument>,
    ) -> Self {
        Self {
            dimension,
            vectors,
            ids,
            docstore,
        }
    }

    /// Add units whose ids are not yet present.
    ///
    /// Ids already in the docstore, and repeats within `units`, are dropped
    /// and counted as overlap. A vector of the wrong length rejects the whole
    /// batch before anything is inserted.
    pub fn merge(&mut self, units: Vec<EmbeddingUnit>) -> Result<MergeSummary, IndexError> {
        if units.is_empty() {
            return Ok(MergeSummary::default());
        }

        let expected = self.dimension.unwrap_or(units[0].vector.len());
        if let Some(bad) = units.iter().find(|u| u.vector.len() != expected) {
            return Err(IndexError::DimensionMismatch {
                id: bad.id.clone(),
                expected,
                actual: bad.vector.len(),
            });
        }

        let mut seen = HashSet::with_capacity(units.len());
        let (fresh, overlapping): (Vec<_>, Vec<_>) = units
            .into_iter()
            .partition(|u| !self.docstore.contains_key(&u.id) && seen.insert(u.id.clone()));

        if !overlapping.is_empty() {
            tracing::warn!(
                "Found overlapping ids, skipping addition of {} records",
                overlapping.len()
            );
        }

        self.dimension = Some(expected);
        self.vectors.reserve(fresh.len() * expected);
        let inserted = fresh.len();
        for unit in fresh {
            self.vectors.extend_from_slice(&unit.vector);
            self.ids.push(unit.id.clone());
            self.docstore.insert(
                unit.id,
                StoredDocument {
                    text: unit.text,
                    metadata: unit.metadata,
                },
            );
        }

        Ok(MergeSummary {
            inserted,
            overlapping: overlapping.len(),
        })
    }

    /// The `k` nearest ids to `query` by squared L2 distance, closest first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>, IndexError> {
        let Some(dimension) = self.dimension else {
            return Ok(Vec::new());
        };
        if query.len() != dimension {
            return Err(IndexError::DimensionMismatch {
                id: "<query>".to_string(),
                expected: dimension,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .chunks_exact(dimension)
            .map(|row| row.iter().zip(query).map(|(a, b)| (a - b) * (a - b)).sum())
            .enumerate()
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(position, distance)| (self.ids[position].clone(), distance))
            .collect())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn contains(&self, id: &str) -> bool {
        self.docstore.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&StoredDocument> {
        self.docstore.get(id)
    }

    /// Ids in insertion order
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Vector stored at `position`
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let dimension = self.dimension?;
        self.vectors.get(position * dimension..(position + 1) * dimension)
    }

    pub(crate) fn raw_vectors(&self) -> &[f32] {
        &self.vectors
    }
}
