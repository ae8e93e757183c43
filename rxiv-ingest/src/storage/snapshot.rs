//! Full-state persistence of the vector index
//!
//! A snapshot is a directory holding:
//!
//! - `vectors.bin`: every vector, row-major little-endian f32
//! - `docstore.json`: `[{id, text, metadata}]` in position order
//! - `index.json`: [`SnapshotInfo`]
//!
//! Snapshots are written to a sibling staging directory and swapped in by
//! rename, so an interrupted save leaves either the old or the new snapshot
//! (or `index.prev`, which [`load`] falls back to).

use super::{IndexError, StoredDocument, VectorIndex};
use chrono::{DateTime, Utc};
use rxiv_records::Metadata;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const FORMAT_VERSION: u32 = 1;

const VECTORS_FILE: &str = "vectors.bin";
const DOCSTORE_FILE: &str = "docstore.json";
const INFO_FILE: &str = "index.json";

/// Contents of `index.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub format_version: u32,
    pub dimension: Option<usize>,
    pub count: usize,
    /// BLAKE3 of `vectors.bin`, hex encoded
    pub vectors_blake3: String,
    /// Fingerprint of the encoder configuration that produced the vectors
    pub encoder_fingerprint: Option<String>,
    /// Containers whose records are fully merged into this snapshot
    pub containers: Vec<String>,
    pub saved_at: DateTime<Utc>,
}

impl SnapshotInfo {
    /// Fail if the snapshot was produced by a different encoder.
    pub fn check_encoder(&self, fingerprint: &str) -> Result<(), IndexError> {
        match &self.encoder_fingerprint {
            Some(found) if found != fingerprint => Err(IndexError::IncompatibleEncoder {
                expected: fingerprint.to_string(),
                found: found.clone(),
            }),
            _ => Ok(()),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct DocstoreEntry {
    id: String,
    text: String,
    metadata: Metadata,
}

/// `vectors.bin` bytes; a plain cast on little-endian hosts.
fn vectors_to_le(vectors: &[f32]) -> Cow<'_, [u8]> {
    if cfg!(target_endian = "little") {
        Cow::Borrowed(bytemuck::cast_slice(vectors))
    } else {
        Cow::Owned(vectors.iter().flat_map(|v| v.to_le_bytes()).collect())
    }
}

fn vectors_from_le(bytes: &[u8]) -> Vec<f32> {
    if cfg!(target_endian = "little") {
        bytemuck::pod_collect_to_vec(bytes)
    } else {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }
}

/// Persist `index` into `dir`, replacing any previous snapshot.
pub fn save(
    index: &VectorIndex,
    dir: &Path,
    encoder_fingerprint: Option<&str>,
    containers: &[String],
) -> Result<SnapshotInfo, IndexError> {
    let staging = sibling(dir, "staging");
    let previous = sibling(dir, "prev");

    if staging.exists() {
        fs::remove_dir_all(&staging).map_err(|e| IndexError::persistence(&staging, e))?;
    }
    fs::create_dir_all(&staging).map_err(|e| IndexError::persistence(&staging, e))?;

    let vector_bytes = vectors_to_le(index.raw_vectors());
    write_synced(&staging.join(VECTORS_FILE), &vector_bytes)?;

    let entries: Vec<DocstoreEntry> = index
        .ids()
        .iter()
        .filter_map(|id| {
            index.get(id).map(|doc| DocstoreEntry {
                id: id.clone(),
                text: doc.text.clone(),
                metadata: doc.metadata.clone(),
            })
        })
        .collect();
    let docstore_path = staging.join(DOCSTORE_FILE);
    let docstore = serde_json::to_vec(&entries)
        .map_err(|e| IndexError::persistence(&docstore_path, std::io::Error::other(e)))?;
    write_synced(&docstore_path, &docstore)?;

    let info = SnapshotInfo {
        format_version: FORMAT_VERSION,
        dimension: index.dimension(),
        count: index.len(),
        vectors_blake3: blake3::hash(&vector_bytes).to_hex().to_string(),
        encoder_fingerprint: encoder_fingerprint.map(str::to_string),
        containers: containers.to_vec(),
        saved_at: Utc::now(),
    };
    let info_path = staging.join(INFO_FILE);
    let info_bytes = serde_json::to_vec_pretty(&info)
        .map_err(|e| IndexError::persistence(&info_path, std::io::Error::other(e)))?;
    write_synced(&info_path, &info_bytes)?;

    if dir.exists() {
        if previous.exists() {
            fs::remove_dir_all(&previous).map_err(|e| IndexError::persistence(&previous, e))?;
        }
        fs::rename(dir, &previous).map_err(|e| IndexError::persistence(dir, e))?;
    }
    fs::rename(&staging, dir).map_err(|e| IndexError::persistence(dir, e))?;
    if previous.exists() {
        fs::remove_dir_all(&previous).map_err(|e| IndexError::persistence(&previous, e))?;
    }

    tracing::info!(
        "Saved index snapshot with {} vectors to {}",
        info.count,
        dir.display()
    );
    Ok(info)
}

/// Load the snapshot in `dir`, falling back to `dir.prev` after an
/// interrupted save. `Ok(None)` when neither exists.
pub fn load(dir: &Path) -> Result<Option<(VectorIndex, SnapshotInfo)>, IndexError> {
    let previous = sibling(dir, "prev");
    let source = if dir.join(INFO_FILE).exists() {
        dir.to_path_buf()
    } else if previous.join(INFO_FILE).exists() {
        tracing::warn!(
            "No complete snapshot at {}, recovering from {}",
            dir.display(),
            previous.display()
        );
        previous
    } else {
        return Ok(None);
    };

    let info_path = source.join(INFO_FILE);
    let info: SnapshotInfo = serde_json::from_slice(&read(&info_path)?)
        .map_err(|e| IndexError::corrupt(&info_path, e))?;
    if info.format_version != FORMAT_VERSION {
        return Err(IndexError::corrupt(
            &info_path,
            format!("unsupported format version {}", info.format_version),
        ));
    }

    let vectors_path = source.join(VECTORS_FILE);
    let vector_bytes = read(&vectors_path)?;
    let checksum = blake3::hash(&vector_bytes).to_hex().to_string();
    if checksum != info.vectors_blake3 {
        return Err(IndexError::corrupt(&vectors_path, "checksum mismatch"));
    }
    let expected_len = info.count * info.dimension.unwrap_or(0) * std::mem::size_of::<f32>();
    if vector_bytes.len() != expected_len {
        return Err(IndexError::corrupt(
            &vectors_path,
            format!("expected {} bytes, found {}", expected_len, vector_bytes.len()),
        ));
    }
    let vectors = vectors_from_le(&vector_bytes);

    let docstore_path = source.join(DOCSTORE_FILE);
    let entries: Vec<DocstoreEntry> = serde_json::from_slice(&read(&docstore_path)?)
        .map_err(|e| IndexError::corrupt(&docstore_path, e))?;
    if entries.len() != info.count {
        return Err(IndexError::corrupt(
            &docstore_path,
            format!("expected {} entries, found {}", info.count, entries.len()),
        ));
    }

    let mut ids = Vec::with_capacity(entries.len());
    let mut docstore = HashMap::with_capacity(entries.len());
    for entry in entries {
        let stored = StoredDocument {
            text: entry.text,
            metadata: entry.metadata,
        };
        if docstore.insert(entry.id.clone(), stored).is_some() {
            return Err(IndexError::corrupt(
                &docstore_path,
                format!("duplicate id {}", entry.id),
            ));
        }
        ids.push(entry.id);
    }

    tracing::info!(
        "Loaded index snapshot with {} vectors from {}",
        info.count,
        source.display()
    );
    let index = VectorIndex::from_parts(info.dimension, vectors, ids, docstore);
    Ok(Some((index, info)))
}

/// `…/index` -> `…/index.{suffix}`
fn sibling(dir: &Path, suffix: &str) -> PathBuf {
    let mut name = dir
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "index".into());
    name.push(".");
    name.push(suffix);
    dir.with_file_name(name)
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), IndexError> {
    let mut file = File::create(path).map_err(|e| IndexError::persistence(path, e))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| IndexError::persistence(path, e))
}

fn read(path: &Path) -> Result<Vec<u8>, IndexError> {
    fs::read(path).map_err(|e| IndexError::persistence(path, e))
}
