//! Bulk-data manifests listing the archive files of a collection.

use crate::error::{RecordsError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One archive file described by a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestEntry {
    pub content_md5sum: String,
    /// Object key relative to the bucket root, e.g. `src/arXiv_src_0001_001.tar`
    pub filename: String,
    pub first_item: String,
    pub last_item: String,
    pub md5sum: String,
    pub num_items: String,
    pub seq_num: String,
    pub size: String,
    pub timestamp: String,
    pub yymm: String,
}

/// A parsed manifest document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    #[serde(rename = "file")]
    pub files: Vec<ManifestEntry>,
    pub timestamp: String,
}

impl Manifest {
    pub fn parse(xml: &str, label: impl AsRef<Path>) -> Result<Self> {
        quick_xml::de::from_str(xml).map_err(|source| RecordsError::Manifest {
            path: label.as_ref().to_path_buf(),
            source,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let xml = std::fs::read_to_string(path).map_err(|e| RecordsError::io(path, e))?;
        Self::parse(&xml, path)
    }

    /// Object keys of every listed file that has a name, in manifest order.
    pub fn filenames(&self) -> Vec<String> {
        self.files
            .iter()
            .filter(|entry| !entry.filename.is_empty())
            .map(|entry| entry.filename.clone())
            .collect()
    }
}
