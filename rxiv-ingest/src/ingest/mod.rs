//! Ingestion pipeline: containers in, merged index out.
//!
//! ## Key Components
//!
//! - **IngestContext**: the encoder pool, its device slots and the run options,
//!   built once per run and passed to the scheduler
//! - **Scheduler**: keeps one job per device in flight and merges results
//! - **Jobs**: read, extract and encode one container on one device
//! - **IngestReport**: what happened, including the dispatch timeline
//!
//! ```text
//! xml/*.xml ─> Scheduler ─> job(container, device) ─> EmbeddingUnit* ─> VectorIndex
//!                 ^                                                         │
//!                 └────────────── snapshot (containers merged) <────────────┘
//! ```

use crate::config::IngestConfig;
use crate::storage::{self, IndexError, VectorIndex};
use rxiv_embed::{EmbedError, EncoderPool, discover_devices};
use serde::Serialize;
use std::path::{Path, PathBuf};

pub mod device_pool;
pub mod job;
pub mod scheduler;

pub use device_pool::{DeviceLease, DevicePool};
pub use job::{ContainerBatch, JobError, JobSettings, process_container};
pub use scheduler::Scheduler;

/// Errors that end a run
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Encoder(#[from] EmbedError),

    #[error(transparent)]
    Records(#[from] rxiv_records::RecordsError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("Device pool closed while scheduling")]
    DevicePoolClosed,
}

/// Knobs of one run
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub instruction: String,
    pub batch_size: usize,
    /// Persist after this many merged containers
    pub checkpoint_every: usize,
    /// Attempts per container before it is reported failed
    pub max_attempts: usize,
    /// Where checkpoints go; `None` keeps the index in memory only
    pub index_dir: Option<PathBuf>,
    pub encoder_fingerprint: Option<String>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            instruction: rxiv_embed::DEFAULT_INSTRUCTION.to_string(),
            batch_size: 8,
            checkpoint_every: 16,
            max_attempts: 2,
            index_dir: None,
            encoder_fingerprint: None,
        }
    }
}

/// Encoder workers, their device slots and the options of a run.
#[derive(Debug)]
pub struct IngestContext {
    pool: EncoderPool,
    devices: DevicePool,
    options: IngestOptions,
}

impl IngestContext {
    pub fn new(pool: EncoderPool, options: IngestOptions) -> Self {
        let devices = DevicePool::new(pool.size());
        Self {
            pool,
            devices,
            options,
        }
    }

    /// Discover devices and load one encoder per device.
    pub async fn load(config: &IngestConfig) -> Result<Self, IngestError> {
        let embed_config = config.embed_config();
        let devices = discover_devices(config.devices);
        let pool = EncoderPool::load(&embed_config, &devices).await?;

        let options = IngestOptions {
            instruction: embed_config.instruction.clone(),
            batch_size: config.batch_size,
            checkpoint_every: config.checkpoint_every,
            max_attempts: config.max_attempts,
            index_dir: Some(config.index_dir()),
            encoder_fingerprint: Some(embed_config.fingerprint()),
        };
        Ok(Self::new(pool, options))
    }

    pub fn pool(&self) -> &EncoderPool {
        &self.pool
    }

    pub fn devices(&self) -> &DevicePool {
        &self.devices
    }

    pub fn options(&self) -> &IngestOptions {
        &self.options
    }

    /// Resume from the snapshot in the index directory (unless `fresh`),
    /// then ingest every container of `xml_dir`.
    pub async fn ingest_dir(&self, xml_dir: &Path, fresh: bool) -> Result<(VectorIndex, IngestReport), IngestError> {
        let (mut index, ingested) = match (&self.options.index_dir, fresh) {
            (Some(dir), false) => self.resume(dir)?,
            _ => (VectorIndex::with_dimension(self.pool.dimension()), Vec::new()),
        };

        let containers = rxiv_records::list_containers(xml_dir)?;
        let report = Scheduler::new(self, &mut index, ingested).run(containers).await?;
        Ok((index, report))
    }

    fn resume(&self, dir: &Path) -> Result<(VectorIndex, Vec<String>), IngestError> {
        match storage::load(dir)? {
            Some((index, info)) => {
                if let Some(fingerprint) = &self.options.encoder_fingerprint {
                    info.check_encoder(fingerprint)?;
                }
                if let Some(dimension) = index.dimension() {
                    if dimension != self.pool.dimension() {
                        return Err(IndexError::IncompatibleEncoder {
                            expected: format!("{} dimensions", self.pool.dimension()),
                            found: format!("{dimension} dimensions"),
                        }
                        .into());
                    }
                }
                tracing::info!(
                    "Resuming from snapshot with {} vectors and {} ingested containers",
                    index.len(),
                    info.containers.len()
                );
                Ok((index, info.containers))
            }
            None => Ok((VectorIndex::with_dimension(self.pool.dimension()), Vec::new())),
        }
    }
}

/// One step of the dispatch timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DispatchEvent {
    Issued { container: String, device: usize },
    Completed { container: String, device: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedContainer {
    pub container: String,
    pub attempts: usize,
    pub cause: String,
}

/// Outcome of a run
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    /// Containers merged by this run, in merge order
    pub completed: Vec<String>,
    pub failed: Vec<FailedContainer>,
    /// Containers skipped because an earlier run already merged them
    pub containers_skipped: usize,
    pub records_extracted: usize,
    pub records_skipped: usize,
    pub units_inserted: usize,
    pub duplicates_skipped: usize,
    pub max_in_flight: usize,
    pub checkpoints: usize,
    /// Every container merged into the index so far, this run included
    pub ingested_containers: Vec<String>,
    pub timeline: Vec<DispatchEvent>,
}

/// Name under which a container is recorded in snapshots
pub fn container_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
