//! rxiv-ingest: bulk arXiv ingestion into a vector index
//!
//! Pulls the bulk data from the object store, then runs every OAI-PMH export
//! container through a pool of per-device encoders and merges the resulting
//! vectors into a deduplicated, checkpointed index.
//!
//! ## Key Modules
//!
//! - **[`ingest`]**: dispatch scheduler, device slots and per-container jobs
//! - **[`storage`]**: the vector index, its merge rules and snapshot persistence
//! - **[`fetch`]**: manifest-driven downloads from an S3-compatible store
//! - **[`config`]**: environment-driven run configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rxiv_ingest::{config::IngestConfig, ingest::IngestContext};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = IngestConfig::from_env()?;
//! let ctx = IngestContext::load(&config).await?;
//! let (index, report) = ctx.ingest_dir(&config.xml_dir(), false).await?;
//! println!("{} vectors, {} containers failed", index.len(), report.failed.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod fetch;
pub mod ingest;
pub mod storage;
