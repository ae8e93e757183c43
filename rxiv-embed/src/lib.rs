//! # rxiv-embed
//!
//! Encoder side of the arXiv ingestion pipeline: loads one instruction-following
//! embedding model per device and turns batches of (instruction, text) pairs into
//! fixed-length vectors.
//!
//! ## Features
//!
//! - **Local ONNX Models**: inference through FastEmbed, no remote API calls
//! - **One Worker per Device**: every CUDA device gets its own model copy, with CPU as fallback
//! - **HuggingFace Integration**: user-defined models are downloaded once before the workers load
//! - **Model Fingerprints**: snapshots record which model and instruction produced their vectors
//!
//! ## Cargo features
//!
//! - `cuda`: link the CUDA build of onnxruntime. Without it, discovered GPUs
//!   are ignored and the pool runs a single CPU worker.
//!
//! ## Quick Start
//!
//! ```no_run
//! use rxiv_embed::{EmbedConfig, EncoderPool, discover_devices, instruction_pairs};
//!
//! # async fn example() -> rxiv_embed::Result<()> {
//! let config = EmbedConfig::builtin("/data/models");
//! let pool = EncoderPool::load(&config, &discover_devices(None)).await?;
//!
//! let texts = vec!["Title\nAbstract".to_string()];
//! let worker = pool.worker(0).expect("pool is never empty");
//! let vectors = worker
//!     .encode(&instruction_pairs(&config.instruction, &texts), config.batch_size)
//!     .await?;
//! assert_eq!(vectors[0].len(), pool.dimension());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`config`]: model, tokenizer and instruction settings
//! - [`device`]: accelerator discovery
//! - [`provider`]: the [`Encoder`] trait and its FastEmbed implementation
//! - [`pool`]: the per-device worker set
//! - [`downloader`]: HuggingFace model downloading
//! - [`error`]: error types and result handling

pub mod config;
pub mod device;
pub mod downloader;
pub mod error;
pub mod pool;
pub mod provider;

pub use config::{DEFAULT_INSTRUCTION, DEFAULT_MODEL_NAME, EmbedConfig, TokenizerConfig};
pub use device::{Device, devices_for, discover_devices};
pub use downloader::ModelDownloader;
pub use error::{EmbedError, Result};
pub use pool::{EncoderPool, usable_devices};
pub use provider::{
    Encoder, FastEmbedEncoder, InstructionPair, cuda_available, instruction_pairs, normalize,
};
