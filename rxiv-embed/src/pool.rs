//! A fixed set of encoder workers, one per device

use crate::config::EmbedConfig;
use crate::device::Device;
use crate::downloader::ModelDownloader;
use crate::error::{EmbedError, Result};
use crate::provider::{Encoder, FastEmbedEncoder, cuda_available};
use std::sync::Arc;

/// W identical encoders, worker `i` bound to device `i`.
///
/// The pool only owns the workers; handing them out one job at a time is the
/// scheduler's business.
#[derive(Clone)]
pub struct EncoderPool {
    workers: Vec<Arc<dyn Encoder>>,
    dimension: usize,
}

impl std::fmt::Debug for EncoderPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderPool")
            .field("size", &self.workers.len())
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl EncoderPool {
    /// Build a pool from already-loaded workers.
    ///
    /// # Errors
    /// Fails on an empty worker list or when workers disagree on dimension.
    pub fn new(workers: Vec<Arc<dyn Encoder>>) -> Result<Self> {
        let Some(first) = workers.first() else {
            return Err(EmbedError::invalid_config(
                "encoder pool needs at least one worker",
            ));
        };
        let dimension = first.dimension();

        if let Some(odd) = workers.iter().find(|w| w.dimension() != dimension) {
            return Err(EmbedError::invalid_config(format!(
                "worker on {} produces {} dimensions, expected {}",
                odd.device(),
                odd.dimension(),
                dimension
            )));
        }

        Ok(Self { workers, dimension })
    }

    /// Fetch the model once, then load one fastembed worker per device.
    pub async fn load(config: &EmbedConfig, devices: &[Device]) -> Result<Self> {
        if devices.is_empty() {
            return Err(EmbedError::invalid_config("no devices to load encoders on"));
        }

        let devices = usable_devices(devices, cuda_available());
        ModelDownloader::new()?.ensure_model(config).await?;

        let mut workers: Vec<Arc<dyn Encoder>> = Vec::with_capacity(devices.len());
        for device in devices {
            let encoder = FastEmbedEncoder::load(config.clone(), device).await?;
            workers.push(Arc::new(encoder));
        }

        tracing::info!(
            "Encoder pool ready: {} worker(s), {} dimensions",
            workers.len(),
            workers[0].dimension()
        );
        Self::new(workers)
    }

    /// Number of workers (W)
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Worker bound to slot `index`
    pub fn worker(&self, index: usize) -> Option<Arc<dyn Encoder>> {
        self.workers.get(index).cloned()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn devices(&self) -> Vec<Device> {
        self.workers.iter().map(|w| w.device()).collect()
    }
}

/// Devices the linked onnxruntime can actually drive.
///
/// GPU devices without a CUDA-enabled build collapse into a single CPU worker.
pub fn usable_devices(devices: &[Device], cuda_available: bool) -> Vec<Device> {
    if cuda_available || !devices.iter().any(Device::is_accelerator) {
        return devices.to_vec();
    }
    tracing::warn!(
        "{} CUDA device(s) found but onnxruntime was built without CUDA; \
         falling back to one CPU worker (enable the `cuda` feature)",
        devices.iter().filter(|d| d.is_accelerator()).count()
    );
    vec![Device::Cpu]
}
