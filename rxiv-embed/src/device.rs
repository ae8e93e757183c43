//! Accelerator discovery and device addressing

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Where an encoder worker runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Device {
    /// General-purpose fallback when no accelerator is present
    Cpu,
    /// CUDA device ordinal as seen by this process
    Cuda(usize),
}

impl Device {
    pub fn is_accelerator(&self) -> bool {
        matches!(self, Self::Cuda(_))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
        }
    }
}

/// Devices for a pool of `accelerators` GPUs; zero means a single CPU worker.
pub fn devices_for(accelerators: usize) -> Vec<Device> {
    if accelerators == 0 {
        vec![Device::Cpu]
    } else {
        (0..accelerators).map(Device::Cuda).collect()
    }
}

/// Discover the devices of this machine.
///
/// An explicit count wins, then `CUDA_VISIBLE_DEVICES`, then the NVIDIA
/// driver's `/proc` listing. The result is never empty.
pub fn discover_devices(explicit: Option<usize>) -> Vec<Device> {
    let visible = std::env::var("CUDA_VISIBLE_DEVICES").ok();
    discover_with(
        explicit,
        visible.as_deref(),
        Path::new("/proc/driver/nvidia/gpus"),
    )
}

fn discover_with(explicit: Option<usize>, visible: Option<&str>, proc_gpus: &Path) -> Vec<Device> {
    let count = explicit
        .or_else(|| visible.map(count_visible))
        .unwrap_or_else(|| count_proc_entries(proc_gpus));

    let devices = devices_for(count);
    tracing::info!(
        "Using {} encoder worker(s): {}",
        devices.len(),
        devices
            .iter()
            .map(Device::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );
    devices
}

/// Count entries of a `CUDA_VISIBLE_DEVICES` value. `-1` hides every device.
fn count_visible(value: &str) -> usize {
    value
        .split(',')
        .map(str::trim)
        .take_while(|entry| !entry.starts_with('-'))
        .filter(|entry| !entry.is_empty())
        .count()
}

fn count_proc_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok()).count())
        .unwrap_or(0)
}
