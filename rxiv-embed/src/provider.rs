//! Encoder trait and the fastembed-backed implementation

use crate::config::EmbedConfig;
use crate::device::Device;
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use fastembed::{
    EmbeddingModel, ExecutionProviderDispatch, InitOptions, InitOptionsUserDefined, TextEmbedding,
    TokenizerFiles, UserDefinedEmbeddingModel,
};
use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
use std::sync::{Arc, Mutex};
use tokio::fs;

/// One text together with the instruction that frames it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionPair {
    pub instruction: String,
    pub text: String,
}

impl InstructionPair {
    pub fn new(instruction: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            text: text.into(),
        }
    }

    /// The string actually fed to the model.
    pub fn prompt(&self) -> String {
        if self.instruction.is_empty() {
            self.text.clone()
        } else {
            format!("{} {}", self.instruction, self.text)
        }
    }
}

/// Frame every text with the same instruction.
pub fn instruction_pairs(instruction: &str, texts: &[String]) -> Vec<InstructionPair> {
    texts
        .iter()
        .map(|text| InstructionPair::new(instruction, text.as_str()))
        .collect()
}

/// A worker that turns instruction-framed texts into fixed-length vectors.
///
/// Implementations are bound to one device, hold nothing but fixed model
/// weights, and return one vector per input in input order.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Encode `inputs`, running inference `batch_size` texts at a time.
    async fn encode(&self, inputs: &[InstructionPair], batch_size: usize) -> Result<Vec<Vec<f32>>>;

    /// Length of every vector this encoder produces
    fn dimension(&self) -> usize;

    /// Device this encoder is bound to
    fn device(&self) -> Device;

    /// Get the name/identifier of this encoder
    fn name(&self) -> &str;
}

/// fastembed (ONNX runtime) encoder bound to one device
pub struct FastEmbedEncoder {
    config: EmbedConfig,
    device: Device,
    model: Arc<Mutex<TextEmbedding>>,
    dimension: usize,
}

impl std::fmt::Debug for FastEmbedEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedEncoder")
            .field("model", &self.config.model_name)
            .field("device", &self.device)
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl FastEmbedEncoder {
    /// Load the configured model onto `device` and validate it.
    ///
    /// User-defined models must already be on disk (see
    /// [`ModelDownloader`](crate::ModelDownloader)); built-in models are
    /// fetched into `model_base_path` by fastembed.
    pub async fn load(config: EmbedConfig, device: Device) -> Result<Self> {
        tracing::info!("Loading {} on {}", config.model_name, device);
        if device.is_accelerator() && !cuda_available() {
            return Err(EmbedError::invalid_config(format!(
                "{device} requested but onnxruntime has no CUDA provider (build with the `cuda` feature)"
            )));
        }

        let model = if config.is_huggingface_model() {
            config.validate()?;
            Self::load_user_defined_model(&config, device).await?
        } else {
            let cache_dir = config.model_base_path.clone();
            tokio::task::spawn_blocking(move || {
                let options = InitOptions::new(EmbeddingModel::BGEBaseENV15)
                    .with_cache_dir(cache_dir)
                    .with_execution_providers(execution_providers(device))
                    .with_show_download_progress(false);
                TextEmbedding::try_new(options).map_err(|e| EmbedError::model_init(device, e))
            })
            .await??
        };

        let mut encoder = Self {
            config,
            device,
            model: Arc::new(Mutex::new(model)),
            dimension: 0,
        };
        encoder.dimension = encoder.probe_dimension().await?;

        tracing::info!(
            "Encoder {} ready on {} (dimension {})",
            encoder.config.model_name,
            device,
            encoder.dimension
        );
        Ok(encoder)
    }

    /// Load a user-defined ONNX model from downloaded HuggingFace files
    async fn load_user_defined_model(config: &EmbedConfig, device: Device) -> Result<TextEmbedding> {
        let tokenizer_config = config.tokenizer_config();

        let onnx_file = fs::read(config.onnx_model_path()).await?;
        let tokenizer_file = fs::read(&tokenizer_config.tokenizer_path).await?;
        let config_file = fs::read(&tokenizer_config.config_path).await?;
        let special_tokens_map_file = fs::read(&tokenizer_config.special_tokens_map_path).await?;

        let tokenizer_config_file = match &tokenizer_config.tokenizer_config_path {
            Some(path) if path.exists() => fs::read(path).await?,
            _ => {
                let minimal_config = serde_json::json!({
                    "clean_up_tokenization_spaces": true,
                    "do_lower_case": false,
                    "model_max_length": 512,
                    "tokenizer_class": "BertTokenizer"
                });
                serde_json::to_vec_pretty(&minimal_config)
                    .map_err(|e| EmbedError::External(e.into()))?
            }
        };

        let tokenizer_files = TokenizerFiles {
            tokenizer_file,
            config_file,
            special_tokens_map_file,
            tokenizer_config_file,
        };
        let user_model = UserDefinedEmbeddingModel::new(onnx_file, tokenizer_files);

        let model = tokio::task::spawn_blocking(move || {
            let options =
                InitOptionsUserDefined::new().with_execution_providers(execution_providers(device));
            TextEmbedding::try_new_from_user_defined(user_model, options)
                .map_err(|e| EmbedError::model_init(device, e))
        })
        .await??;

        Ok(model)
    }

    /// Embed a probe text and check the output is usable.
    async fn probe_dimension(&self) -> Result<usize> {
        let model = Arc::clone(&self.model);
        let device = self.device;
        let probe = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
            let mut guard = model
                .lock()
                .map_err(|_| EmbedError::invalid_config("encoder model lock poisoned"))?;
            guard
                .embed(vec!["validation test".to_string()], None)
                .map_err(|e| EmbedError::model_init(device, e))
        })
        .await??;

        let embedding = probe.first().ok_or_else(|| {
            EmbedError::invalid_config("Model validation failed: no embeddings generated")
        })?;
        if embedding.is_empty() {
            return Err(EmbedError::invalid_config(
                "Model validation failed: empty embedding",
            ));
        }
        if embedding.iter().any(|value| !value.is_finite()) {
            return Err(EmbedError::invalid_config(
                "Model validation failed: non-finite values in embedding",
            ));
        }
        Ok(embedding.len())
    }
}

#[async_trait]
impl Encoder for FastEmbedEncoder {
    async fn encode(&self, inputs: &[InstructionPair], batch_size: usize) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        tracing::debug!("Encoding {} texts on {}", inputs.len(), self.device);

        let prompts: Vec<String> = inputs.iter().map(InstructionPair::prompt).collect();
        let model = Arc::clone(&self.model);
        let device = self.device;
        let batch_size = batch_size.max(1);

        let mut vectors = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
            let mut guard = model
                .lock()
                .map_err(|_| EmbedError::embedding_gen(device, anyhow::anyhow!("model lock poisoned")))?;
            guard
                .embed(prompts, Some(batch_size))
                .map_err(|e| EmbedError::embedding_gen(device, e))
        })
        .await??;

        if vectors.len() != inputs.len() {
            return Err(EmbedError::embedding_gen(
                device,
                anyhow::anyhow!("expected {} vectors, got {}", inputs.len(), vectors.len()),
            ));
        }
        if self.config.normalize {
            vectors.iter_mut().for_each(|v| normalize(v));
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn device(&self) -> Device {
        self.device
    }

    fn name(&self) -> &str {
        "fastembed"
    }
}

/// Whether the linked onnxruntime can run the CUDA execution provider.
///
/// Always false unless the crate is built with the `cuda` feature, which pulls
/// the CUDA build of onnxruntime.
pub fn cuda_available() -> bool {
    match CUDAExecutionProvider::default().is_available() {
        Ok(available) => available,
        Err(e) => {
            tracing::debug!("CUDA provider check failed: {}", e);
            false
        }
    }
}

/// Execution providers for a device; an empty list means the CPU provider.
fn execution_providers(device: Device) -> Vec<ExecutionProviderDispatch> {
    match device {
        Device::Cpu => Vec::new(),
        Device::Cuda(ordinal) => vec![
            CUDAExecutionProvider::default()
                .with_device_id(ordinal as i32)
                .build()
                .error_on_failure(),
        ],
    }
}

/// Scale a vector to unit L2 norm in place; zero vectors are left alone.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_prompt() {
        let pair = InstructionPair::new("Represent the abstract:", "Dark matter halos.");
        assert_eq!(pair.prompt(), "Represent the abstract: Dark matter halos.");
        assert_eq!(InstructionPair::new("", "bare").prompt(), "bare");
    }

    #[test]
    fn test_instruction_pairs_preserve_order() {
        let texts = vec!["a".to_string(), "b".to_string()];
        let pairs = instruction_pairs("inst", &texts);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1], InstructionPair::new("inst", "b"));
    }

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_cpu_build_has_no_cuda_provider() {
        assert!(!cuda_available());
    }

    #[cfg(not(feature = "cuda"))]
    #[tokio::test]
    async fn test_cuda_worker_fails_clearly_without_cuda_build() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = FastEmbedEncoder::load(EmbedConfig::builtin(temp_dir.path()), Device::Cuda(0))
            .await
            .unwrap_err();
        assert!(matches!(err, EmbedError::InvalidConfig { .. }));
        assert!(err.to_string().contains("cuda:0"));
    }

    #[tokio::test]
    #[ignore] // Downloads the built-in model: cargo test -p rxiv-embed -- --ignored
    async fn test_builtin_model_encodes_on_cpu() -> Result<()> {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .try_init()
            .ok();

        let temp_dir = tempfile::tempdir()?;
        let encoder = FastEmbedEncoder::load(EmbedConfig::builtin(temp_dir.path()), Device::Cpu).await?;
        assert_eq!(encoder.dimension(), 768);

        let inputs = instruction_pairs(
            crate::DEFAULT_INSTRUCTION,
            &[
                "We measure the Hubble constant.".to_string(),
                "Gravitational lensing constrains dark matter.".to_string(),
            ],
        );
        let first = encoder.encode(&inputs, 8).await?;
        let second = encoder.encode(&inputs, 1).await?;
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|v| v.len() == 768));

        // Same weights and inputs give the same vectors regardless of batching.
        for (a, b) in first.iter().zip(&second) {
            let diff: f32 = a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum();
            assert!(diff < 1e-3);
        }
        Ok(())
    }
}
