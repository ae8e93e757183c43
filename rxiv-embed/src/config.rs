//! Configuration for encoder models

use crate::error::{EmbedError, Result};
use derive_builder::Builder;
use fnv::FnvHasher;
use serde::{Deserialize, Serialize};
use std::hash::Hasher;
use std::path::{Path, PathBuf};

/// Retrieval framing prepended to every text of a run.
pub const DEFAULT_INSTRUCTION: &str =
    "Represent the science paragraph to retrieve the supporting document.";

/// Name of the fastembed built-in model used when no HuggingFace repo is configured.
pub const DEFAULT_MODEL_NAME: &str = "bge-base-en-v1.5";

/// Where the tokenizer files of a downloaded model live
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into))]
pub struct TokenizerConfig {
    pub tokenizer_path: PathBuf,
    /// The model's `config.json`
    pub config_path: PathBuf,
    pub special_tokens_map_path: PathBuf,
    /// Optional; a minimal BERT tokenizer config is synthesized when absent
    #[builder(default)]
    pub tokenizer_config_path: Option<PathBuf>,
}

impl TokenizerConfig {
    pub fn builder() -> TokenizerConfigBuilder {
        TokenizerConfigBuilder::default()
    }

    /// HuggingFace layout: every file at the top of `model_dir`
    pub fn standard<P: AsRef<Path>>(model_dir: P) -> Self {
        let dir = model_dir.as_ref();
        Self {
            tokenizer_path: dir.join("tokenizer.json"),
            config_path: dir.join("config.json"),
            special_tokens_map_path: dir.join("special_tokens_map.json"),
            tokenizer_config_path: Some(dir.join("tokenizer_config.json")),
        }
    }

    /// Required files, labelled for error messages
    fn required(&self) -> [(&'static str, &Path); 3] {
        [
            ("tokenizer", self.tokenizer_path.as_path()),
            ("model config", self.config_path.as_path()),
            ("special tokens map", self.special_tokens_map_path.as_path()),
        ]
    }

    /// Fail with [`EmbedError::ModelFileNotFound`] on the first missing required file.
    pub fn validate(&self) -> Result<()> {
        if let Some((label, path)) = self.required().into_iter().find(|(_, p)| !p.exists()) {
            tracing::error!("Tokenizer {} missing at {}", label, path.display());
            return Err(EmbedError::ModelFileNotFound {
                path: path.to_path_buf(),
            });
        }

        match &self.tokenizer_config_path {
            Some(path) if !path.exists() => tracing::warn!(
                "No tokenizer config at {}, a minimal one will be used",
                path.display()
            ),
            _ => {}
        }
        Ok(())
    }
}

/// Configuration shared by every encoder worker of a run
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate_batch_size"))]
pub struct EmbedConfig {
    /// Directory holding downloaded models and the fastembed cache
    #[builder(default = r#"PathBuf::from("models")"#)]
    pub model_base_path: PathBuf,
    /// Name of the model, also the directory name of a downloaded model
    #[builder(default = "DEFAULT_MODEL_NAME.to_string()")]
    pub model_name: String,
    /// HuggingFace repository of a user-defined ONNX model (e.g. "hkunlp/instructor-base")
    #[builder(default)]
    pub hf_model_repo: Option<String>,
    /// HuggingFace revision/branch
    #[builder(default = r#"Some("main".to_string())"#)]
    pub hf_revision: Option<String>,
    /// ONNX file inside the repository
    #[builder(default = r#""onnx/model.onnx".to_string()"#)]
    pub onnx_file: String,
    /// Texts per inference call
    #[builder(default = "8")]
    pub batch_size: usize,
    /// Whether to L2-normalize vectors
    #[builder(default = "true")]
    pub normalize: bool,
    /// Instruction prefixed to every text
    #[builder(default = "DEFAULT_INSTRUCTION.to_string()")]
    pub instruction: String,
    /// Tokenizer configuration, only used for user-defined models
    #[builder(default)]
    pub tokenizer_config: Option<TokenizerConfig>,
}

impl EmbedConfigBuilder {
    fn validate_batch_size(&self) -> std::result::Result<(), String> {
        match self.batch_size {
            Some(0) => Err("batch_size must be at least 1".to_string()),
            _ => Ok(()),
        }
    }
}

impl EmbedConfig {
    pub fn builder() -> EmbedConfigBuilder {
        EmbedConfigBuilder::default()
    }

    /// Configuration for the built-in model, cached under `model_base_path`
    pub fn builtin<P: AsRef<Path>>(model_base_path: P) -> Self {
        Self {
            model_base_path: model_base_path.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Configuration for a user-defined ONNX model hosted on HuggingFace
    pub fn from_huggingface<P: AsRef<Path>>(
        model_base_path: P,
        model_name: impl Into<String>,
        hf_repo: impl Into<String>,
    ) -> Self {
        let model_base_path = model_base_path.as_ref().to_path_buf();
        let model_name = model_name.into();
        let tokenizer_config = TokenizerConfig::standard(model_base_path.join(&model_name));
        Self {
            model_base_path,
            model_name,
            hf_model_repo: Some(hf_repo.into()),
            tokenizer_config: Some(tokenizer_config),
            ..Self::default()
        }
    }

    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            ..self
        }
    }

    pub fn with_instruction<S: Into<String>>(self, instruction: S) -> Self {
        Self {
            instruction: instruction.into(),
            ..self
        }
    }

    pub fn with_normalize(self, normalize: bool) -> Self {
        Self { normalize, ..self }
    }

    /// `<model_base_path>/<model_name>`
    pub fn model_path(&self) -> PathBuf {
        self.model_base_path.join(&self.model_name)
    }

    pub fn onnx_model_path(&self) -> PathBuf {
        self.model_path().join(&self.onnx_file)
    }

    /// True when the model comes from a HuggingFace repo rather than fastembed's catalog
    pub fn is_huggingface_model(&self) -> bool {
        self.hf_repo().is_some()
    }

    pub fn hf_repo(&self) -> Option<&str> {
        self.hf_model_repo.as_deref()
    }

    /// Branch or commit to download, `main` unless set
    pub fn hf_revision(&self) -> &str {
        self.hf_revision.as_deref().unwrap_or("main")
    }

    /// Tokenizer layout of a user-defined model, defaulting to the standard one
    pub fn tokenizer_config(&self) -> TokenizerConfig {
        self.tokenizer_config
            .clone()
            .unwrap_or_else(|| TokenizerConfig::standard(self.model_path()))
    }

    /// Stable identifier of everything that influences the produced vectors.
    ///
    /// Local paths and batch size are excluded: they change where and how fast
    /// a model runs, not what it outputs.
    pub fn fingerprint(&self) -> String {
        let identity = serde_json::json!({
            "model_name": self.model_name,
            "hf_model_repo": self.hf_model_repo,
            "hf_revision": self.hf_revision(),
            "onnx_file": self.onnx_file,
            "normalize": self.normalize,
            "instruction": self.instruction,
        });

        let mut hasher = FnvHasher::default();
        hasher.write(b"v1:");
        hasher.write(identity.to_string().as_bytes());
        format!("v1:{:x}", hasher.finish())
    }

    /// Check a user-defined model is fully on disk. Built-in models always pass;
    /// fastembed fetches them itself.
    pub fn validate(&self) -> Result<()> {
        if !self.is_huggingface_model() {
            return Ok(());
        }

        let onnx = self.onnx_model_path();
        if !onnx.exists() {
            tracing::error!("ONNX weights of {} missing at {}", self.model_name, onnx.display());
            return Err(EmbedError::ModelFileNotFound { path: onnx });
        }
        self.tokenizer_config().validate()
    }
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            model_base_path: PathBuf::from("models"),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            hf_model_repo: None,
            hf_revision: Some("main".to_string()),
            onnx_file: "onnx/model.onnx".to_string(),
            batch_size: 8,
            normalize: true,
            instruction: DEFAULT_INSTRUCTION.to_string(),
            tokenizer_config: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_builder_defaults() {
        let config = EmbedConfig::builder().build().unwrap();

        assert_eq!(config.model_base_path, PathBuf::from("models"));
        assert_eq!(config.model_name, DEFAULT_MODEL_NAME);
        assert_eq!(config.batch_size, 8);
        assert!(config.normalize);
        assert_eq!(config.instruction, DEFAULT_INSTRUCTION);
        assert_eq!(config.hf_revision(), "main");
        assert!(!config.is_huggingface_model());
    }

    #[test]
    fn test_builder_rejects_zero_batch() {
        assert!(EmbedConfig::builder().batch_size(0usize).build().is_err());
    }

    #[test]
    fn test_huggingface_paths() {
        let temp_dir = tempdir().unwrap();
        let config =
            EmbedConfig::from_huggingface(temp_dir.path(), "instructor-base", "hkunlp/instructor-base");

        let model_dir = temp_dir.path().join("instructor-base");
        assert!(config.is_huggingface_model());
        assert_eq!(config.hf_repo(), Some("hkunlp/instructor-base"));
        assert_eq!(config.model_path(), model_dir);
        assert_eq!(
            config.onnx_model_path(),
            model_dir.join("onnx").join("model.onnx")
        );
        assert_eq!(
            config.tokenizer_config().tokenizer_path,
            model_dir.join("tokenizer.json")
        );
    }

    #[test]
    fn test_validate_reports_missing_onnx() {
        let temp_dir = tempdir().unwrap();
        let config = EmbedConfig::from_huggingface(temp_dir.path(), "m", "org/m");
        match config.validate() {
            Err(EmbedError::ModelFileNotFound { path }) => {
                assert!(path.ends_with("onnx/model.onnx"))
            }
            other => panic!("unexpected validation result: {other:?}"),
        }
        assert!(EmbedConfig::builtin(temp_dir.path()).validate().is_ok());
    }

    #[test]
    fn test_fingerprint_tracks_model_identity_only() {
        let base = EmbedConfig::builtin("/a");
        let moved = EmbedConfig::builtin("/b").with_batch_size(64);
        assert_eq!(base.fingerprint(), moved.fingerprint());
        assert!(base.fingerprint().starts_with("v1:"));

        let reframed = base.clone().with_instruction("Represent the title:");
        assert_ne!(base.fingerprint(), reframed.fingerprint());

        let other_model = EmbedConfig::from_huggingface("/a", "m", "org/m");
        assert_ne!(base.fingerprint(), other_model.fingerprint());
    }
}
