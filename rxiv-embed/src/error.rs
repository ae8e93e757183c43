//! Error types for the encoder pool

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, EmbedError>;

/// Everything that can go wrong between reading a model config and
/// returning vectors.
///
/// Only [`EmbedError::EmbeddingGeneration`] is a per-batch failure; the
/// ingestion scheduler retries the container that caused it. Every other
/// variant surfaces while building the encoder pool and ends the run.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("Model file missing: {path}")]
    ModelFileNotFound { path: PathBuf },

    #[error("Invalid encoder configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Could not load model on {device}: {source}")]
    ModelInitialization {
        device: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Encoding failed on {device}: {source}")]
    EmbeddingGeneration {
        device: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Inference runs on the blocking pool; this is a failed join
    #[error("Inference task failed: {0}")]
    AsyncTask(#[from] tokio::task::JoinError),

    #[error(transparent)]
    External(#[from] anyhow::Error),
}

impl EmbedError {
    /// Wrap a model loading failure for the given device.
    pub fn model_init<E>(device: impl ToString, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::ModelInitialization {
            device: device.to_string(),
            source: source.into(),
        }
    }

    /// Wrap a failure that happened while encoding a batch on the given device.
    ///
    /// # Example
    /// ```
    /// use rxiv_embed::EmbedError;
    ///
    /// let err = EmbedError::embedding_gen("cuda:1", anyhow::anyhow!("out of memory"));
    /// assert!(err.is_encode_failure());
    /// assert!(err.to_string().contains("cuda:1"));
    /// ```
    pub fn embedding_gen<E>(device: impl ToString, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::EmbeddingGeneration {
            device: device.to_string(),
            source: source.into(),
        }
    }

    /// Create an invalid configuration error with a custom message.
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Whether this error came from encoding a batch (as opposed to setup).
    pub fn is_encode_failure(&self) -> bool {
        matches!(self, Self::EmbeddingGeneration { .. })
    }
}
