//! Run configuration from `.env` and the process environment

use rxiv_embed::{DEFAULT_INSTRUCTION, EmbedConfig};
use std::path::PathBuf;
use std::str::FromStr;

/// Default S3-compatible endpoint of the bulk data bucket
pub const DEFAULT_OBJECT_STORE_URL: &str = "https://s3.amazonaws.com";

/// Default bucket of the arXiv bulk data
pub const DEFAULT_BUCKET: &str = "arxiv";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Everything a run needs to know about its environment.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Root of all local data (`DATA_PATH`)
    pub data_path: PathBuf,
    /// Explicit encoder device count; `None` means discover
    pub devices: Option<usize>,
    pub batch_size: usize,
    /// Persist the index after this many merged containers
    pub checkpoint_every: usize,
    /// Attempts per container before it is reported failed
    pub max_attempts: usize,
    pub instruction: String,
    /// HuggingFace repository of an ONNX model; the built-in model otherwise
    pub model_repo: Option<String>,
    pub model_dir: PathBuf,
    pub object_store_url: String,
    pub bucket: String,
    pub requester_pays: bool,
    pub fetch_concurrency: usize,
    pub fetch_retries: u32,
}

impl IngestConfig {
    /// Load `.env` (if any) and read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!("Ignoring unreadable .env file: {}", e),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let data_path = PathBuf::from(get("DATA_PATH").ok_or(ConfigError::Missing("DATA_PATH"))?);
        let model_dir = get("RXIV_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_path.join("models"));

        let config = Self {
            devices: parse_opt(&get, "RXIV_DEVICES")?,
            batch_size: parse_opt(&get, "RXIV_BATCH_SIZE")?.unwrap_or(8),
            checkpoint_every: parse_opt(&get, "RXIV_CHECKPOINT_EVERY")?.unwrap_or(16),
            max_attempts: parse_opt(&get, "RXIV_MAX_ATTEMPTS")?.unwrap_or(2),
            instruction: get("RXIV_INSTRUCTION").unwrap_or_else(|| DEFAULT_INSTRUCTION.to_string()),
            model_repo: get("RXIV_MODEL_REPO"),
            model_dir,
            object_store_url: get("RXIV_OBJECT_STORE_URL")
                .unwrap_or_else(|| DEFAULT_OBJECT_STORE_URL.to_string()),
            bucket: get("RXIV_BUCKET").unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
            requester_pays: parse_bool(&get, "RXIV_REQUESTER_PAYS")?.unwrap_or(true),
            fetch_concurrency: parse_opt(&get, "RXIV_FETCH_CONCURRENCY")?.unwrap_or(8),
            fetch_retries: parse_opt(&get, "RXIV_FETCH_RETRIES")?.unwrap_or(3),
            data_path,
        };

        for (key, value) in [
            ("RXIV_BATCH_SIZE", config.batch_size),
            ("RXIV_CHECKPOINT_EVERY", config.checkpoint_every),
            ("RXIV_MAX_ATTEMPTS", config.max_attempts),
            ("RXIV_FETCH_CONCURRENCY", config.fetch_concurrency),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    value: "0".to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
        }

        Ok(config)
    }

    /// `<DATA_PATH>/arxiv`, the root of fetched objects
    pub fn arxiv_dir(&self) -> PathBuf {
        self.data_path.join("arxiv")
    }

    /// Directory of the OAI-PMH export containers
    pub fn xml_dir(&self) -> PathBuf {
        self.arxiv_dir().join("xml")
    }

    /// Directory of the persisted vector index
    pub fn index_dir(&self) -> PathBuf {
        self.arxiv_dir().join("index")
    }

    /// Encoder settings for this run
    pub fn embed_config(&self) -> EmbedConfig {
        let base = match &self.model_repo {
            Some(repo) => {
                let name = model_name_from_repo(repo);
                EmbedConfig::from_huggingface(&self.model_dir, name, repo.clone())
            }
            None => EmbedConfig::builtin(&self.model_dir),
        };
        base.with_batch_size(self.batch_size)
            .with_instruction(self.instruction.clone())
    }
}

/// Local directory name of a HuggingFace repository (`org/name` -> `name`).
fn model_name_from_repo(repo: &str) -> &str {
    repo.rsplit('/').next().filter(|s| !s.is_empty()).unwrap_or(repo)
}

fn parse_opt<T, G>(get: &G, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|value| {
            value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                key,
                value: value.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn parse_bool<G>(get: &G, key: &'static str) -> Result<Option<bool>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|value| match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key,
                value: value.clone(),
                reason: "expected a boolean".to_string(),
            }),
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = IngestConfig::from_lookup(lookup(&[("DATA_PATH", "/data")])).unwrap();

        assert_eq!(config.data_path, PathBuf::from("/data"));
        assert_eq!(config.devices, None);
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.checkpoint_every, 16);
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.instruction, DEFAULT_INSTRUCTION);
        assert_eq!(config.model_dir, PathBuf::from("/data/models"));
        assert_eq!(config.bucket, "arxiv");
        assert!(config.requester_pays);
        assert_eq!(config.xml_dir(), PathBuf::from("/data/arxiv/xml"));
        assert_eq!(config.index_dir(), PathBuf::from("/data/arxiv/index"));
    }

    #[test]
    fn test_missing_data_path() {
        assert!(matches!(
            IngestConfig::from_lookup(lookup(&[])),
            Err(ConfigError::Missing("DATA_PATH"))
        ));
        assert!(IngestConfig::from_lookup(lookup(&[("DATA_PATH", "  ")])).is_err());
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let config = IngestConfig::from_lookup(lookup(&[
            ("DATA_PATH", "/data"),
            ("RXIV_DEVICES", "4"),
            ("RXIV_REQUESTER_PAYS", "no"),
            ("RXIV_MODEL_REPO", "hkunlp/instructor-base"),
        ]))
        .unwrap();
        assert_eq!(config.devices, Some(4));
        assert!(!config.requester_pays);

        let embed = config.embed_config();
        assert_eq!(embed.model_name, "instructor-base");
        assert_eq!(embed.hf_repo(), Some("hkunlp/instructor-base"));

        let err = IngestConfig::from_lookup(lookup(&[("DATA_PATH", "/d"), ("RXIV_BATCH_SIZE", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("RXIV_BATCH_SIZE"));

        assert!(
            IngestConfig::from_lookup(lookup(&[("DATA_PATH", "/d"), ("RXIV_MAX_ATTEMPTS", "0")]))
                .is_err()
        );
    }
}
