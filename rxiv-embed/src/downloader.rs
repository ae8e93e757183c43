//! Fetching user-defined ONNX models from the HuggingFace Hub

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use hf_hub::api::tokio::{Api, ApiRepo};
use hf_hub::{Repo, RepoType};
use std::path::{Path, PathBuf};
use tokio::fs;

/// What to do when a file cannot be downloaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnMissing {
    Fail,
    /// Write the standard BERT special tokens instead
    BertSpecialTokens,
    /// The encoder synthesizes a replacement at load time
    Skip,
}

#[derive(Debug, Clone)]
struct ModelFile {
    remote: String,
    local: PathBuf,
    on_missing: OnMissing,
}

/// Copies a model's files out of the hf-hub cache into the model directory.
pub struct ModelDownloader {
    api: Api,
}

impl ModelDownloader {
    /// Uses the token from the environment or the hf-hub cache, if any.
    pub fn new() -> Result<Self> {
        let api = Api::new().map_err(|e| EmbedError::External(e.into()))?;
        Ok(Self { api })
    }

    /// Make sure every file of `config`'s model is on disk.
    ///
    /// A no-op for built-in models and for models already complete.
    pub async fn ensure_model(&self, config: &EmbedConfig) -> Result<()> {
        let Some(repo_id) = config.hf_repo() else {
            return Ok(());
        };
        if is_model_complete(config) {
            tracing::debug!("{} already downloaded", config.model_name);
            return Ok(());
        }

        tracing::info!(
            "Downloading {} ({}@{})",
            config.model_name,
            repo_id,
            config.hf_revision()
        );
        let repo = self.api.repo(Repo::with_revision(
            repo_id.to_string(),
            RepoType::Model,
            config.hf_revision().to_string(),
        ));
        for file in model_files(config) {
            fetch_file(&repo, &file).await?;
        }
        tracing::info!("{} ready in {}", config.model_name, config.model_path().display());
        Ok(())
    }
}

async fn fetch_file(repo: &ApiRepo, file: &ModelFile) -> Result<()> {
    if file.local.exists() {
        return Ok(());
    }
    if let Some(parent) = file.local.parent() {
        fs::create_dir_all(parent).await?;
    }

    match (repo.get(&file.remote).await, file.on_missing) {
        (Ok(cached), _) => {
            fs::copy(&cached, &file.local).await?;
            tracing::debug!("Fetched {}", file.remote);
        }
        (Err(e), OnMissing::BertSpecialTokens) => {
            tracing::warn!("{} unavailable ({}), writing BERT defaults", file.remote, e);
            write_bert_special_tokens(&file.local).await?;
        }
        (Err(e), OnMissing::Skip) => {
            tracing::debug!("{} unavailable ({}), skipping", file.remote, e);
        }
        (Err(e), OnMissing::Fail) => return Err(EmbedError::External(e.into())),
    }
    Ok(())
}

/// True when every file except the optional ones is present.
pub fn is_model_complete(config: &EmbedConfig) -> bool {
    model_files(config)
        .iter()
        .filter(|f| f.on_missing != OnMissing::Skip)
        .all(|f| f.local.exists())
}

fn model_files(config: &EmbedConfig) -> Vec<ModelFile> {
    let tokenizer = config.tokenizer_config();
    let file = |remote: &str, local: PathBuf, on_missing| ModelFile {
        remote: remote.to_string(),
        local,
        on_missing,
    };

    let mut files = vec![
        file(&config.onnx_file, config.onnx_model_path(), OnMissing::Fail),
        file("tokenizer.json", tokenizer.tokenizer_path, OnMissing::Fail),
        file("config.json", tokenizer.config_path, OnMissing::Fail),
        file(
            "special_tokens_map.json",
            tokenizer.special_tokens_map_path,
            OnMissing::BertSpecialTokens,
        ),
    ];
    if let Some(path) = tokenizer.tokenizer_config_path {
        files.push(file("tokenizer_config.json", path, OnMissing::Skip));
    }
    files
}

async fn write_bert_special_tokens(path: &Path) -> Result<()> {
    let tokens = serde_json::json!({
        "cls_token": "[CLS]",
        "sep_token": "[SEP]",
        "unk_token": "[UNK]",
        "pad_token": "[PAD]",
        "mask_token": "[MASK]"
    });
    let body = serde_json::to_vec_pretty(&tokens).map_err(|e| EmbedError::External(e.into()))?;
    fs::write(path, body).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_fresh_directory_is_incomplete() {
        let temp_dir = tempdir().unwrap();
        let config = EmbedConfig::from_huggingface(temp_dir.path(), "m", "org/m");
        assert!(!is_model_complete(&config));
    }

    #[test]
    fn test_tokenizer_config_is_optional() {
        let temp_dir = tempdir().unwrap();
        let config = EmbedConfig::from_huggingface(temp_dir.path(), "m", "org/m");

        for f in model_files(&config) {
            if f.on_missing == OnMissing::Skip {
                continue;
            }
            std::fs::create_dir_all(f.local.parent().unwrap()).unwrap();
            std::fs::write(&f.local, b"{}").unwrap();
        }

        assert!(is_model_complete(&config));
    }

    #[tokio::test]
    async fn test_bert_special_tokens() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("special_tokens_map.json");
        write_bert_special_tokens(&path).await.unwrap();

        let tokens: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(tokens["cls_token"], "[CLS]");
    }

    #[tokio::test]
    async fn test_builtin_model_needs_no_download() -> Result<()> {
        let temp_dir = tempdir().unwrap();
        let downloader = ModelDownloader::new()?;
        downloader
            .ensure_model(&EmbedConfig::builtin(temp_dir.path()))
            .await?;
        assert!(!temp_dir.path().join("bge-base-en-v1.5").exists());
        Ok(())
    }
}
