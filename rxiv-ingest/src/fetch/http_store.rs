//! S3-compatible object store over plain HTTP

use super::{FetchError, ObjectStore};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Fetches `{endpoint}/{bucket}/{key}` with reqwest.
///
/// Requests are not signed; point the endpoint at a signing proxy for buckets
/// that need credentials.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: Client,
    endpoint: String,
    bucket: String,
    requester_pays: bool,
}

impl HttpObjectStore {
    pub fn new(endpoint: impl Into<String>, bucket: impl Into<String>, requester_pays: bool) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            requester_pays,
        }
    }

    pub fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint,
            self.bucket,
            key.trim_start_matches('/')
        )
    }
}

/// Map a non-success status to the retry class of the failure.
fn status_error(key: &str, status: StatusCode) -> FetchError {
    let key = key.to_string();
    if status == StatusCode::NOT_FOUND {
        FetchError::NotFound { key }
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        FetchError::Transient {
            key,
            reason: status.to_string(),
        }
    } else {
        FetchError::Fatal {
            key,
            reason: status.to_string(),
        }
    }
}

fn request_error(key: &str, error: reqwest::Error) -> FetchError {
    let key = key.to_string();
    if error.is_connect() || error.is_timeout() || error.is_request() || error.is_body() {
        FetchError::Transient {
            key,
            reason: error.to_string(),
        }
    } else {
        FetchError::Fatal {
            key,
            reason: error.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn get(&self, key: &str, dest: &Path) -> Result<u64, FetchError> {
        let mut request = self.client.get(self.object_url(key));
        if self.requester_pays {
            request = request.header("x-amz-request-payer", "requester");
        }

        let mut response = request.send().await.map_err(|e| request_error(key, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(key, status));
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| FetchError::io(dest, e))?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(|e| request_error(key, e))? {
            file.write_all(&chunk)
                .await
                .map_err(|e| FetchError::io(dest, e))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| FetchError::io(dest, e))?;

        tracing::debug!("Fetched {} ({} bytes)", key, written);
        Ok(written)
    }
}
