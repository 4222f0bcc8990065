use std::{
    path::{Component, Path, PathBuf},
    time::Duration,
};

use crate::render::BlobStore;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("HTTP error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Invalid object path: {0}")]
    InvalidPath(String),
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Stores objects under a local directory that is served at `public_base_url`
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        FsBlobStore {
            root: root.into(),
            public_base_url: public_base_url.into(),
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        let safe = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if !safe || path.is_empty() {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl BlobStore for FsBlobStore {
    type Error = StorageError;

    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, Self::Error> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, bytes).await?;
        tracing::debug!(path = %target.display(), "Wrote object to disk");

        Ok(join_url(&self.public_base_url, path))
    }
}

/// Object storage reachable over HTTP (`PUT {base}/{bucket}/{path}`), with
/// public reads at `{public_base}/{bucket}/{path}`
#[derive(Debug, Clone)]
pub struct HttpBlobStore {
    client: reqwest::Client,
    timeout: Duration,
    base_url: String,
    public_base_url: String,
    bucket: String,
    token: Option<String>,
}

impl HttpBlobStore {
    pub const DEFAULT_BUCKET: &str = "briefings";

    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        HttpBlobStore {
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(60),
            public_base_url: base_url.clone(),
            base_url,
            bucket: Self::DEFAULT_BUCKET.into(),
            token: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    pub fn with_public_base_url(mut self, url: impl Into<String>) -> Self {
        self.public_base_url = url.into();
        self
    }

    fn object_path(&self, path: &str) -> String {
        format!("{}/{}", self.bucket, path.trim_start_matches('/'))
    }
}

impl BlobStore for HttpBlobStore {
    type Error = StorageError;

    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, Self::Error> {
        let object = self.object_path(path);
        let mut request = self
            .client
            .put(join_url(&self.base_url, &object))
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .timeout(self.timeout)
            .body(bytes);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let resp = request
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Failed to make http request"))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(StorageError::Api { status, message });
        }

        Ok(join_url(&self.public_base_url, &object))
    }
}

/// Blob store picked at startup from configuration
#[derive(Debug, Clone)]
pub enum ConfiguredBlobStore {
    Fs(FsBlobStore),
    Http(HttpBlobStore),
}

impl BlobStore for ConfiguredBlobStore {
    type Error = StorageError;

    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, Self::Error> {
        match self {
            ConfiguredBlobStore::Fs(store) => store.put(path, bytes, content_type).await,
            ConfiguredBlobStore::Http(store) => store.put(path, bytes, content_type).await,
        }
    }
}
