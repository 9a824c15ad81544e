//! Content loaders
//!
//! A loader turns a content reference into raw bytes plus a media type.
//! Failures carry their [`ErrorClass`](sdk::errors::ErrorClass) through
//! `EngineError` so the cache can decide whether a retry is worthwhile.

use async_trait::async_trait;
use reqwest::Client;
use sdk::errors::EngineError;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::fs_guard::FileSystemGuard;

/// Bytes returned by a loader
#[derive(Debug, Clone)]
pub struct Fetched {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

impl Fetched {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            bytes: text.into().into_bytes(),
            media_type: "text/plain".to_string(),
        }
    }
}

/// Source of content for the cache
#[async_trait]
pub trait ContentLoader: Send + Sync {
    /// Fetch the content behind `reference`
    async fn fetch(&self, reference: &str) -> Result<Fetched, EngineError>;
}

/// True for references that should go over HTTP
pub fn is_remote(reference: &str) -> bool {
    reference.starts_with("http://") || reference.starts_with("https://")
}

/// Guess a media type from a file extension
pub fn media_type_for(path: &Path, bytes: &[u8]) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    let media = match ext.as_deref() {
        Some("md") | Some("markdown") => "text/markdown",
        Some("txt") | Some("prompt") => "text/plain",
        Some("json") => "application/json",
        Some("toml") => "application/toml",
        Some("yaml") | Some("yml") => "application/yaml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("pdf") => "application/pdf",
        _ if std::str::from_utf8(bytes).is_ok() => "text/plain",
        _ => "application/octet-stream",
    };
    media.to_string()
}

/// Loads files from the workspace checkout
#[derive(Debug, Clone)]
pub struct FsLoader {
    guard: FileSystemGuard,
}

impl FsLoader {
    pub fn new(guard: FileSystemGuard) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl ContentLoader for FsLoader {
    async fn fetch(&self, reference: &str) -> Result<Fetched, EngineError> {
        let path = self.guard.resolve(reference)?;
        let bytes = tokio::fs::read(&path).await?;
        debug!("Loaded {} bytes from {}", bytes.len(), path.display());
        let media_type = media_type_for(&path, &bytes);
        Ok(Fetched { bytes, media_type })
    }
}

/// Loads content over HTTP GET
#[derive(Debug, Clone)]
pub struct HttpLoader {
    client: Client,
}

impl HttpLoader {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }
}

impl Default for HttpLoader {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl ContentLoader for HttpLoader {
    async fn fetch(&self, reference: &str) -> Result<Fetched, EngineError> {
        let response = self.client.get(reference).send().await.map_err(|e| {
            if e.is_timeout() {
                EngineError::Timeout(reference.to_string())
            } else {
                EngineError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::from_status(
                status.as_u16(),
                format!("{}: {}", reference, body.trim()),
            ));
        }

        let media_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?
            .to_vec();

        debug!("Fetched {} bytes from {}", bytes.len(), reference);
        let media_type =
            media_type.unwrap_or_else(|| media_type_for(Path::new(reference), &bytes));
        Ok(Fetched { bytes, media_type })
    }
}

/// Routes URLs to [`HttpLoader`] and everything else to [`FsLoader`]
pub struct WorkspaceLoader {
    fs: FsLoader,
    http: HttpLoader,
}

impl WorkspaceLoader {
    pub fn new(guard: FileSystemGuard) -> Self {
        Self {
            fs: FsLoader::new(guard),
            http: HttpLoader::default(),
        }
    }
}

#[async_trait]
impl ContentLoader for WorkspaceLoader {
    async fn fetch(&self, reference: &str) -> Result<Fetched, EngineError> {
        if is_remote(reference) {
            self.http.fetch(reference).await
        } else {
            self.fs.fetch(reference).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::errors::{DuelErrorExt, ErrorClass};
    use tempfile::TempDir;

    #[test]
    fn test_media_type_guess() {
        assert_eq!(media_type_for(Path::new("a/b.md"), b"x"), "text/markdown");
        assert_eq!(media_type_for(Path::new("noext"), b"plain"), "text/plain");
        assert_eq!(
            media_type_for(Path::new("blob"), &[0xff, 0xfe, 0x00]),
            "application/octet-stream"
        );
    }

    #[tokio::test]
    async fn test_fs_loader_reads_workspace_file() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("prompt.md"), "# Expert").unwrap();
        let loader = FsLoader::new(FileSystemGuard::new(temp.path().to_path_buf()).unwrap());

        let fetched = loader.fetch("prompt.md").await.unwrap();
        assert_eq!(fetched.bytes, b"# Expert");
        assert_eq!(fetched.media_type, "text/markdown");
    }

    #[tokio::test]
    async fn test_fs_loader_missing_file_is_permanent() {
        let temp = TempDir::new().unwrap();
        let loader = FsLoader::new(FileSystemGuard::new(temp.path().to_path_buf()).unwrap());

        let err = loader.fetch("missing.md").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Permanent);
    }
}
