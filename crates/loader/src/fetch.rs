use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

use crate::error::FetchError;

/// Brings a source file onto local disk.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Write the payload at `url` to `dest`, returning the byte count.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchError>;
}

/// `file://` URL or bare path → local path. `None` for remote URLs.
fn local_path(location: &str) -> Result<Option<PathBuf>, FetchError> {
    match Url::parse(location) {
        Ok(url) if url.scheme() == "file" => url
            .to_file_path()
            .map(Some)
            .map_err(|_| FetchError::InvalidLocation(location.to_string())),
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Ok(None),
        // Windows drive letters parse as a one-letter scheme.
        Ok(url) if url.scheme().len() > 1 => Err(FetchError::InvalidLocation(location.to_string())),
        _ => Ok(Some(PathBuf::from(location))),
    }
}

/// Copies local files, addressed by `file://` URL or plain path.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileFetcher;

#[async_trait]
impl SourceFetcher for FileFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        let src = local_path(url)?.ok_or_else(|| FetchError::InvalidLocation(url.to_string()))?;
        Ok(tokio::fs::copy(&src, dest).await?)
    }
}

/// Streams HTTP(S) bodies to disk; local locations are delegated to [`FileFetcher`].
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(
        user_agent: &str,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        if local_path(url)?.is_some() {
            return FileFetcher.fetch(url, dest).await;
        }

        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = resp.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        debug!(url, bytes = written, "downloaded");
        Ok(written)
    }
}

/// Fetch `url` into a fresh temp file under `staging_dir`. The file is
/// removed when the returned handle is dropped.
pub async fn stage(
    fetcher: &dyn SourceFetcher,
    url: &str,
    staging_dir: &Path,
    suffix: &str,
) -> Result<NamedTempFile, FetchError> {
    tokio::fs::create_dir_all(staging_dir).await?;
    let staged = tempfile::Builder::new()
        .prefix("tlc-")
        .suffix(suffix)
        .tempfile_in(staging_dir)?;
    fetcher.fetch(url, staged.path()).await?;
    Ok(staged)
}
