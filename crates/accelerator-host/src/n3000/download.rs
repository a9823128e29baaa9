//! Firmware download with MD5 verification

use crate::error::HostError;
use async_trait::async_trait;
use md5::{Digest, Md5};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Fetches firmware artifacts into a work directory.
#[derive(Debug, Clone)]
pub struct FirmwareDownloader {
    client: reqwest::Client,
    workdir: PathBuf,
}

fn file_name_for(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("firmware-{}", uuid::Uuid::new_v4()))
}

fn check_digest(path: &Path, actual: &str, expected: &str) -> Result<(), HostError> {
    if expected.is_empty() || actual.eq_ignore_ascii_case(expected.trim()) {
        return Ok(());
    }
    Err(HostError::ChecksumMismatch {
        path: path.to_path_buf(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    })
}

impl FirmwareDownloader {
    pub fn new(client: reqwest::Client, workdir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            workdir: workdir.into(),
        }
    }

    /// Downloads `url` and verifies its MD5 when `checksum` is non-empty.
    ///
    /// A file failing verification is deleted before the error is returned.
    pub async fn fetch(&self, url: &str, checksum: &str) -> Result<PathBuf, HostError> {
        let dest = self.workdir.join(file_name_for(url));
        info!("Downloading {} to {}", url, dest.display());

        let download_err = |source| HostError::Download {
            url: url.to_string(),
            source,
        };
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(download_err)?;

        let mut file = tokio::fs::File::create(&dest)
            .await
            .map_err(|e| HostError::io("create", &dest, e))?;
        let mut hasher = Md5::new();
        while let Some(chunk) = response.chunk().await.map_err(download_err)? {
            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|e| HostError::io("write", &dest, e))?;
        }
        file.flush().await.map_err(|e| HostError::io("write", &dest, e))?;

        let actual = hex::encode(hasher.finalize());
        if let Err(e) = check_digest(&dest, &actual, checksum) {
            if let Err(rm) = tokio::fs::remove_file(&dest).await {
                warn!("Failed to remove {}: {}", dest.display(), rm);
            }
            return Err(e);
        }
        Ok(dest)
    }
}

/// Source of firmware artifacts on the local filesystem.
#[async_trait]
pub trait FirmwareFetcher: Send + Sync {
    /// Returns a local path holding the verified artifact.
    async fn fetch(&self, url: &str, checksum: &str) -> Result<PathBuf, HostError>;
}

#[async_trait]
impl FirmwareFetcher for FirmwareDownloader {
    async fn fetch(&self, url: &str, checksum: &str) -> Result<PathBuf, HostError> {
        FirmwareDownloader::fetch(self, url, checksum).await
    }
}

/// Verifies the MD5 of a file already on disk.
pub async fn verify_md5(path: &Path, expected: &str) -> Result<(), HostError> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| HostError::io("read", path, e))?;
    check_digest(path, &hex::encode(Md5::digest(&data)), expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_verify_md5() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.bin");
        tokio::fs::write(&path, b"hello").await.unwrap();

        verify_md5(&path, "5d41402abc4b2a76b9719d911017c592").await.unwrap();
        verify_md5(&path, "5D41402ABC4B2A76B9719D911017C592").await.unwrap();
        verify_md5(&path, "").await.unwrap();
        let err = verify_md5(&path, "00000000000000000000000000000000").await.unwrap_err();
        assert!(matches!(err, HostError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_file_name_from_url() {
        assert_eq!(
            file_name_for("http://mirror.local/images/n3000/user.bin?x=1"),
            "user.bin"
        );
        assert!(file_name_for("http://mirror.local/").starts_with("firmware-"));
    }
}
