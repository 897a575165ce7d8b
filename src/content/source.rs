//! Where package descriptions and asset bytes come from.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::error::ContentError;
use super::{AssetRef, ContentPackage};
use crate::sync::HttpBackend;

#[async_trait]
pub trait PackageSource: Send + Sync {
    /// Published description of a package.
    async fn package(&self, package_id: &str) -> Result<ContentPackage, ContentError>;

    /// Single attempt at writing one asset to `dest`, verified against its
    /// checksum. Retries are the caller's business.
    async fn fetch_asset(&self, asset: &AssetRef, dest: &Path) -> Result<(), ContentError>;
}

#[async_trait]
impl PackageSource for HttpBackend {
    async fn package(&self, package_id: &str) -> Result<ContentPackage, ContentError> {
        let url = self.endpoint(&["packages", package_id]);
        let path = url.to_string();
        let response = self
            .authorize(self.client().get(url))
            .send()
            .await
            .map_err(|source| ContentError::Http {
                source,
                path: path.clone(),
                bytes_written: 0,
            })?;
        if !response.status().is_success() {
            return Err(ContentError::HttpStatus {
                status: response.status().as_u16(),
                path,
            });
        }
        response
            .json::<ContentPackage>()
            .await
            .map_err(|source| ContentError::Decode { path, source })
    }

    async fn fetch_asset(&self, asset: &AssetRef, dest: &Path) -> Result<(), ContentError> {
        download_asset(self.client(), &asset.url, dest, &asset.sha256).await
    }
}

/// Resolve an asset's manifest path under `root`, refusing anything that
/// could escape it.
pub fn asset_destination(root: &Path, asset: &AssetRef) -> Result<PathBuf, ContentError> {
    let relative = Path::new(&asset.path);
    let mut components = relative.components().peekable();
    if components.peek().is_none() || !components.all(|c| matches!(c, Component::Normal(_))) {
        return Err(ContentError::InvalidAsset(asset.path.clone()));
    }
    Ok(root.join(relative))
}

/// Sibling `.part` file that `dest` is streamed into before the rename.
fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Stream `url` into `dest` through a `.part` file, hashing as it goes.
/// The rename only happens once the SHA-256 matches `sha256_hex`.
pub async fn download_asset(
    client: &Client,
    url: &str,
    dest: &Path,
    sha256_hex: &str,
) -> Result<(), ContentError> {
    let path_str = dest.display().to_string();
    let part = part_path(dest);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }
    // Always start from scratch so the hash covers the whole file.
    let _ = fs::remove_file(&part).await;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|source| ContentError::Http {
            source,
            path: path_str.clone(),
            bytes_written: 0,
        })?;
    if !response.status().is_success() {
        return Err(ContentError::HttpStatus {
            status: response.status().as_u16(),
            path: path_str,
        });
    }

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&part)
        .await?;

    let mut hasher = Sha256::new();
    let mut bytes_written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| {
            tracing::warn!(
                path = %path_str,
                bytes_written,
                error = %source,
                "Asset body interrupted"
            );
            ContentError::Http {
                source,
                path: path_str.clone(),
                bytes_written,
            }
        })?;
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
        bytes_written += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    let actual = format!("{:x}", hasher.finalize());
    if !actual.eq_ignore_ascii_case(sha256_hex.trim()) {
        let _ = fs::remove_file(&part).await;
        return Err(ContentError::ChecksumMismatch(path_str));
    }

    fs::rename(&part, dest).await?;
    tracing::debug!(path = %path_str, bytes = bytes_written, "Fetched asset");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(path: &str) -> AssetRef {
        AssetRef {
            path: path.to_string(),
            url: "http://127.0.0.1:1/a".to_string(),
            sha256: String::new(),
            size_bytes: 0,
        }
    }

    #[test]
    fn test_asset_destination_stays_under_root() {
        let root = Path::new("/data/content/abc");
        assert_eq!(
            asset_destination(root, &asset("audio/gato.mp3")).unwrap(),
            root.join("audio/gato.mp3")
        );
        for bad in ["", "../escape.mp3", "/etc/passwd", "audio/../../x"] {
            assert!(
                matches!(
                    asset_destination(root, &asset(bad)),
                    Err(ContentError::InvalidAsset(_))
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/x/story.json")),
            PathBuf::from("/x/story.json.part")
        );
    }

    #[tokio::test]
    async fn test_unreachable_host_is_retryable_and_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.mp3");
        let err = download_asset(&Client::new(), "http://127.0.0.1:1/a.mp3", &dest, "00")
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }
}
