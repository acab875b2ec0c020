use crate::error::{Error, Result};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::io::{AsyncRead, AsyncWriteExt};

/// Read-only catalog of bundled server binaries.
///
/// Assets are addressed by relative paths such as `server/libserver_arm64.so`.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Whether the asset exists in the catalog
    async fn exists(&self, asset: &str) -> bool;

    /// Last modification time of the asset, if the store knows it
    async fn modified(&self, asset: &str) -> Option<SystemTime>;

    /// Opens the asset for a streaming read
    async fn open(&self, asset: &str) -> io::Result<Box<dyn AsyncRead + Send + Unpin>>;
}

/// Asset store backed by a plain directory
#[derive(Debug, Clone)]
pub struct DirAssetStore {
    root: PathBuf,
}

impl DirAssetStore {
    /// Create a store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the catalog
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, asset: &str) -> PathBuf {
        self.root.join(asset)
    }
}

#[async_trait]
impl AssetStore for DirAssetStore {
    async fn exists(&self, asset: &str) -> bool {
        tokio::fs::metadata(self.resolve(asset))
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    async fn modified(&self, asset: &str) -> Option<SystemTime> {
        tokio::fs::metadata(self.resolve(asset))
            .await
            .and_then(|meta| meta.modified())
            .ok()
    }

    async fn open(&self, asset: &str) -> io::Result<Box<dyn AsyncRead + Send + Unpin>> {
        let file = tokio::fs::File::open(self.resolve(asset)).await?;
        Ok(Box::new(file))
    }
}

/// Result of an install check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    /// Path of the executable copy
    pub path: PathBuf,
    /// Whether the asset was (re)copied during this call
    pub copied: bool,
}

/// Makes sure an executable copy of `asset` exists at `dest`.
///
/// The asset is copied when there is no local copy or the local copy is older
/// than the asset. A local copy is kept if the asset has disappeared from the
/// store. The copy ends up readable and executable for everyone.
#[tracing::instrument(skip(store), fields(dest = %dest.display()))]
pub async fn ensure_installed(
    store: &dyn AssetStore,
    asset: &str,
    dest: &Path,
) -> Result<InstallOutcome> {
    let local = tokio::fs::metadata(dest).await.ok();
    let asset_exists = store.exists(asset).await;

    let copied = match (&local, asset_exists) {
        (None, false) => {
            tracing::error!(asset, "Server binary asset not found");
            return Err(Error::AssetMissing {
                asset: asset.to_string(),
            });
        }
        (Some(_), false) => {
            tracing::warn!(asset, "Asset not found, keeping existing local copy");
            false
        }
        (None, true) => {
            copy_asset(store, asset, dest).await?;
            true
        }
        (Some(meta), true) => {
            let local_modified = meta.modified().ok();
            let outdated = match (local_modified, store.modified(asset).await) {
                (Some(local), Some(remote)) => local < remote,
                _ => true,
            };
            if outdated {
                tracing::debug!("Local copy is outdated");
                copy_asset(store, asset, dest).await?;
            }
            outdated
        }
    };

    if !is_executable(dest).await {
        tracing::debug!("Installed binary lacks the executable bit");
        make_executable(dest).await?;
    }

    tracing::info!(copied, "Server binary ready");
    Ok(InstallOutcome {
        path: dest.to_path_buf(),
        copied,
    })
}

async fn copy_asset(store: &dyn AssetStore, asset: &str, dest: &Path) -> Result<()> {
    let copy_error = |e: io::Error| Error::AssetCopy {
        asset: asset.to_string(),
        reason: e.to_string(),
    };

    let mut reader = store.open(asset).await.map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            Error::AssetMissing {
                asset: asset.to_string(),
            }
        } else {
            copy_error(e)
        }
    })?;

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(copy_error)?;
    }

    // Written beside the destination and renamed so a half-copied binary is never executed
    let tmp = staging_path(dest);
    let mut file = tokio::fs::File::create(&tmp).await.map_err(copy_error)?;
    let written = match tokio::io::copy(&mut reader, &mut file).await {
        Ok(written) => written,
        Err(e) => {
            drop(file);
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(copy_error(e));
        }
    };
    file.flush().await.map_err(copy_error)?;
    file.sync_all().await.map_err(copy_error)?;
    drop(file);

    if let Err(e) = make_executable(&tmp).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }

    tokio::fs::rename(&tmp, dest).await.map_err(copy_error)?;

    tracing::info!(asset, bytes = written, dest = %dest.display(), "Binary copied from asset");
    Ok(())
}

fn staging_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "server".to_string());
    dest.with_file_name(format!(".{}.partial", name))
}

#[cfg(unix)]
async fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
async fn is_executable(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

/// Marks `path` readable and executable for owner, group and others
#[cfg(unix)]
async fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let permission_error = |e: io::Error| Error::PermissionSet {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    let meta = tokio::fs::metadata(path).await.map_err(permission_error)?;
    let mut permissions = meta.permissions();
    permissions.set_mode(permissions.mode() | 0o755);
    tokio::fs::set_permissions(path, permissions)
        .await
        .map_err(permission_error)
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_path_is_hidden_sibling() {
        let staged = staging_path(Path::new("/data/files/libserver.so"));
        assert_eq!(staged, PathBuf::from("/data/files/.libserver.so.partial"));
    }

    #[tokio::test]
    async fn test_dir_store_lookup() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("server")).unwrap();
        std::fs::write(dir.path().join("server/libserver_x64.so"), b"bin").unwrap();

        let store = DirAssetStore::new(dir.path());
        assert!(store.exists("server/libserver_x64.so").await);
        assert!(!store.exists("server/libserver_arm32.so").await);
        assert!(!store.exists("server").await);
        assert!(store.modified("server/libserver_x64.so").await.is_some());
        assert!(store.open("server/libserver_arm32.so").await.is_err());
    }
}
