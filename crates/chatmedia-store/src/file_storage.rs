//! Media directory with atomic, never-overwriting writes.
//!
//! Every resolved attachment becomes exactly one file directly under the
//! media root. Writes go to a hidden temp file first and are then hard-linked
//! into place, so a reader never sees a partial file and an existing file is
//! never replaced.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chatmedia_core::file_safety::split_extension;
use chatmedia_core::{Error, MediaStorage, Result, StoredFile};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Upper bound on `-N` suffixes tried for one name.
const MAX_NAME_COLLISIONS: usize = 1000;

/// Filesystem media root.
#[derive(Debug, Clone)]
pub struct MediaDirectory {
    root: PathBuf,
}

impl MediaDirectory {
    /// Create a media directory rooted at `root`. Nothing is touched on disk.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Validate that the media root can write, read, and delete files.
    ///
    /// Performs a full round-trip test at startup to catch filesystem issues
    /// (permission errors, read-only mounts, missing directories) early.
    pub async fn validate(&self) -> std::result::Result<(), String> {
        let test_file = self.root.join(".health-check.bin");

        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| format!("create_dir_all({:?}): {}", self.root, e))?;

        let data = b"storage-health-check";
        fs::write(&test_file, data)
            .await
            .map_err(|e| format!("write({:?}): {}", test_file, e))?;

        let read_data = fs::read(&test_file)
            .await
            .map_err(|e| format!("read({:?}): {}", test_file, e))?;
        if read_data != data {
            return Err("read-back mismatch".to_string());
        }

        fs::remove_file(&test_file)
            .await
            .map_err(|e| format!("remove_file({:?}): {}", test_file, e))?;

        Ok(())
    }

    fn candidate_path(&self, file_name: &str, n: usize) -> PathBuf {
        if n == 0 {
            return self.root.join(file_name);
        }
        let (stem, ext) = split_extension(file_name);
        self.root
            .join(format!("{}-{}{}", stem, n, ext.unwrap_or_default()))
    }

    /// Link `temp` to the first free candidate name.
    async fn claim_name(&self, temp: &Path, file_name: &str) -> Result<PathBuf> {
        for n in 0..MAX_NAME_COLLISIONS {
            let candidate = self.candidate_path(file_name, n);
            match fs::hard_link(temp, &candidate).await {
                Ok(()) => return Ok(candidate),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    // Filesystems without hard links: fall back to rename
                    debug!(error = %e, "file_storage: hard_link unavailable, renaming");
                    if fs::try_exists(&candidate).await? {
                        continue;
                    }
                    fs::rename(temp, &candidate).await?;
                    return Ok(candidate);
                }
            }
        }
        Err(Error::Storage(format!(
            "no free name for {} after {} attempts",
            file_name, MAX_NAME_COLLISIONS
        )))
    }

    async fn write_temp(&self, temp: &Path, data: &[u8]) -> Result<()> {
        let mut file = fs::File::create(temp).await.map_err(|e| {
            warn!(temp_path = %temp.display(), error = %e, "file_storage: File::create failed");
            e
        })?;
        file.write_all(data).await.map_err(|e| {
            warn!(error = %e, "file_storage: write_all failed");
            e
        })?;
        file.sync_all().await?;
        Ok(())
    }
}

#[async_trait]
impl MediaStorage for MediaDirectory {
    async fn write_unique(&self, file_name: &str, data: &[u8]) -> Result<StoredFile> {
        if file_name.is_empty()
            || file_name.starts_with('.')
            || file_name.contains(['/', '\\'])
        {
            return Err(Error::InvalidInput(format!(
                "not a plain file name: {:?}",
                file_name
            )));
        }

        fs::create_dir_all(&self.root).await.map_err(|e| {
            warn!(root = %self.root.display(), error = %e, "file_storage: create_dir_all failed");
            e
        })?;

        let temp = self.root.join(format!(".{}.part", Uuid::new_v4()));
        let written = async {
            self.write_temp(&temp, data).await?;
            self.claim_name(&temp, file_name).await
        }
        .await;
        let _ = fs::remove_file(&temp).await;
        let path = written?;

        // Set permissions to 0644 (rw-r--r--, no execute)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).await?;
        }

        let byte_size = fs::metadata(&path).await?.len();
        if byte_size != data.len() as u64 {
            let _ = fs::remove_file(&path).await;
            return Err(Error::Storage(format!(
                "short write for {}: {} of {} bytes",
                path.display(),
                byte_size,
                data.len()
            )));
        }

        debug!(path = %path.display(), byte_size, "file_storage: write");
        Ok(StoredFile { path, byte_size })
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        if !path.starts_with(&self.root) {
            return Err(Error::InvalidInput(format!(
                "{} is outside the media root",
                path.display()
            )));
        }
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn visible_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| !n.starts_with('.'))
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_write_unique_writes_file() {
        let dir = TempDir::new().unwrap();
        let media = MediaDirectory::new(dir.path());

        let stored = media.write_unique("direct_1_a.png", b"png-bytes").await.unwrap();
        assert_eq!(stored.path, dir.path().join("direct_1_a.png"));
        assert_eq!(stored.byte_size, 9);
        assert_eq!(std::fs::read(&stored.path).unwrap(), b"png-bytes");
    }

    #[tokio::test]
    async fn test_write_unique_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let media = MediaDirectory::new(dir.path());

        let first = media.write_unique("a.pdf", b"one").await.unwrap();
        let second = media.write_unique("a.pdf", b"two").await.unwrap();

        assert_ne!(first.path, second.path);
        assert_eq!(second.path, dir.path().join("a-1.pdf"));
        assert_eq!(std::fs::read(&first.path).unwrap(), b"one");
        assert_eq!(visible_files(dir.path()), vec!["a-1.pdf", "a.pdf"]);
    }

    #[tokio::test]
    async fn test_write_unique_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let media = MediaDirectory::new(dir.path());
        media.write_unique("x.bin", b"data").await.unwrap();

        let all: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_write_unique_creates_root() {
        let dir = TempDir::new().unwrap();
        let media = MediaDirectory::new(dir.path().join("nested/media"));
        let stored = media.write_unique("x.txt", b"hi").await.unwrap();
        assert!(stored.path.exists());
    }

    #[tokio::test]
    async fn test_write_unique_rejects_paths() {
        let dir = TempDir::new().unwrap();
        let media = MediaDirectory::new(dir.path());
        for bad in ["../escape.png", "sub/dir.png", ".hidden", ""] {
            assert!(
                matches!(
                    media.write_unique(bad, b"x").await,
                    Err(Error::InvalidInput(_))
                ),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let media = MediaDirectory::new(dir.path());
        let stored = media.write_unique("gone.jpg", b"x").await.unwrap();

        media.remove(&stored.path).await.unwrap();
        assert!(!stored.path.exists());
        media.remove(&stored.path).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_outside_root_rejected() {
        let dir = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let outside = other.path().join("keep.txt");
        std::fs::write(&outside, b"keep").unwrap();

        let media = MediaDirectory::new(dir.path());
        assert!(media.remove(&outside).await.is_err());
        assert!(outside.exists());
    }

    #[tokio::test]
    async fn test_validate_round_trip() {
        let dir = TempDir::new().unwrap();
        let media = MediaDirectory::new(dir.path().join("media"));
        media.validate().await.unwrap();
        assert!(visible_files(&dir.path().join("media")).is_empty());
    }
}
