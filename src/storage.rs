//! Upload storage on the local filesystem.
//!
//! Each upload is written under a freshly generated `<uuid>.<ext>` name, so
//! concurrent requests never share a path and no locking is needed. Files are
//! owned by a [`StoredUpload`] guard between `store` and `release`; dropping
//! the guard without releasing it still removes the file.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::StorageError;

/// A file written to the upload directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub id: Uuid,
    pub path: PathBuf,
    pub size: usize,
}

impl StoredFile {
    /// The generated file name (`<uuid>.<ext>`).
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// Result of removing a stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed,
    NotFound,
}

/// Writes uploads to, and removes them from, a single directory.
#[derive(Debug, Clone)]
pub struct StorageManager {
    dir: PathBuf,
    retain: bool,
}

impl StorageManager {
    pub fn new(dir: impl Into<PathBuf>, retain: bool) -> Self {
        Self {
            dir: dir.into(),
            retain,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the upload directory if missing.
    pub async fn ensure_dir(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StorageError::Directory {
                path: self.dir.display().to_string(),
                source,
            })
    }

    /// Write `data` under a new unique name carrying `original_name`'s extension.
    pub async fn store(&self, data: &[u8], original_name: &str) -> Result<StoredUpload, StorageError> {
        self.ensure_dir().await?;

        let id = Uuid::new_v4();
        let path = self.dir.join(format!("{}.{}", id, extension_of(original_name)));

        // create_new: a collision is reported instead of overwriting another upload.
        let written = async {
            let mut file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await?;
            file.write_all(data).await?;
            file.flush().await
        }
        .await;

        if let Err(source) = written {
            error!("Failed to store upload {} at {:?}: {}", original_name, path, source);
            // Best effort: a partially written file must not linger.
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove partial upload {:?}: {}", path, e);
                }
            }
            return Err(StorageError::Write {
                path: path.display().to_string(),
                source,
            });
        }

        info!("Stored upload {} as {:?} ({} bytes)", original_name, path, data.len());

        Ok(StoredUpload {
            file: StoredFile {
                id,
                path,
                size: data.len(),
            },
            armed: !self.retain,
        })
    }

    /// Remove a stored file.
    pub async fn remove(&self, file: &StoredFile) -> Result<Removal, StorageError> {
        match tokio::fs::remove_file(&file.path).await {
            Ok(()) => {
                debug!("Removed upload {:?} ({} bytes)", file.path, file.size);
                Ok(Removal::Removed)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Removal::NotFound),
            Err(source) => Err(StorageError::Remove {
                path: file.path.display().to_string(),
                source,
            }),
        }
    }

    /// Finish with an upload: remove it unless retention is configured.
    ///
    /// Never fails the request; removal problems are logged.
    pub async fn release(&self, mut upload: StoredUpload) {
        upload.armed = false;
        let file = &upload.file;

        if self.retain {
            debug!("Retaining upload {:?}", file.path);
            return;
        }

        match self.remove(file).await {
            Ok(Removal::Removed) => {}
            Ok(Removal::NotFound) => warn!("Upload {:?} was already gone at cleanup", file.path),
            Err(e) => error!("{}", e),
        }
    }
}

/// Owns a [`StoredFile`] until it is released.
///
/// If dropped while still holding the file (panic, cancelled request), the
/// file is removed synchronously unless retention is configured.
#[derive(Debug)]
pub struct StoredUpload {
    file: StoredFile,
    /// Remove on drop. Cleared by `release` and when retention is on.
    armed: bool,
}

impl StoredUpload {
    pub fn file(&self) -> &StoredFile {
        &self.file
    }

    pub fn path(&self) -> &Path {
        &self.file.path
    }
}

impl Drop for StoredUpload {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!("Upload {:?} dropped without release; removing", self.file.path);
        if let Err(e) = std::fs::remove_file(&self.file.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                error!("Failed to remove upload {:?}: {}", self.file.path, e);
            }
        }
    }
}

/// Lowercased extension of `name`, restricted to ASCII alphanumerics; `bin` otherwise.
fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 10 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "bin".to_string())
}
