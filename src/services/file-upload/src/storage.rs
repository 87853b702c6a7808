//! Storage resolver for the local upload directory
//!
//! Owns every filesystem decision the upload path makes:
//! - StorageDirectory creation (idempotent, safe under concurrent first use)
//! - staging files that receive a body before it is accepted
//! - filename sanitization and rename-to-unique collision handling
//! - lookup and listing of stored files for retrieval
//!
//! Stored names are published with a hard link from the staging file. The
//! link fails with `AlreadyExists` instead of replacing an existing file, so
//! two uploads racing for the same name always end up under distinct names
//! and a file never becomes visible before its bytes are complete.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config_types::StorageConfig,
    error::{UploadError, UploadResult},
    models::{retrieval_url, StoredFile, StoredFileSummary},
    utils::path::{candidate_name, is_stored_name, is_temp_upload_name, sanitize_filename, temp_upload_name},
};

/// Resolves upload names to paths inside the storage directory
#[derive(Debug, Clone)]
pub struct StorageResolver {
    root: PathBuf,
    max_collision_attempts: u32,
    sweep_stale_uploads: bool,
}

impl StorageResolver {
    /// Create a resolver; relative directories are anchored at the working directory
    pub fn new(config: &StorageConfig) -> UploadResult<Self> {
        let directory = PathBuf::from(&config.directory);
        let root = if directory.is_absolute() {
            directory
        } else {
            std::env::current_dir()
                .map_err(|e| storage_error("cannot resolve working directory", e))?
                .join(directory)
        };

        Ok(Self {
            root,
            max_collision_attempts: config.max_collision_attempts.max(1),
            sweep_stale_uploads: config.sweep_stale_uploads,
        })
    }

    /// Storage directory every stored file lives in
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// One-time startup work: create the directory and drop stale staging files
    pub async fn prepare(&self) -> UploadResult<usize> {
        self.ensure_directory().await?;

        let swept = if self.sweep_stale_uploads {
            self.sweep_stale_uploads().await?
        } else {
            0
        };

        info!(
            "Storage directory ready at {} ({} stale staging files removed)",
            self.root.display(),
            swept
        );

        Ok(swept)
    }

    /// Create the storage directory if it is missing
    pub async fn ensure_directory(&self) -> UploadResult<()> {
        // create_dir_all treats a directory created concurrently by another
        // task as success and fails if a non-directory occupies the path.
        fs::create_dir_all(&self.root).await.map_err(|e| {
            error!(
                "Cannot create storage directory {}: {}",
                self.root.display(),
                e
            );
            UploadError::storage_unavailable(format!(
                "cannot create storage directory {}: {}",
                self.root.display(),
                e
            ))
        })
    }

    /// Open a fresh staging file for an incoming body
    pub async fn stage(&self) -> UploadResult<StagedUpload> {
        self.ensure_directory().await?;

        let path = self.root.join(temp_upload_name(&Uuid::new_v4()));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| {
                error!("Cannot create staging file {}: {}", path.display(), e);
                UploadError::storage_unavailable(format!(
                    "cannot write to storage directory {}: {}",
                    self.root.display(),
                    e
                ))
            })?;

        debug!("Staging upload at {}", path.display());

        Ok(StagedUpload {
            file: Some(file),
            path,
            size: 0,
            hasher: Sha256::new(),
            armed: true,
        })
    }

    /// Safe, non-empty base name for a declared filename
    pub fn resolve_filename(&self, original_name: &str) -> String {
        sanitize_filename(original_name)
    }

    /// Publish a staged body under the first free candidate name
    pub async fn commit(
        &self,
        mut staged: StagedUpload,
        original_name: &str,
        content_type: &str,
    ) -> UploadResult<StoredFile> {
        let sha256 = staged.finish().await?;
        let base_name = self.resolve_filename(original_name);

        for attempt in 0..self.max_collision_attempts {
            let filename = candidate_name(&base_name, attempt);
            let target = self.root.join(&filename);

            match fs::hard_link(&staged.path, &target).await {
                Ok(()) => {
                    let size = staged.size;
                    staged.discard().await;

                    if attempt > 0 {
                        debug!(
                            "Name {} was taken, stored as {} after {} attempts",
                            base_name,
                            filename,
                            attempt + 1
                        );
                    }

                    return Ok(StoredFile {
                        filename,
                        path: target,
                        size,
                        content_type: content_type.to_string(),
                        sha256,
                        stored_at: Utc::now(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    error!("Failed to publish {}: {}", target.display(), e);
                    return Err(UploadError::storage_unavailable(format!(
                        "cannot store {}: {}",
                        filename, e
                    )));
                }
            }
        }

        warn!(
            "No free name for {} after {} attempts",
            base_name, self.max_collision_attempts
        );

        Err(UploadError::StorageConflict {
            file_name: base_name,
            attempts: self.max_collision_attempts,
        })
    }

    /// Path of a stored file; staging files and unsafe names are never found
    pub async fn locate(&self, filename: &str) -> UploadResult<PathBuf> {
        if !is_stored_name(filename) {
            return Err(UploadError::file_not_found(filename));
        }

        let path = self.root.join(filename);
        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(path),
            Ok(_) => Err(UploadError::file_not_found(filename)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(UploadError::file_not_found(filename)),
            Err(e) => Err(storage_error(&format!("cannot read {}", path.display()), e)),
        }
    }

    /// Every stored file, sorted by name
    pub async fn list(&self) -> UploadResult<Vec<StoredFileSummary>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.unreadable(e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| self.unreadable(e))? {
            let Some(filename) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };

            if !is_stored_name(&filename) {
                continue;
            }

            let metadata = entry.metadata().await.map_err(|e| self.unreadable(e))?;
            if !metadata.is_file() {
                continue;
            }

            files.push(StoredFileSummary {
                url: retrieval_url(&filename),
                filename,
                size: metadata.len(),
                modified_at: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }

        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(files)
    }

    /// Health check: the directory exists and this process can create files in it
    pub async fn health_check(&self) -> UploadResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            UploadError::storage_unavailable(format!("{}: {}", self.root.display(), e))
        })?;

        if !metadata.is_dir() {
            return Err(UploadError::storage_unavailable(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }

        // Named like a staging file so a crash mid-check is swept on restart
        let marker = self.root.join(temp_upload_name(&Uuid::new_v4()));
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&marker)
            .await
            .map_err(|e| storage_error(&format!("{} is not writable", self.root.display()), e))?;
        fs::remove_file(&marker)
            .await
            .map_err(|e| storage_error(&format!("cannot remove {}", marker.display()), e))?;

        Ok(())
    }

    fn unreadable(&self, err: std::io::Error) -> UploadError {
        storage_error(&format!("cannot read {}", self.root.display()), err)
    }

    async fn sweep_stale_uploads(&self) -> UploadResult<usize> {
        let mut entries = fs::read_dir(&self.root).await.map_err(|e| self.unreadable(e))?;
        let mut removed = 0;

        while let Some(entry) = entries.next_entry().await.map_err(|e| self.unreadable(e))? {
            let is_temp = entry
                .file_name()
                .to_str()
                .map(is_temp_upload_name)
                .unwrap_or(false);

            if !is_temp {
                continue;
            }

            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(
                    "Could not remove stale staging file {}: {}",
                    entry.path().display(),
                    e
                ),
            }
        }

        Ok(removed)
    }
}

/// Filesystem failure under the storage directory
fn storage_error(context: &str, err: std::io::Error) -> UploadError {
    error!("{}: {}", context, err);
    UploadError::storage_unavailable(format!("{}: {}", context, err))
}

/// A body being written to a hidden staging file.
///
/// Dropping it without a successful commit removes the staging file, which
/// covers rejected uploads, I/O failures and requests cancelled by a client
/// disconnect alike.
#[derive(Debug)]
pub struct StagedUpload {
    file: Option<File>,
    path: PathBuf,
    size: u64,
    hasher: Sha256,
    armed: bool,
}

impl StagedUpload {
    /// Append a chunk of the body
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> UploadResult<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| UploadError::InternalError {
                message: "staging file already closed".to_string(),
            })?;

        file.write_all(chunk).await.map_err(|e| {
            error!("Write to {} failed: {}", self.path.display(), e);
            UploadError::storage_unavailable(format!("write failed: {}", e))
        })?;

        self.hasher.update(chunk);
        self.size += chunk.len() as u64;
        Ok(())
    }

    /// Bytes written so far
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Location of the staging file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close the staging file, returning the SHA-256 of its content
    async fn finish(&mut self) -> UploadResult<String> {
        if let Some(mut file) = self.file.take() {
            file.flush().await.map_err(|e| {
                UploadError::storage_unavailable(format!("flush failed: {}", e))
            })?;
            file.sync_all().await.map_err(|e| {
                UploadError::storage_unavailable(format!("sync failed: {}", e))
            })?;
        }

        let digest = std::mem::take(&mut self.hasher).finalize();
        Ok(format!("{:x}", digest))
    }

    /// Remove the staging file once its content has been published
    async fn discard(&mut self) {
        self.armed = false;
        self.file.take();

        if let Err(e) = fs::remove_file(&self.path).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(
                    "Could not remove staging file {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        self.file.take();

        // Drop may run on a runtime worker; a single unlink is done inline
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Discarded staging file {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Could not remove staging file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}
