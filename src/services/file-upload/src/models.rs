use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, path::PathBuf};

/// One in-flight upload: untrusted metadata plus the body stream
#[derive(Debug)]
pub struct UploadRequest<S> {
    /// Filename declared by the client
    pub original_name: String,
    /// MIME type declared by the client
    pub content_type: Option<String>,
    /// File content
    pub body: S,
}

impl<S> UploadRequest<S> {
    pub fn new(original_name: impl Into<String>, content_type: Option<String>, body: S) -> Self {
        Self {
            original_name: original_name.into(),
            content_type,
            body,
        }
    }
}

/// A file persisted in the storage directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFile {
    /// Resolved, collision-free filename
    pub filename: String,
    /// Absolute path on disk
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Normalized MIME type accepted at upload time
    pub content_type: String,
    /// SHA-256 of the stored bytes
    pub sha256: String,
    /// Time the file became visible
    pub stored_at: DateTime<Utc>,
}

/// Entry returned by the upload listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredFileSummary {
    pub filename: String,
    pub size: u64,
    pub url: String,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Upload confirmation returned to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Human-readable confirmation
    pub message: String,
    /// Name the file was stored under
    pub filename: String,
    /// Name the client declared
    pub original_name: String,
    /// Retrieval path
    pub url: String,
    /// File size in bytes
    pub size: u64,
    /// Accepted MIME type
    pub content_type: String,
    /// SHA-256 of the stored bytes
    pub sha256: String,
    /// Storage timestamp
    pub stored_at: DateTime<Utc>,
}

impl UploadResponse {
    pub fn new(stored: &StoredFile, original_name: &str) -> Self {
        Self {
            message: format!("File uploaded successfully: {}", stored.filename),
            filename: stored.filename.clone(),
            original_name: original_name.to_string(),
            url: retrieval_url(&stored.filename),
            size: stored.size,
            content_type: stored.content_type.clone(),
            sha256: stored.sha256.clone(),
            stored_at: stored.stored_at,
        }
    }
}

/// Listing of stored uploads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadListResponse {
    pub files: Vec<StoredFileSummary>,
    pub total: usize,
    pub total_size_bytes: u64,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub services: HashMap<String, bool>,
}

/// Stage of a single upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    /// Multipart part found, nothing checked yet
    Received,
    /// Declared MIME type is on the allow-list
    TypeChecked,
    /// Whole body streamed within the size ceiling
    SizeChecked,
    /// Published under its resolved name
    Stored,
    /// Confirmation produced
    Completed,
    /// Terminal failure carrying the error code
    Rejected(&'static str),
}

impl UploadStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadStage::Completed | UploadStage::Rejected(_))
    }
}

impl fmt::Display for UploadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadStage::Received => write!(f, "received"),
            UploadStage::TypeChecked => write!(f, "type_checked"),
            UploadStage::SizeChecked => write!(f, "size_checked"),
            UploadStage::Stored => write!(f, "stored"),
            UploadStage::Completed => write!(f, "completed"),
            UploadStage::Rejected(code) => write!(f, "rejected({})", code),
        }
    }
}

/// Path a stored file is served from
pub fn retrieval_url(filename: &str) -> String {
    format!("/uploads/{}", filename)
}
