use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use thiserror::Error;

/// Result type alias for upload operations
pub type UploadResult<T> = Result<T, UploadError>;

/// Main error type for the upload service
#[derive(Error, Debug)]
pub enum UploadError {
    // Validation errors
    #[error("No file uploaded.")]
    MissingFile,

    #[error("Unsupported media type: {mime_type} (allowed: {allowed:?})")]
    UnsupportedMediaType {
        mime_type: String,
        allowed: Vec<String>,
    },

    #[error("File too large: limit is {max_bytes} bytes")]
    PayloadTooLarge { max_bytes: u64 },

    #[error("Malformed upload request: {message}")]
    MalformedRequest { message: String },

    // Storage errors
    #[error("Storage unavailable: {message}")]
    StorageUnavailable { message: String },

    #[error("Could not find a free name for {file_name} after {attempts} attempts")]
    StorageConflict { file_name: String, attempts: u32 },

    #[error("File not found: {file_name}")]
    FileNotFound { file_name: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    // IO and internal errors
    #[error("IO error: {message}")]
    IoError { message: String },

    #[error("Internal server error: {message}")]
    InternalError { message: String },
}

/// Error response structure for API endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling
    pub error: String,
    /// Human-readable error message
    pub message: String,
    /// Additional error details
    pub details: Option<serde_json::Value>,
    /// Timestamp of the error
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl UploadError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            UploadError::MissingFile | UploadError::MalformedRequest { .. } => {
                StatusCode::BAD_REQUEST
            }

            UploadError::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,

            UploadError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,

            UploadError::StorageConflict { .. } => StatusCode::CONFLICT,

            UploadError::FileNotFound { .. } => StatusCode::NOT_FOUND,

            UploadError::StorageUnavailable { .. }
            | UploadError::ConfigurationError { .. }
            | UploadError::IoError { .. }
            | UploadError::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            UploadError::MissingFile => "MISSING_FILE",
            UploadError::UnsupportedMediaType { .. } => "UNSUPPORTED_MEDIA_TYPE",
            UploadError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            UploadError::MalformedRequest { .. } => "MALFORMED_REQUEST",
            UploadError::StorageUnavailable { .. } => "STORAGE_UNAVAILABLE",
            UploadError::StorageConflict { .. } => "STORAGE_CONFLICT",
            UploadError::FileNotFound { .. } => "FILE_NOT_FOUND",
            UploadError::ConfigurationError { .. } => "CONFIGURATION_ERROR",
            UploadError::IoError { .. } => "IO_ERROR",
            UploadError::InternalError { .. } => "INTERNAL_ERROR",
        }
    }

    /// True for failures caused by the client rather than the server
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Create error response for API
    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.error_code().to_string(),
            message: self.to_string(),
            details: self.get_details(),
            timestamp: chrono::Utc::now(),
        }
    }

    /// Get additional error details
    fn get_details(&self) -> Option<serde_json::Value> {
        match self {
            UploadError::UnsupportedMediaType { mime_type, allowed } => Some(serde_json::json!({
                "mime_type": mime_type,
                "allowed_types": allowed
            })),
            UploadError::PayloadTooLarge { max_bytes } => Some(serde_json::json!({
                "max_bytes": max_bytes
            })),
            UploadError::StorageConflict {
                file_name,
                attempts,
            } => Some(serde_json::json!({
                "file_name": file_name,
                "attempts": attempts
            })),
            _ => None,
        }
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_response = self.to_error_response();
        (status, Json(error_response)).into_response()
    }
}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        UploadError::IoError {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for UploadError {
    fn from(err: config::ConfigError) -> Self {
        UploadError::ConfigurationError {
            message: err.to_string(),
        }
    }
}

// Utility functions for creating common errors

impl UploadError {
    pub fn file_not_found<S: Into<String>>(file_name: S) -> Self {
        Self::FileNotFound {
            file_name: file_name.into(),
        }
    }

    pub fn unsupported_media_type<S: Into<String>>(mime_type: S, allowed: Vec<String>) -> Self {
        Self::UnsupportedMediaType {
            mime_type: mime_type.into(),
            allowed,
        }
    }

    pub fn payload_too_large(max_bytes: u64) -> Self {
        Self::PayloadTooLarge { max_bytes }
    }

    pub fn storage_unavailable<S: Into<String>>(message: S) -> Self {
        Self::StorageUnavailable {
            message: message.into(),
        }
    }

    pub fn malformed<S: Into<String>>(message: S) -> Self {
        Self::MalformedRequest {
            message: message.into(),
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(UploadError::MissingFile.status_code(), StatusCode::BAD_REQUEST);

        assert_eq!(
            UploadError::unsupported_media_type("text/plain", vec![]).status_code(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );

        assert_eq!(
            UploadError::payload_too_large(10).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );

        assert_eq!(
            UploadError::StorageConflict {
                file_name: "a.png".to_string(),
                attempts: 3
            }
            .status_code(),
            StatusCode::CONFLICT
        );

        assert_eq!(
            UploadError::storage_unavailable("read-only").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );

        assert_eq!(
            UploadError::file_not_found("x").status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_client_and_server_faults() {
        assert!(UploadError::MissingFile.is_client_error());
        assert!(UploadError::payload_too_large(1).is_client_error());
        assert!(!UploadError::storage_unavailable("disk").is_client_error());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(UploadError::MissingFile.error_code(), "MISSING_FILE");
        assert_eq!(
            UploadError::unsupported_media_type("text/plain", vec!["image/jpeg".to_string()])
                .error_code(),
            "UNSUPPORTED_MEDIA_TYPE"
        );
        assert_eq!(
            UploadError::storage_unavailable("x").error_code(),
            "STORAGE_UNAVAILABLE"
        );
    }

    #[test]
    fn test_missing_file_message() {
        let response = UploadError::MissingFile.to_error_response();

        assert_eq!(response.error, "MISSING_FILE");
        assert_eq!(response.message, "No file uploaded.");
        assert!(response.details.is_none());
    }

    #[test]
    fn test_error_response_details() {
        let error =
            UploadError::unsupported_media_type("text/html", vec!["image/png".to_string()]);
        let response = error.to_error_response();

        assert_eq!(response.error, "UNSUPPORTED_MEDIA_TYPE");
        assert!(response.message.contains("text/html"));
        let details = response.details.expect("details present");
        assert_eq!(details["mime_type"], "text/html");
        assert_eq!(details["allowed_types"][0], "image/png");
    }

    #[test]
    fn test_io_error_conversion() {
        let err: UploadError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert_eq!(err.error_code(), "IO_ERROR");
    }
}
