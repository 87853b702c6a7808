use serde::{Deserialize, Serialize};

use crate::error::{UploadError, UploadResult};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "FILE_UPLOAD";

/// Default configuration file, resolved relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "config/file-upload";

/// Main configuration structure for the upload service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadServiceConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Storage directory configuration
    pub storage: StorageConfig,
    /// Upload validation configuration
    pub upload: UploadConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Request timeout in seconds
    pub request_timeout: u64,
    /// Add browser security headers to every response
    pub enable_security_headers: bool,
}

/// Storage directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding every stored upload
    pub directory: String,
    /// How many suffixed names to try before giving up on a collision
    pub max_collision_attempts: u32,
    /// Remove staging files left by a previous process on startup
    pub sweep_stale_uploads: bool,
}

/// Upload validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Multipart field carrying the file
    pub field_name: String,
    /// Allowed MIME types; `type/*` wildcards are accepted
    pub allowed_types: Vec<String>,
    /// Maximum file size in bytes
    pub max_bytes: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable JSON logging
    pub json_format: bool,
}

impl UploadServiceConfig {
    /// Load configuration from an optional file and `FILE_UPLOAD__*` variables.
    ///
    /// `PORT` takes precedence over every other source for the listen port.
    pub fn load(config_file: Option<&str>) -> UploadResult<Self> {
        let file_source = match config_file {
            Some(path) => config::File::with_name(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = config::Config::builder()
            .add_source(file_source)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("upload.allowed_types")
                    .try_parsing(true),
            )
            .build()?;

        let mut config = settings.try_deserialize::<UploadServiceConfig>()?;

        if let Ok(port) = std::env::var("PORT") {
            config.server.port = port.trim().parse().map_err(|_| {
                UploadError::configuration(format!("PORT is not a valid port number: {}", port))
            })?;
        }

        Ok(config)
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> UploadResult<()> {
        if self.upload.allowed_types.iter().all(|t| t.trim().is_empty()) {
            return Err(UploadError::configuration(
                "upload.allowed_types must list at least one MIME type",
            ));
        }

        if self.upload.max_bytes == 0 {
            return Err(UploadError::configuration(
                "upload.max_bytes must be greater than zero",
            ));
        }

        if self.upload.field_name.trim().is_empty() {
            return Err(UploadError::configuration(
                "upload.field_name must not be empty",
            ));
        }

        if self.storage.directory.trim().is_empty() {
            return Err(UploadError::configuration(
                "storage.directory must not be empty",
            ));
        }

        if self.storage.max_collision_attempts == 0 {
            return Err(UploadError::configuration(
                "storage.max_collision_attempts must be greater than zero",
            ));
        }

        Ok(())
    }
}

// Default value functions

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3002
}

fn default_request_timeout() -> u64 {
    300 // 5 minutes
}

fn default_storage_directory() -> String {
    "uploads".to_string()
}

fn default_max_collision_attempts() -> u32 {
    1000
}

fn default_field_name() -> String {
    "file".to_string()
}

fn default_max_bytes() -> u64 {
    5 * 1024 * 1024 // 5MB
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_allowed_types() -> Vec<String> {
    vec![
        "image/jpeg".to_string(),
        "image/png".to_string(),
        "application/pdf".to_string(),
    ]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout: default_request_timeout(),
            enable_security_headers: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: default_storage_directory(),
            max_collision_attempts: default_max_collision_attempts(),
            sweep_stale_uploads: true,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            field_name: default_field_name(),
            allowed_types: default_allowed_types(),
            max_bytes: default_max_bytes(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}
