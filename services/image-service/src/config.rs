use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors found while validating a loaded configuration
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Main configuration for the image service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Upload limits
    #[serde(default)]
    pub upload: UploadConfig,
    /// Background removal service
    pub removal: RemovalConfig,
    /// Object storage
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port, 0 disables the exporter
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Allowed CORS origins ("*" allows any)
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
    /// Rate limit window in milliseconds
    #[serde(default = "default_rate_limit_window_ms")]
    pub rate_limit_window_ms: u64,
    /// Requests allowed per client per window
    #[serde(default = "default_rate_limit_max")]
    pub rate_limit_max: u32,
}

/// Upload limits
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Maximum accepted file size in bytes (5MB default)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: usize,
}

/// Background removal API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RemovalConfig {
    /// Endpoint accepting the multipart image
    #[serde(default = "default_removal_api_url")]
    pub api_url: String,
    /// API key sent as X-Api-Key
    #[serde(default)]
    pub api_key: String,
    /// Request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Which object storage backend hosts published images
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Cloudinary,
    S3,
}

/// Object storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Selected backend
    #[serde(default)]
    pub backend: StorageBackend,
    /// Folder/namespace images are published under
    #[serde(default = "default_folder")]
    pub folder: String,
    /// Timeout for a single storage call in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Cloudinary credentials
    pub cloudinary: Option<CloudinaryConfig>,
    /// S3 settings
    pub s3: Option<S3Config>,
}

/// Cloudinary credentials
#[derive(Debug, Clone, Deserialize)]
pub struct CloudinaryConfig {
    #[serde(default)]
    pub cloud_name: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    /// Upload API base URL
    #[serde(default = "default_cloudinary_base_url")]
    pub api_base_url: String,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket name for published images
    #[serde(default)]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Base of public object URLs, defaults to the virtual-hosted bucket URL
    pub public_base_url: Option<String>,
}

// Default value functions
fn default_service_name() -> String {
    "image-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    4000
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

fn default_rate_limit_window_ms() -> u64 {
    15 * 60 * 1000 // 15 minutes
}

fn default_rate_limit_max() -> u32 {
    100
}

fn default_max_file_size() -> usize {
    crate::validation::DEFAULT_MAX_FILE_SIZE
}

fn default_removal_api_url() -> String {
    "https://api.remove.bg/v1.0/removebg".to_string()
}

fn default_timeout_ms() -> u64 {
    30000
}

fn default_folder() -> String {
    "processed-images".to_string()
}

fn default_cloudinary_base_url() -> String {
    "https://api.cloudinary.com/v1_1".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Add config file if present
            .add_source(config::File::with_name("config/image-service").required(false))
            .add_source(config::File::with_name("/etc/image-service/image-service").required(false))
            // Override with environment variables
            // IMAGE_SERVICE__REMOVAL__API_KEY -> removal.api_key
            .add_source(
                config::Environment::with_prefix("IMAGE_SERVICE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("api.cors_origins")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check credentials for the selected backend and reject zero limits
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.removal.api_key.trim().is_empty() {
            return Err(ConfigError::MissingRequired("removal.api_key".to_string()));
        }

        require_positive("upload.max_file_size", self.upload.max_file_size as u64)?;
        require_positive("removal.timeout_ms", self.removal.timeout_ms)?;
        require_positive("storage.timeout_ms", self.storage.timeout_ms)?;
        require_positive("api.rate_limit_window_ms", self.api.rate_limit_window_ms)?;
        require_positive("api.rate_limit_max", self.api.rate_limit_max as u64)?;

        match self.storage.backend {
            StorageBackend::Cloudinary => {
                let cloudinary = self
                    .storage
                    .cloudinary
                    .as_ref()
                    .ok_or_else(|| ConfigError::MissingRequired("storage.cloudinary".to_string()))?;
                for (key, value) in [
                    ("storage.cloudinary.cloud_name", &cloudinary.cloud_name),
                    ("storage.cloudinary.api_key", &cloudinary.api_key),
                    ("storage.cloudinary.api_secret", &cloudinary.api_secret),
                ] {
                    if value.trim().is_empty() {
                        return Err(ConfigError::MissingRequired(key.to_string()));
                    }
                }
            }
            StorageBackend::S3 => {
                let s3 = self
                    .storage
                    .s3
                    .as_ref()
                    .ok_or_else(|| ConfigError::MissingRequired("storage.s3".to_string()))?;
                if s3.bucket.trim().is_empty() {
                    return Err(ConfigError::MissingRequired("storage.s3.bucket".to_string()));
                }
            }
        }

        Ok(())
    }

    /// Get storage call timeout as Duration
    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage.timeout_ms)
    }

    /// Get rate limit window as Duration
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.api.rate_limit_window_ms)
    }
}

fn require_positive(key: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_origins: default_cors_origins(),
            rate_limit_window_ms: default_rate_limit_window_ms(),
            rate_limit_max: default_rate_limit_max(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            folder: default_folder(),
            timeout_ms: default_timeout_ms(),
            cloudinary: None,
            s3: None,
        }
    }
}
