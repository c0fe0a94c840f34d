//! Object storage backends hosting published images.

pub mod cloudinary;
pub mod s3;

use async_trait::async_trait;
use thiserror::Error;

pub use cloudinary::CloudinaryStore;
pub use s3::S3Store;

/// Errors reported by a storage backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage request failed: {0}")]
    Request(String),

    #[error("storage rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("storage response missing result: {0}")]
    MissingResult(String),
}

/// An object hosted by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Backend-assigned identifier, unique within the namespace
    pub identifier: String,
    /// Publicly resolvable URL
    pub url: String,
}

/// Outcome token of a delete call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteStatus {
    Deleted,
    NotFound,
    /// Any other token the backend reported
    Other(String),
}

impl DeleteStatus {
    /// Map a backend status token (`ok`, `not found`, ...)
    pub fn from_token(token: &str) -> Self {
        match token {
            "ok" => DeleteStatus::Deleted,
            "not found" => DeleteStatus::NotFound,
            other => DeleteStatus::Other(other.to_string()),
        }
    }
}

/// Object storage backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload PNG bytes under `folder`
    async fn put(&self, bytes: Vec<u8>, folder: &str) -> Result<StoredObject, StoreError>;

    /// Delete the object with the given identifier
    async fn delete(&self, identifier: &str) -> Result<DeleteStatus, StoreError>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}
