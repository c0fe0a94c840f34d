use axum::http::StatusCode;
use std::fmt;
use thiserror::Error;

/// Category of a pipeline failure
///
/// Every failure path in the service resolves to exactly one kind, and the
/// kind alone decides the HTTP status sent to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Request is missing its file or identifier
    InvalidRequest,
    /// File failed extension or media type validation
    Rejected,
    /// File exceeds the configured size limit
    TooLarge,
    /// Background removal service failed or was unreachable
    UpstreamUnavailable,
    /// Image could not be decoded, mirrored or re-encoded
    TransformFailed,
    /// Object storage rejected the upload or deletion
    PublishFailed,
    /// Object storage has no image under the identifier
    NotFound,
}

impl FailureKind {
    /// Status code suggested to the boundary layer
    pub fn status(&self) -> StatusCode {
        match self {
            FailureKind::InvalidRequest => StatusCode::BAD_REQUEST,
            FailureKind::Rejected => StatusCode::BAD_REQUEST,
            FailureKind::TooLarge => StatusCode::BAD_REQUEST,
            FailureKind::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
            FailureKind::TransformFailed => StatusCode::INTERNAL_SERVER_ERROR,
            FailureKind::PublishFailed => StatusCode::BAD_GATEWAY,
            FailureKind::NotFound => StatusCode::NOT_FOUND,
        }
    }

    /// Stable label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InvalidRequest => "invalid_request",
            FailureKind::Rejected => "rejected",
            FailureKind::TooLarge => "too_large",
            FailureKind::UpstreamUnavailable => "upstream_unavailable",
            FailureKind::TransformFailed => "transform_failed",
            FailureKind::PublishFailed => "publish_failed",
            FailureKind::NotFound => "not_found",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized failure: a kind plus the message safe to show the caller
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

pub const MSG_NO_FILE: &str = "No file uploaded.";
pub const MSG_NO_IMAGE_ID: &str = "Image ID is required.";
pub const MSG_MALFORMED_IMAGE_ID: &str = "Image ID is malformed.";
pub const MSG_MALFORMED_UPLOAD: &str = "Malformed upload request.";
pub const MSG_UNEXPECTED_FIELD: &str = "Unexpected field";
pub const MSG_EXECUTABLE: &str = "Executable files are not allowed.";
pub const MSG_BAD_EXTENSION: &str = "Unsupported file extension.";
pub const MSG_BAD_MEDIA_TYPE: &str = "Unsupported file type.";
pub const MSG_TOO_LARGE: &str = "File size exceeds the allowed limit.";
pub const MSG_REMOVAL_FAILED: &str = "Background removal failed.";
pub const MSG_TRANSFORM_FAILED: &str = "Image processing failed.";
pub const MSG_UPLOAD_FAILED: &str = "Cloud upload failed.";
pub const MSG_DELETE_FAILED: &str = "Failed to delete image.";
pub const MSG_IMAGE_NOT_FOUND: &str = "Image not found.";

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidRequest, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Rejected, message)
    }

    pub fn too_large() -> Self {
        Self::new(FailureKind::TooLarge, MSG_TOO_LARGE)
    }

    /// Removal failure with upstream-supplied text, or the generic message
    pub fn upstream(message: Option<String>) -> Self {
        Self::new(
            FailureKind::UpstreamUnavailable,
            message.unwrap_or_else(|| MSG_REMOVAL_FAILED.to_string()),
        )
    }

    pub fn transform_failed() -> Self {
        Self::new(FailureKind::TransformFailed, MSG_TRANSFORM_FAILED)
    }

    pub fn publish_failed(message: impl Into<String>) -> Self {
        Self::new(FailureKind::PublishFailed, message)
    }

    pub fn not_found() -> Self {
        Self::new(FailureKind::NotFound, MSG_IMAGE_NOT_FOUND)
    }

    /// Status code suggested by the failure kind
    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }
}

/// Terminal result of a pipeline operation
pub type PipelineOutcome<T> = Result<T, Failure>;
