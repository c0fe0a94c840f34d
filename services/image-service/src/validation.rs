use crate::error::{Failure, PipelineOutcome, MSG_BAD_EXTENSION, MSG_BAD_MEDIA_TYPE, MSG_EXECUTABLE};
use bytes::Bytes;
use std::path::Path;

/// Extensions of executable-like files, refused before anything else
pub const BLOCKED_EXTENSIONS: &[&str] = &[".exe", ".bat", ".cmd", ".sh", ".msi", ".dll", ".js", ".jar"];

/// Extensions accepted for upload
pub const ALLOWED_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".webp"];

/// Declared media types accepted for upload
pub const ALLOWED_MEDIA_TYPES: &[&str] = &["image/png", "image/jpeg", "image/webp"];

/// Default upload size limit (5 MiB)
pub const DEFAULT_MAX_FILE_SIZE: usize = 5 * 1024 * 1024;

/// A file received from the caller, owned by a single request
#[derive(Debug, Clone)]
pub struct InboundFile {
    /// Original file name as sent by the client
    pub name: String,
    /// Media type declared by the client
    pub declared_media_type: String,
    /// Raw file contents
    pub bytes: Bytes,
}

impl InboundFile {
    pub fn new(
        name: impl Into<String>,
        declared_media_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            declared_media_type: declared_media_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Lower-cased extension including the leading dot, or empty
    ///
    /// Dotfiles such as `.png` have no extension.
    pub fn extension(&self) -> String {
        extension_of(&self.name)
    }

    pub fn size_bytes(&self) -> usize {
        self.bytes.len()
    }
}

/// Check whether a file may enter the pipeline
///
/// Checks run in a fixed order and the first failure wins:
/// blocked extension, allowed extension, declared media type, size.
pub fn check(file: &InboundFile, max_file_size: usize) -> PipelineOutcome<()> {
    check_declared(&file.name, &file.declared_media_type)?;

    if file.size_bytes() > max_file_size {
        return Err(Failure::too_large());
    }

    Ok(())
}

/// The name and media type checks of [`check`], usable before the body is read
pub fn check_declared(name: &str, declared_media_type: &str) -> PipelineOutcome<()> {
    let extension = extension_of(name);

    if BLOCKED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(Failure::rejected(MSG_EXECUTABLE));
    }

    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(Failure::rejected(MSG_BAD_EXTENSION));
    }

    if !ALLOWED_MEDIA_TYPES.contains(&declared_media_type) {
        return Err(Failure::rejected(MSG_BAD_MEDIA_TYPE));
    }

    Ok(())
}

fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .unwrap_or_default()
}
