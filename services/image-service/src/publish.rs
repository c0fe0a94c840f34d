use crate::error::{Failure, PipelineOutcome, MSG_DELETE_FAILED, MSG_UPLOAD_FAILED};
use crate::storage::{DeleteStatus, ObjectStore};
use crate::transform::ProcessedImage;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

/// A hosted image as returned to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedImage {
    #[serde(rename = "imageId")]
    pub identifier: String,
    #[serde(rename = "imageUrl")]
    pub url: String,
}

/// Publishes processed images to object storage under a fixed folder
///
/// Every storage call is bounded by `timeout`.
pub struct PublishClient {
    store: Arc<dyn ObjectStore>,
    folder: String,
    timeout: Duration,
}

impl PublishClient {
    pub fn new(store: Arc<dyn ObjectStore>, folder: impl Into<String>, timeout: Duration) -> Self {
        Self {
            store,
            folder: folder.into(),
            timeout,
        }
    }

    /// Upload an image and return its identifier and public URL
    #[instrument(skip(self, image), fields(backend = self.store.name(), size_bytes = image.bytes.len()))]
    pub async fn publish(&self, image: ProcessedImage) -> PipelineOutcome<PublishedImage> {
        let start = Instant::now();
        let result = tokio::time::timeout(self.timeout, self.store.put(image.bytes, &self.folder)).await;
        metrics::histogram!("publish_latency_seconds").record(start.elapsed().as_secs_f64());

        match result {
            Ok(Ok(stored)) => {
                info!(
                    image_id = %stored.identifier,
                    latency_ms = start.elapsed().as_millis() as u64,
                    "Image published"
                );
                Ok(PublishedImage {
                    identifier: stored.identifier,
                    url: stored.url,
                })
            }
            Ok(Err(e)) => {
                error!(error = %e, "Cloud upload failed");
                Err(Failure::publish_failed(MSG_UPLOAD_FAILED))
            }
            Err(_) => {
                error!(timeout_ms = self.timeout.as_millis() as u64, "Cloud upload timed out");
                Err(Failure::publish_failed(MSG_UPLOAD_FAILED))
            }
        }
    }

    /// Delete a previously published image
    #[instrument(skip(self), fields(backend = self.store.name()))]
    pub async fn unpublish(&self, identifier: &str) -> PipelineOutcome<()> {
        let result = tokio::time::timeout(self.timeout, self.store.delete(identifier)).await;

        match result {
            Ok(Ok(DeleteStatus::Deleted)) => {
                info!(image_id = %identifier, "Image deleted");
                Ok(())
            }
            Ok(Ok(DeleteStatus::NotFound)) => {
                warn!(image_id = %identifier, "Image not found for deletion");
                Err(Failure::not_found())
            }
            Ok(Ok(DeleteStatus::Other(token))) => {
                error!(image_id = %identifier, result = %token, "Unexpected delete result");
                Err(Failure::publish_failed(MSG_DELETE_FAILED))
            }
            Ok(Err(e)) => {
                error!(image_id = %identifier, error = %e, "Delete request failed");
                Err(Failure::publish_failed(MSG_DELETE_FAILED))
            }
            Err(_) => {
                error!(image_id = %identifier, timeout_ms = self.timeout.as_millis() as u64, "Delete timed out");
                Err(Failure::publish_failed(MSG_DELETE_FAILED))
            }
        }
    }
}
