//! Upload/transform/publish orchestration.
//!
//! Creation walks a fixed sequence of stages:
//!
//! ```text
//! Received -> Checked -> BackgroundRemoved -> Mirrored -> Published
//! ```
//!
//! Each transition consumes the previous state, so a stage can neither be
//! skipped nor re-entered, and the first failure ends the run. Nothing is
//! published unless removal and mirroring both succeeded, and at most one
//! publish happens per run.

use crate::error::{Failure, FailureKind, PipelineOutcome, MSG_MALFORMED_IMAGE_ID, MSG_NO_FILE, MSG_NO_IMAGE_ID};
use crate::publish::{PublishClient, PublishedImage};
use crate::removal::BackgroundRemover;
use crate::transform::{self, ProcessedImage};
use crate::validation::{self, InboundFile};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Name sent to the removal service when the upload had none
///
/// Validation currently refuses unnamed files, so this only guards the
/// removal request against an empty filename if that check is relaxed.
const FALLBACK_FILENAME: &str = "upload.png";

/// Stage reached by a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Checked,
    BackgroundRemoved,
    Mirrored,
    Published,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Checked => "checked",
            Stage::BackgroundRemoved => "background_removed",
            Stage::Mirrored => "mirrored",
            Stage::Published => "published",
        };
        f.write_str(name)
    }
}

/// State carried between creation stages
enum CreateState {
    Received(InboundFile),
    Checked(InboundFile),
    BackgroundRemoved(Bytes),
    Mirrored(ProcessedImage),
}

impl CreateState {
    fn stage(&self) -> Stage {
        match self {
            CreateState::Received(_) => Stage::Received,
            CreateState::Checked(_) => Stage::Checked,
            CreateState::BackgroundRemoved(_) => Stage::BackgroundRemoved,
            CreateState::Mirrored(_) => Stage::Mirrored,
        }
    }
}

/// Result of a single transition
enum Step {
    Next(CreateState),
    Done(PublishedImage),
}

/// Sequences validation, background removal, mirroring and publishing
pub struct Pipeline {
    remover: Arc<dyn BackgroundRemover>,
    publisher: Arc<PublishClient>,
    max_file_size: usize,
}

impl Pipeline {
    pub fn new(
        remover: Arc<dyn BackgroundRemover>,
        publisher: Arc<PublishClient>,
        max_file_size: usize,
    ) -> Self {
        Self {
            remover,
            publisher,
            max_file_size,
        }
    }

    /// Run the creation pipeline for an uploaded file
    #[instrument(skip(self, file), fields(filename = file.as_ref().map(|f| f.name.as_str())))]
    pub async fn create(&self, file: Option<InboundFile>) -> PipelineOutcome<PublishedImage> {
        let Some(file) = file else {
            record("create", Err(FailureKind::InvalidRequest));
            return Err(Failure::invalid_request(MSG_NO_FILE));
        };

        let mut state = CreateState::Received(file);

        let result = loop {
            let stage = state.stage();
            state = match self.advance(state).await {
                Ok(Step::Done(published)) => {
                    debug!(stage = %Stage::Published, "Pipeline advanced");
                    break Ok(published);
                }
                Ok(Step::Next(next)) => next,
                Err(failure) => {
                    warn!(stage = %stage, kind = %failure.kind, message = %failure.message, "Pipeline failed");
                    break Err(failure);
                }
            };
            debug!(stage = %state.stage(), "Pipeline advanced");
        };

        record("create", result.as_ref().map(|_| ()).map_err(|f| f.kind));
        result
    }

    /// Perform exactly one stage transition
    async fn advance(&self, state: CreateState) -> PipelineOutcome<Step> {
        match state {
            CreateState::Received(file) => {
                validation::check(&file, self.max_file_size)?;
                Ok(Step::Next(CreateState::Checked(file)))
            }
            CreateState::Checked(file) => {
                let filename = if file.name.is_empty() {
                    FALLBACK_FILENAME
                } else {
                    file.name.as_str()
                };
                let removed = self
                    .remover
                    .remove_background(file.bytes.clone(), filename, &file.declared_media_type)
                    .await?;
                Ok(Step::Next(CreateState::BackgroundRemoved(removed)))
            }
            CreateState::BackgroundRemoved(bytes) => {
                let mirrored = tokio::task::spawn_blocking(move || transform::mirror(&bytes))
                    .await
                    .map_err(|e| {
                        error!(error = %e, "Transform task failed");
                        Failure::transform_failed()
                    })??;
                Ok(Step::Next(CreateState::Mirrored(mirrored)))
            }
            CreateState::Mirrored(image) => {
                let published = self.publisher.publish(image).await?;
                Ok(Step::Done(published))
            }
        }
    }

    /// Delete a published image
    ///
    /// The identifier is URL-decoded and trimmed before use; an empty
    /// result fails without touching storage.
    #[instrument(skip(self))]
    pub async fn remove(&self, identifier: &str) -> PipelineOutcome<()> {
        let result = match normalize_identifier(identifier) {
            Ok(id) => self.publisher.unpublish(&id).await,
            Err(failure) => Err(failure),
        };

        if result.is_ok() {
            info!("Image removed");
        }
        record("remove", result.as_ref().map(|_| ()).map_err(|f| f.kind));
        result
    }
}

/// URL-decode and trim an image identifier
pub fn normalize_identifier(raw: &str) -> PipelineOutcome<String> {
    let decoded = urlencoding::decode(raw).map_err(|_| Failure::invalid_request(MSG_MALFORMED_IMAGE_ID))?;
    let trimmed = decoded.trim();

    if trimmed.is_empty() {
        return Err(Failure::invalid_request(MSG_NO_IMAGE_ID));
    }

    Ok(trimmed.to_string())
}

fn record(operation: &'static str, result: Result<(), FailureKind>) {
    let label = match result {
        Ok(()) => "success",
        Err(kind) => kind.as_str(),
    };
    metrics::counter!("pipeline_outcomes_total", "operation" => operation, "result" => label).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::removal::MockBackgroundRemover;
    use crate::storage::{DeleteStatus, MockObjectStore, StoredObject};
    use crate::test_support::png_bytes;
    use image::GenericImageView;
    use parking_lot::Mutex;
    use std::time::Duration;

    const MAX: usize = 5 * 1024 * 1024;

    fn store() -> MockObjectStore {
        let mut store = MockObjectStore::new();
        store.expect_name().return_const("mock");
        store
    }

    fn pipeline(remover: MockBackgroundRemover, store: MockObjectStore) -> Pipeline {
        let publisher = PublishClient::new(Arc::new(store), "processed-images", Duration::from_secs(1));
        Pipeline::new(Arc::new(remover), Arc::new(publisher), MAX)
    }

    fn untouched_remover() -> MockBackgroundRemover {
        let mut remover = MockBackgroundRemover::new();
        remover.expect_remove_background().never();
        remover
    }

    fn untouched_store() -> MockObjectStore {
        let mut store = store();
        store.expect_put().never();
        store.expect_delete().never();
        store
    }

    #[tokio::test]
    async fn test_end_to_end_success() {
        let input = png_bytes(40, 20);
        assert!(input.len() < 4096);

        let mut remover = MockBackgroundRemover::new();
        let returned = Bytes::from(input.clone());
        remover
            .expect_remove_background()
            .withf(|_, filename, media_type| filename == "photo.png" && media_type == "image/png")
            .times(1)
            .returning(move |_, _, _| Ok(returned.clone()));

        let uploaded = Arc::new(Mutex::new(Vec::new()));
        let sink = uploaded.clone();
        let mut store = store();
        store.expect_put().times(1).returning(move |bytes, _| {
            *sink.lock() = bytes;
            Ok(StoredObject {
                identifier: "processed-images/abc".to_string(),
                url: "https://res.cloudinary.com/demo/image/upload/v1/processed-images/abc.png".to_string(),
            })
        });

        let published = pipeline(remover, store)
            .create(Some(InboundFile::new("photo.png", "image/png", input)))
            .await
            .unwrap();

        assert_eq!(published.identifier, "processed-images/abc");
        assert_eq!(
            published.url,
            "https://res.cloudinary.com/demo/image/upload/v1/processed-images/abc.png"
        );

        // The stored image is the mirrored removal output
        let stored = image::load_from_memory(&uploaded.lock()).unwrap();
        assert_eq!(stored.get_pixel(0, 0).0, [0, 0, 255, 128]);
        assert_eq!(stored.get_pixel(39, 0).0, [255, 0, 0, 255]);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = pipeline(untouched_remover(), untouched_store())
            .create(None)
            .await
            .unwrap_err();

        assert_eq!(err.kind, FailureKind::InvalidRequest);
        assert_eq!(err.message, "No file uploaded.");
    }

    #[tokio::test]
    async fn test_blocked_extension_makes_no_calls() {
        let err = pipeline(untouched_remover(), untouched_store())
            .create(Some(InboundFile::new("payload.exe", "image/png", vec![0u8; 10])))
            .await
            .unwrap_err();

        assert_eq!(err.kind, FailureKind::Rejected);
        assert_eq!(err.message, "Executable files are not allowed.");
    }

    #[tokio::test]
    async fn test_wrong_media_type_makes_no_calls() {
        let err = pipeline(untouched_remover(), untouched_store())
            .create(Some(InboundFile::new("photo.png", "text/plain", vec![0u8; 10])))
            .await
            .unwrap_err();

        assert_eq!(err.kind, FailureKind::Rejected);
        assert_eq!(err.message, "Unsupported file type.");
    }

    #[tokio::test]
    async fn test_oversized_file_makes_no_calls() {
        let err = pipeline(untouched_remover(), untouched_store())
            .create(Some(InboundFile::new("photo.png", "image/png", vec![0u8; MAX + 1])))
            .await
            .unwrap_err();

        assert_eq!(err.kind, FailureKind::TooLarge);
    }

    #[tokio::test]
    async fn test_upstream_error_text_surfaces() {
        let mut remover = MockBackgroundRemover::new();
        remover
            .expect_remove_background()
            .times(1)
            .returning(|_, _, _| Err(Failure::upstream(Some("Insufficient credits".to_string()))));

        let err = pipeline(remover, untouched_store())
            .create(Some(InboundFile::new("photo.png", "image/png", png_bytes(4, 4))))
            .await
            .unwrap_err();

        assert_eq!(err.kind, FailureKind::UpstreamUnavailable);
        assert_eq!(err.message, "Insufficient credits");
    }

    #[tokio::test]
    async fn test_removal_timeout_skips_transform_and_publish() {
        let mut remover = MockBackgroundRemover::new();
        remover
            .expect_remove_background()
            .times(1)
            .returning(|_, _, _| Err(Failure::upstream(None)));

        let err = pipeline(remover, untouched_store())
            .create(Some(InboundFile::new("photo.png", "image/png", png_bytes(4, 4))))
            .await
            .unwrap_err();

        assert_eq!(err.kind, FailureKind::UpstreamUnavailable);
        assert_eq!(err.message, "Background removal failed.");
    }

    #[tokio::test]
    async fn test_transform_failure_skips_publish() {
        let mut remover = MockBackgroundRemover::new();
        remover
            .expect_remove_background()
            .times(1)
            .returning(|_, _, _| Ok(Bytes::from_static(b"garbage, not an image")));

        let err = pipeline(remover, untouched_store())
            .create(Some(InboundFile::new("photo.png", "image/png", png_bytes(4, 4))))
            .await
            .unwrap_err();

        assert_eq!(err.kind, FailureKind::TransformFailed);
    }

    #[tokio::test]
    async fn test_missing_filename_uses_fallback() {
        // An empty name fails validation, so exercise the fallback directly
        let mut remover = MockBackgroundRemover::new();
        remover
            .expect_remove_background()
            .withf(|_, filename, _| filename == FALLBACK_FILENAME)
            .times(1)
            .returning(|_, _, _| Err(Failure::upstream(None)));

        let pipeline = pipeline(remover, untouched_store());
        let state = CreateState::Checked(InboundFile::new("", "image/png", vec![1]));
        assert!(pipeline.advance(state).await.is_err());
    }

    #[tokio::test]
    async fn test_publish_ends_the_run() {
        let mut store = store();
        store.expect_put().times(1).returning(|_, _| {
            Ok(StoredObject {
                identifier: "processed-images/abc".to_string(),
                url: "https://cdn.example.com/abc.png".to_string(),
            })
        });

        let pipeline = pipeline(untouched_remover(), store);
        let state = CreateState::Mirrored(ProcessedImage { bytes: vec![1, 2, 3] });

        match pipeline.advance(state).await.unwrap() {
            Step::Done(published) => assert_eq!(published.identifier, "processed-images/abc"),
            Step::Next(next) => panic!("expected the run to end, got {}", next.stage()),
        }
    }

    #[tokio::test]
    async fn test_remove_blank_identifier_skips_storage() {
        let pipeline = pipeline(untouched_remover(), untouched_store());

        for id in ["", "   ", "%20%20"] {
            let err = pipeline.remove(id).await.unwrap_err();
            assert_eq!(err.kind, FailureKind::InvalidRequest);
            assert_eq!(err.message, "Image ID is required.");
        }
    }

    #[tokio::test]
    async fn test_remove_not_found() {
        let mut store = store();
        store
            .expect_delete()
            .withf(|id| id == "processed-images/abc")
            .times(1)
            .returning(|_| Ok(DeleteStatus::NotFound));

        let err = pipeline(untouched_remover(), store)
            .remove("processed-images%2Fabc")
            .await
            .unwrap_err();

        assert_eq!(err.kind, FailureKind::NotFound);
        assert_eq!(err.status(), axum::http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_remove_success() {
        let mut store = store();
        store
            .expect_delete()
            .withf(|id| id == "abc")
            .times(1)
            .returning(|_| Ok(DeleteStatus::Deleted));

        assert!(pipeline(untouched_remover(), store).remove(" abc ").await.is_ok());
    }

    #[test]
    fn test_normalize_identifier() {
        assert_eq!(normalize_identifier("a%2Fb").unwrap(), "a/b");
        assert_eq!(normalize_identifier("  id  ").unwrap(), "id");
        assert_eq!(
            normalize_identifier("%FF").unwrap_err().message,
            "Image ID is malformed."
        );
    }
}
