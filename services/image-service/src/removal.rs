use crate::config::RemovalConfig;
use crate::error::{Failure, PipelineOutcome};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use std::time::{Duration, Instant};
use tracing::{error, info, instrument};

/// Multipart field carrying the image
const IMAGE_FIELD: &str = "image_file";

/// Credential header understood by the removal API
const API_KEY_HEADER: &str = "X-Api-Key";

/// Removes the background from an image through an external service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackgroundRemover: Send + Sync {
    /// Send the image once and return the processed bytes untouched
    async fn remove_background(
        &self,
        bytes: Bytes,
        filename: &str,
        media_type: &str,
    ) -> PipelineOutcome<Bytes>;
}

/// HTTP client for a remove.bg compatible endpoint
pub struct RemoveBgClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl RemoveBgClient {
    /// Create a new client bounded by the configured timeout
    pub fn new(config: &RemovalConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("Failed to build background removal HTTP client")?;

        info!(api_url = %config.api_url, timeout_ms = config.timeout_ms, "Background removal client initialized");

        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    async fn send(&self, bytes: Bytes, filename: &str, media_type: &str) -> PipelineOutcome<Bytes> {
        let part = Part::bytes(bytes.to_vec())
            .file_name(filename.to_string())
            .mime_str(media_type)
            .map_err(|e| {
                error!(error = %e, "Invalid media type for removal request");
                Failure::upstream(None)
            })?;
        let form = Form::new().part(IMAGE_FIELD, part);

        let response = self
            .http
            .post(&self.api_url)
            .header(API_KEY_HEADER, &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, timeout = e.is_timeout(), "Background removal request failed");
                Failure::upstream(None)
            })?;

        let status = response.status();
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("application/json"))
            .unwrap_or(false);

        let body = response.bytes().await.map_err(|e| {
            error!(error = %e, "Failed to read background removal response");
            Failure::upstream(None)
        })?;

        if status.is_success() {
            return Ok(body);
        }

        error!(status = %status, "Background removal rejected the image");

        let message = if is_json {
            extract_error_message(&body)
        } else {
            None
        };

        Err(Failure::upstream(message))
    }
}

#[async_trait]
impl BackgroundRemover for RemoveBgClient {
    #[instrument(skip(self, bytes), fields(size_bytes = bytes.len()))]
    async fn remove_background(
        &self,
        bytes: Bytes,
        filename: &str,
        media_type: &str,
    ) -> PipelineOutcome<Bytes> {
        let start = Instant::now();
        let result = self.send(bytes, filename, media_type).await;
        let latency = start.elapsed();

        metrics::histogram!("removal_latency_seconds").record(latency.as_secs_f64());

        match &result {
            Ok(output) => info!(
                latency_ms = latency.as_millis() as u64,
                output_bytes = output.len(),
                "Background removal completed"
            ),
            Err(failure) => error!(
                latency_ms = latency.as_millis() as u64,
                message = %failure.message,
                "Background removal failed"
            ),
        }

        result
    }
}

/// Pull a readable message out of a JSON error envelope
///
/// Looks at the first entry of `errors`, preferring `title` over `detail`.
/// Anything unparsable yields `None`.
pub fn extract_error_message(body: &[u8]) -> Option<String> {
    let envelope: serde_json::Value = serde_json::from_slice(body).ok()?;
    let first = envelope.get("errors")?.get(0)?;

    ["title", "detail"]
        .iter()
        .filter_map(|field| first.get(*field).and_then(|v| v.as_str()))
        .find(|text| !text.is_empty())
        .map(str::to_string)
}
