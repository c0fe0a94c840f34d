use super::{DeleteStatus, ObjectStore, StoreError, StoredObject};
use crate::config::CloudinaryConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

/// Cloudinary image store using signed upload/destroy calls
pub struct CloudinaryStore {
    http: reqwest::Client,
    base_url: String,
    cloud_name: String,
    api_key: String,
    api_secret: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    public_id: Option<String>,
    secure_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DestroyResponse {
    result: Option<String>,
}

impl CloudinaryStore {
    /// Create a new Cloudinary store
    pub fn new(config: &CloudinaryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("Failed to build Cloudinary HTTP client")?;

        info!(cloud_name = %config.cloud_name, "Cloudinary store initialized");

        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            cloud_name: config.cloud_name.clone(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
        })
    }

    fn endpoint(&self, action: &str) -> String {
        format!("{}/{}/image/{}", self.base_url, self.cloud_name, action)
    }

    fn timestamp() -> String {
        chrono::Utc::now().timestamp().to_string()
    }
}

/// Sign request parameters the way the Cloudinary API expects
///
/// Parameters are sorted by name, joined as `k=v` pairs with `&`, suffixed
/// with the API secret and hashed with SHA-256.
pub fn sign(params: &[(&str, &str)], api_secret: &str) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let to_sign = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    format!("{:x}", Sha256::digest(format!("{to_sign}{api_secret}").as_bytes()))
}

/// Pull `error.message` out of a Cloudinary error body
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error")?.get("message")?.as_str().map(String::from))
        .unwrap_or_else(|| body.chars().take(200).collect())
}

#[async_trait]
impl ObjectStore for CloudinaryStore {
    #[instrument(skip(self, bytes), fields(size_bytes = bytes.len()))]
    async fn put(&self, bytes: Vec<u8>, folder: &str) -> Result<StoredObject, StoreError> {
        let timestamp = Self::timestamp();
        let signature = sign(
            &[("folder", folder), ("timestamp", timestamp.as_str())],
            &self.api_secret,
        );

        let file = Part::bytes(bytes)
            .file_name("image.png")
            .mime_str("image/png")
            .map_err(|e| StoreError::Request(e.to_string()))?;

        let form = Form::new()
            .part("file", file)
            .text("folder", folder.to_string())
            .text("timestamp", timestamp)
            .text("api_key", self.api_key.clone())
            .text("signature", signature)
            .text("signature_algorithm", "sha256");

        let response = self
            .http
            .post(self.endpoint("upload"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        let parsed: UploadResponse = serde_json::from_str(&body)
            .map_err(|e| StoreError::MissingResult(e.to_string()))?;

        match (parsed.public_id, parsed.secure_url) {
            (Some(identifier), Some(url)) => {
                debug!(identifier = %identifier, "Image uploaded to Cloudinary");
                Ok(StoredObject { identifier, url })
            }
            _ => Err(StoreError::MissingResult(
                "public_id or secure_url absent".to_string(),
            )),
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, identifier: &str) -> Result<DeleteStatus, StoreError> {
        let timestamp = Self::timestamp();
        let signature = sign(
            &[
                ("invalidate", "true"),
                ("public_id", identifier),
                ("timestamp", timestamp.as_str()),
            ],
            &self.api_secret,
        );

        let params = [
            ("public_id", identifier),
            ("invalidate", "true"),
            ("timestamp", timestamp.as_str()),
            ("api_key", self.api_key.as_str()),
            ("signature", signature.as_str()),
            ("signature_algorithm", "sha256"),
        ];

        let response = self
            .http
            .post(self.endpoint("destroy"))
            .form(&params)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        let parsed: DestroyResponse = serde_json::from_str(&body)
            .map_err(|e| StoreError::MissingResult(e.to_string()))?;

        let token = parsed
            .result
            .ok_or_else(|| StoreError::MissingResult("result absent".to_string()))?;

        Ok(DeleteStatus::from_token(&token))
    }

    fn name(&self) -> &'static str {
        "cloudinary"
    }
}
