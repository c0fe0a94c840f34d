use super::{DeleteStatus, ObjectStore, StoreError, StoredObject};
use crate::config::S3Config;
use anyhow::Result;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// S3 image store with public-read style URLs
pub struct S3Store {
    client: S3Client,
    bucket: String,
    public_base_url: String,
}

impl S3Store {
    /// Create a new S3 store
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let store = Self::with_client(S3Client::from_conf(s3_config_builder.build()), config);

        info!(
            bucket = %config.bucket,
            region = %config.region,
            public_base_url = %store.public_base_url,
            "S3 store initialized"
        );

        Ok(store)
    }

    fn with_client(client: S3Client, config: &S3Config) -> Self {
        Self {
            client,
            bucket: config.bucket.clone(),
            public_base_url: public_base_url(config),
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }
}

/// Base URL objects are publicly served from
fn public_base_url(config: &S3Config) -> String {
    match config.public_base_url {
        Some(ref url) => url.trim_end_matches('/').to_string(),
        None => format!("https://{}.s3.{}.amazonaws.com", config.bucket, config.region),
    }
}

/// Generate an object key: {folder}/{uuid}.png
fn generate_key(folder: &str) -> String {
    let folder = folder
        .split('/')
        .filter(|part| !part.is_empty())
        .map(sanitize_path_component)
        .collect::<Vec<_>>()
        .join("/");

    if folder.is_empty() {
        format!("{}.png", Uuid::new_v4())
    } else {
        format!("{}/{}.png", folder, Uuid::new_v4())
    }
}

/// Sanitize a path component to prevent path traversal
fn sanitize_path_component(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

#[async_trait]
impl ObjectStore for S3Store {
    #[instrument(skip(self, bytes), fields(size_bytes = bytes.len()))]
    async fn put(&self, bytes: Vec<u8>, folder: &str) -> Result<StoredObject, StoreError> {
        let key = generate_key(folder);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes))
            .content_type("image/png")
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        debug!(key = %key, "Image uploaded to S3");

        Ok(StoredObject {
            url: self.object_url(&key),
            identifier: key,
        })
    }

    /// S3 deletes are idempotent, so existence is checked first
    #[instrument(skip(self))]
    async fn delete(&self, identifier: &str) -> Result<DeleteStatus, StoreError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(identifier)
            .send()
            .await
        {
            Ok(_) => {}
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    return Ok(DeleteStatus::NotFound);
                }
                return Err(StoreError::Request(e.to_string()));
            }
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(identifier)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        debug!(key = %identifier, "Image deleted from S3");
        Ok(DeleteStatus::Deleted)
    }

    fn name(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve;
    use aws_sdk_s3::config::{Credentials, Region};
    use axum::extract::Request;
    use axum::http::{Method, StatusCode};
    use axum::Router;
    use parking_lot::Mutex;
    use std::sync::Arc;

    type Calls = Arc<Mutex<Vec<String>>>;

    /// Path-style S3 stand-in answering HEAD with `head_status`
    async fn stub_store(head_status: StatusCode) -> (S3Store, Calls) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let seen = calls.clone();

        let router = Router::new().fallback(move |req: Request| {
            let seen = seen.clone();
            async move {
                seen.lock()
                    .push(format!("{} {}", req.method(), req.uri().path()));
                match *req.method() {
                    Method::HEAD => head_status,
                    Method::PUT => StatusCode::OK,
                    Method::DELETE => StatusCode::NO_CONTENT,
                    _ => StatusCode::METHOD_NOT_ALLOWED,
                }
            }
        });
        let endpoint = serve(router).await;

        let conf = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("eu-west-1"))
            .credentials_provider(Credentials::new("test", "test", None, None, "static"))
            .endpoint_url(endpoint)
            .force_path_style(true)
            .build();

        let store = S3Store::with_client(S3Client::from_conf(conf), &config(None));
        (store, calls)
    }

    #[tokio::test]
    async fn test_put_returns_key_and_public_url() {
        let (store, calls) = stub_store(StatusCode::OK).await;

        let stored = store.put(vec![1, 2, 3], "processed-images").await.unwrap();

        let id = stored
            .identifier
            .strip_prefix("processed-images/")
            .and_then(|rest| rest.strip_suffix(".png"))
            .unwrap();
        assert!(Uuid::parse_str(id).is_ok());
        assert_eq!(
            stored.url,
            format!(
                "https://images.s3.eu-west-1.amazonaws.com/{}",
                stored.identifier
            )
        );
        assert_eq!(
            *calls.lock(),
            vec![format!("PUT /images/{}", stored.identifier)]
        );
    }

    #[tokio::test]
    async fn test_delete_existing_object() {
        let (store, calls) = stub_store(StatusCode::OK).await;

        let status = store.delete("processed-images/abc.png").await.unwrap();

        assert_eq!(status, DeleteStatus::Deleted);
        assert_eq!(
            *calls.lock(),
            vec![
                "HEAD /images/processed-images/abc.png".to_string(),
                "DELETE /images/processed-images/abc.png".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_missing_object_skips_delete() {
        let (store, calls) = stub_store(StatusCode::NOT_FOUND).await;

        let status = store.delete("processed-images/gone.png").await.unwrap();

        assert_eq!(status, DeleteStatus::NotFound);
        assert_eq!(
            *calls.lock(),
            vec!["HEAD /images/processed-images/gone.png".to_string()]
        );
    }

    #[tokio::test]
    async fn test_delete_head_failure_is_error() {
        let (store, calls) = stub_store(StatusCode::FORBIDDEN).await;

        let result = store.delete("processed-images/abc.png").await;

        assert!(matches!(result, Err(StoreError::Request(_))));
        assert!(calls.lock().iter().all(|call| call.starts_with("HEAD ")));
    }

    fn config(public_base_url: Option<&str>) -> S3Config {
        S3Config {
            bucket: "images".to_string(),
            region: "eu-west-1".to_string(),
            endpoint_url: None,
            force_path_style: false,
            public_base_url: public_base_url.map(String::from),
        }
    }

    #[test]
    fn test_generate_key() {
        let key = generate_key("processed-images");
        assert!(key.starts_with("processed-images/"));
        assert!(key.ends_with(".png"));

        let id = key
            .trim_start_matches("processed-images/")
            .trim_end_matches(".png");
        assert!(Uuid::parse_str(id).is_ok());
    }

    #[test]
    fn test_generate_key_sanitizes_folder() {
        let key = generate_key("../team a//out");
        assert!(key.starts_with("__/team_a/out/"));
        assert!(!key.contains(".."));

        assert!(!generate_key("").starts_with('/'));
    }

    #[test]
    fn test_sanitize_path_component() {
        assert_eq!(sanitize_path_component("images-001"), "images-001");
        assert_eq!(sanitize_path_component("dev..ice"), "dev__ice");
        assert_eq!(sanitize_path_component("hello world"), "hello_world");
    }

    #[test]
    fn test_public_base_url() {
        assert_eq!(
            public_base_url(&config(None)),
            "https://images.s3.eu-west-1.amazonaws.com"
        );
        assert_eq!(
            public_base_url(&config(Some("https://cdn.example.com/"))),
            "https://cdn.example.com"
        );
    }
}
