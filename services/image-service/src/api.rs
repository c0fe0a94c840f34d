use crate::config::ApiConfig;
use crate::error::{Failure, MSG_MALFORMED_IMAGE_ID, MSG_MALFORMED_UPLOAD, MSG_UNEXPECTED_FIELD};
use crate::pipeline::Pipeline;
use crate::publish::PublishedImage;
use crate::rate_limit::{rate_limit, RateLimiter};
use crate::validation::{self, InboundFile};
use anyhow::{Context, Result};
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::PathRejection,
        DefaultBodyLimit, Multipart, Path, Request, State,
    },
    http::{header, HeaderName, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use std::any::Any;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::sensitive_headers::SetSensitiveRequestHeadersLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, instrument, warn};

/// Multipart field carrying the uploaded file
pub const UPLOAD_FIELD: &str = "image";

/// Slack on top of the file size limit for multipart framing
const MULTIPART_OVERHEAD: usize = 64 * 1024;

const MSG_ROUTE_NOT_FOUND: &str = "Route not found.";
const MSG_INTERNAL: &str = "Internal server error.";
const MSG_ORIGIN_NOT_ALLOWED: &str = "CORS error: Origin not allowed.";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub max_file_size: usize,
}

/// Error body shared by every failure response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: bool,
    pub message: String,
}

impl ErrorResponse {
    fn new(message: impl Into<String>) -> Self {
        Self {
            error: true,
            message: message.into(),
        }
    }
}

/// Delete response
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
}

/// A pipeline failure on its way to the wire
#[derive(Debug)]
pub struct ApiError(pub Failure);

impl From<Failure> for ApiError {
    fn from(failure: Failure) -> Self {
        Self(failure)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status();
        if status.is_server_error() {
            error!(kind = %self.0.kind, message = %self.0.message, "Request failed");
        } else {
            warn!(kind = %self.0.kind, message = %self.0.message, "Request rejected");
        }

        (status, Json(ErrorResponse::new(self.0.message))).into_response()
    }
}

/// Origins allowed to call the API from a browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginPolicy {
    Any,
    List(Vec<HeaderValue>),
}

impl OriginPolicy {
    /// Build from configured origins; `*` anywhere allows every origin
    pub fn from_config(origins: &[String]) -> Self {
        if origins.iter().any(|o| o.trim() == "*") {
            return OriginPolicy::Any;
        }

        OriginPolicy::List(
            origins
                .iter()
                .map(|o| o.trim())
                .filter(|o| !o.is_empty())
                .filter_map(|o| o.parse().ok())
                .collect(),
        )
    }

    pub fn allows(&self, origin: &HeaderValue) -> bool {
        match self {
            OriginPolicy::Any => true,
            OriginPolicy::List(origins) => origins.contains(origin),
        }
    }

    fn cors_layer(&self) -> CorsLayer {
        let cors = match self {
            OriginPolicy::Any => CorsLayer::new().allow_origin(AnyOrigin),
            OriginPolicy::List(origins) => CorsLayer::new().allow_origin(origins.clone()),
        };
        cors.allow_methods(AnyOrigin).allow_headers(AnyOrigin)
    }
}

/// Refuse cross-origin requests from origins outside the policy with 403
///
/// Requests without an `Origin` header pass through.
async fn enforce_origin(
    State(policy): State<Arc<OriginPolicy>>,
    req: Request,
    next: Next,
) -> Response {
    if let Some(origin) = req.headers().get(header::ORIGIN) {
        if !policy.allows(origin) {
            warn!(origin = ?origin, "Origin not allowed");
            return (
                StatusCode::FORBIDDEN,
                Json(ErrorResponse::new(MSG_ORIGIN_NOT_ALLOWED)),
            )
                .into_response();
        }
    }

    next.run(req).await
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig, limiter: Arc<RateLimiter>) -> Router {
    let routes = Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/images/upload",
            post(upload_image).fallback(route_not_found),
        )
        .route(
            "/api/images/:image_id",
            delete(delete_image).fallback(route_not_found),
        )
        .fallback(route_not_found);

    with_layers(routes, state, config, limiter)
}

/// Wrap routes in the shared middleware stack
fn with_layers(
    routes: Router<AppState>,
    state: AppState,
    config: &ApiConfig,
    limiter: Arc<RateLimiter>,
) -> Router {
    let policy = Arc::new(OriginPolicy::from_config(&config.cors_origins));
    let cors = policy.cors_layer();

    let trace = TraceLayer::new_for_http().make_span_with(|req: &Request| {
        let request_id = req
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        info_span!(
            "request",
            method = %req.method(),
            uri = %req.uri(),
            request_id = %request_id
        )
    });

    let body_limit = state.max_file_size.saturating_add(MULTIPART_OVERHEAD);

    routes
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(limiter, rate_limit))
        .layer(cors)
        .layer(middleware::from_fn_with_state(policy, enforce_origin))
        .layer(trace)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(SetSensitiveRequestHeadersLayer::new([
            header::AUTHORIZATION,
            header::COOKIE,
            HeaderName::from_static("x-api-key"),
        ]))
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "image-service"
    }))
}

async fn route_not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::new(MSG_ROUTE_NOT_FOUND)),
    )
}

fn handle_panic(_err: Box<dyn Any + Send + 'static>) -> Response {
    error!("Handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new(MSG_INTERNAL)),
    )
        .into_response()
}

/// Map a multipart read error, keeping body-limit overruns as size failures
fn multipart_failure(err: MultipartError) -> Failure {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Failure::too_large()
    } else {
        warn!(error = %err, "Malformed multipart body");
        Failure::invalid_request(MSG_MALFORMED_UPLOAD)
    }
}

/// Pull the upload field out of a multipart body
///
/// Name and media type are checked before the body is read, so a refused
/// file is reported as refused even when it also overruns the body limit.
async fn read_upload(mut multipart: Multipart) -> Result<Option<InboundFile>, Failure> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_failure)? {
        if field.name() != Some(UPLOAD_FIELD) {
            // Plain form values are ignored; a file under any other name is refused
            if field.file_name().is_some() {
                return Err(Failure::invalid_request(MSG_UNEXPECTED_FIELD));
            }
            continue;
        }

        let name = field.file_name().unwrap_or_default().to_string();
        let media_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();

        validation::check_declared(&name, &media_type)?;

        let bytes = field.bytes().await.map_err(multipart_failure)?;
        return Ok(Some(InboundFile::new(name, media_type, bytes)));
    }

    Ok(None)
}

/// Upload an image through the full pipeline
#[instrument(skip_all)]
async fn upload_image(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PublishedImage>, ApiError> {
    let file = match multipart {
        Ok(multipart) => read_upload(multipart).await?,
        Err(rejection) => {
            warn!(error = %rejection, "Upload without multipart body");
            None
        }
    };

    let published = state.pipeline.create(file).await?;
    Ok(Json(published))
}

/// Delete a published image
#[instrument(skip_all)]
async fn delete_image(
    State(state): State<AppState>,
    image_id: Result<Path<String>, PathRejection>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let Path(image_id) = image_id.map_err(|rejection| {
        warn!(error = %rejection, "Undecodable image id");
        Failure::invalid_request(MSG_MALFORMED_IMAGE_ID)
    })?;

    state.pipeline.remove(&image_id).await?;
    Ok(Json(DeleteResponse { success: true }))
}

/// Start the API server, stopping when `shutdown` resolves
pub async fn start_api_server(
    router: Router,
    config: &ApiConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting image API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("API server error")?;

    Ok(())
}
