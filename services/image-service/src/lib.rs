//! Image Service
//!
//! Accepts an uploaded image, removes its background through an external
//! recognition service, mirrors it horizontally and publishes the result to
//! object storage, returning a durable public URL. Published images can be
//! deleted again by identifier.
//!
//! ## Features
//!
//! - **Upfront Validation**: Extension, media type and size are checked
//!   before any network call is made
//! - **Single-Attempt Calls**: Upstream failures are surfaced, never retried
//! - **Normalized Failures**: Every failure resolves to one [`FailureKind`]
//!   with a fixed HTTP status
//! - **Pluggable Storage**: Cloudinary or S3 behind the [`ObjectStore`] trait
//!
//! ## Architecture
//!
//! ```text
//!  POST /api/images/upload
//!        │
//!        ▼
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Validation   │──▶│ Background   │──▶│ Mirror       │──▶│ Publish      │
//! │ check        │   │ Removal API  │   │ (PNG)        │   │ Client       │
//! └──────────────┘   └──────────────┘   └──────────────┘   └──────────────┘
//!                                                                 │
//!  DELETE /api/images/{id} ───────────────────────────────────────┤
//!                                                                 ▼
//!                                                          ┌──────────────┐
//!                                                          │ Cloudinary / │
//!                                                          │ S3           │
//!                                                          └──────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod publish;
pub mod rate_limit;
pub mod removal;
pub mod storage;
pub mod transform;
pub mod validation;

#[cfg(test)]
mod test_support;

pub use api::{create_router, start_api_server, AppState};
pub use crate::config::Config;
pub use error::{Failure, FailureKind, PipelineOutcome};
pub use pipeline::{Pipeline, Stage};
pub use publish::{PublishClient, PublishedImage};
pub use rate_limit::RateLimiter;
pub use removal::{BackgroundRemover, RemoveBgClient};
pub use storage::{CloudinaryStore, ObjectStore, S3Store};
pub use transform::{mirror, ProcessedImage};
pub use validation::{check, InboundFile};
