//! # File Upload Service
//!
//! Accepts single-file multipart uploads and stores them on local disk:
//! - MIME allow-list checked before any byte is written
//! - size ceiling enforced while the body streams in
//! - client filenames sanitized and de-duplicated inside one storage directory
//! - stored files served back by name
//!
//! ## Usage
//!
//! ```rust,no_run
//! use file_upload_service::{create_router, AppState, UploadServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = UploadServiceConfig::load(None)?;
//!     let state = AppState::new(config).await?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3002").await?;
//!     axum::serve(listener, create_router(state)).await?;
//!
//!     Ok(())
//! }
//! ```

use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::{sync::Arc, time::Duration};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

pub mod config_types;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod pipeline;
pub mod storage;
pub mod utils;


pub use config_types::UploadServiceConfig;
pub use error::{UploadError, UploadResult};
pub use pipeline::UploadPipeline;
pub use storage::StorageResolver;

use handlers::*;
use middleware::security_headers_middleware;

/// Room for multipart boundaries and part headers on top of the file itself
const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;

/// Application state shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<UploadPipeline>,
    pub resolver: Arc<StorageResolver>,
    pub config: Arc<UploadServiceConfig>,
}

impl AppState {
    /// Build the services and prepare the storage directory
    pub async fn new(config: UploadServiceConfig) -> UploadResult<Self> {
        config.validate()?;

        let resolver = Arc::new(StorageResolver::new(&config.storage)?);
        resolver.prepare().await?;

        let pipeline = Arc::new(UploadPipeline::new(config.upload.clone(), resolver.clone()));

        info!(
            "Upload service ready: storing under {}, accepting {:?} up to {} bytes",
            resolver.root().display(),
            config.upload.allowed_types,
            config.upload.max_bytes
        );

        Ok(Self {
            pipeline,
            resolver,
            config: Arc::new(config),
        })
    }
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let body_limit = state
        .config
        .upload
        .max_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    Router::new()
        .route("/", get(index_page))
        .route("/health", get(health_check))
        .route(
            "/upload",
            post(upload_file).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/uploads", get(list_uploads))
        .route("/uploads/:filename", get(download_upload))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TimeoutLayer::new(Duration::from_secs(
                    state.config.server.request_timeout,
                )))
                .layer(from_fn_with_state(
                    state.clone(),
                    security_headers_middleware,
                )),
        )
        .with_state(state)
}
