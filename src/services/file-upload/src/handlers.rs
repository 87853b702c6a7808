//! HTTP request handlers for the upload service
//!
//! Upload intake, retrieval of stored files, listing, the upload form and
//! the health check.

use axum::{
    body::Body,
    extract::{multipart::MultipartRejection, Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use chrono::Utc;
use std::{collections::HashMap, io::ErrorKind};
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::{
    error::{UploadError, UploadResult},
    models::{HealthResponse, UploadListResponse, UploadResponse},
    utils::file_type::guess_from_name,
    AppState,
};

/// Browser form posting to `/upload`
const INDEX_PAGE: &str = include_str!("../static/index.html");

/// Upload file handler
pub async fn upload_file(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> UploadResult<Json<UploadResponse>> {
    // A request that is not multipart at all carries no file either
    let multipart = multipart.map_err(|rejection| {
        debug!("Upload without a multipart body: {}", rejection.body_text());
        UploadError::MissingFile
    })?;

    let response = state.pipeline.process_multipart(multipart).await?;

    Ok(Json(response))
}

/// Serve a stored file
pub async fn download_upload(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> UploadResult<Response> {
    let path = state.resolver.locate(&filename).await?;

    let file = tokio::fs::File::open(&path).await.map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            UploadError::file_not_found(&filename)
        } else {
            UploadError::storage_unavailable(format!("cannot open {}: {}", filename, e))
        }
    })?;
    let size = file
        .metadata()
        .await
        .map_err(|e| UploadError::storage_unavailable(format!("cannot stat {}: {}", filename, e)))?
        .len();

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&guess_from_name(&filename))
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("inline; filename=\"{}\"", filename)).map_err(|e| {
            UploadError::InternalError {
                message: format!("invalid header value: {}", e),
            }
        })?,
    );

    debug!("Serving {} ({} bytes)", filename, size);

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((StatusCode::OK, headers, body).into_response())
}

/// List stored files
pub async fn list_uploads(State(state): State<AppState>) -> UploadResult<Json<UploadListResponse>> {
    let files = state.resolver.list().await?;
    let total_size_bytes = files.iter().map(|f| f.size).sum();

    Ok(Json(UploadListResponse {
        total: files.len(),
        total_size_bytes,
        files,
    }))
}

/// Upload form
pub async fn index_page() -> Html<&'static str> {
    Html(INDEX_PAGE)
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let mut services = HashMap::new();

    services.insert(
        "storage".to_string(),
        state.resolver.health_check().await.is_ok(),
    );

    let all_healthy = services.values().all(|&healthy| healthy);
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy {
            "healthy".to_string()
        } else {
            "degraded".to_string()
        },
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        services,
    };

    (status_code, Json(response))
}
