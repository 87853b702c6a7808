//! Upload pipeline
//!
//! Takes one multipart request through presence, type and size checks
//! before anything becomes visible in the storage directory. A rejected or
//! abandoned upload never leaves a file behind: the body is streamed into a
//! staging file owned by [`StagedUpload`](crate::storage::StagedUpload),
//! which removes itself unless the final commit succeeds.

use axum::{
    extract::multipart::{Multipart, MultipartError},
    http::StatusCode,
};
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use std::{sync::Arc, time::Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config_types::UploadConfig,
    error::{UploadError, UploadResult},
    models::{UploadRequest, UploadResponse, UploadStage},
    storage::StorageResolver,
    utils::{
        file_type::{is_allowed_file_type, normalize_allow_list, normalize_mime_type},
        size::format_bytes,
    },
};

/// Validates and stores uploads
#[derive(Debug, Clone)]
pub struct UploadPipeline {
    config: Arc<UploadConfig>,
    resolver: Arc<StorageResolver>,
}

impl UploadPipeline {
    pub fn new(mut config: UploadConfig, resolver: Arc<StorageResolver>) -> Self {
        config.allowed_types = normalize_allow_list(&config.allowed_types);

        Self {
            config: Arc::new(config),
            resolver,
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Find the file part of a multipart body and run it through the pipeline.
    ///
    /// Parts with another field name, and parts without a filename, are
    /// skipped. A body with no usable file part is a [`UploadError::MissingFile`].
    pub async fn process_multipart(&self, mut multipart: Multipart) -> UploadResult<UploadResponse> {
        let max_bytes = self.config.max_bytes;

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| map_multipart_error(e, max_bytes))?
        {
            if field.name() != Some(self.config.field_name.as_str()) {
                debug!("Skipping multipart field {:?}", field.name());
                continue;
            }

            let Some(original_name) = field.file_name().map(str::to_string) else {
                debug!(
                    "Skipping field {} without a filename",
                    self.config.field_name
                );
                continue;
            };
            let content_type = field.content_type().map(str::to_string);
            let body = field.map_err(move |e| map_multipart_error(e, max_bytes));

            return self
                .accept(UploadRequest::new(original_name, content_type, body))
                .await;
        }

        Err(UploadError::MissingFile)
    }

    /// Run a single upload through type check, size check and storage
    pub async fn accept<S>(&self, request: UploadRequest<S>) -> UploadResult<UploadResponse>
    where
        S: Stream<Item = UploadResult<Bytes>>,
    {
        let mut tracker = UploadTracker::new(&request.original_name);

        match self.run(request, &mut tracker).await {
            Ok(response) => {
                tracker.advance(UploadStage::Completed);
                info!(
                    "Stored upload {} as {} ({}, {})",
                    response.original_name,
                    response.filename,
                    format_bytes(response.size),
                    response.content_type
                );
                Ok(response)
            }
            Err(e) => {
                tracker.reject(&e);
                Err(e)
            }
        }
    }

    async fn run<S>(
        &self,
        request: UploadRequest<S>,
        tracker: &mut UploadTracker,
    ) -> UploadResult<UploadResponse>
    where
        S: Stream<Item = UploadResult<Bytes>>,
    {
        let mime_type = normalize_mime_type(request.content_type.as_deref());
        if !is_allowed_file_type(&mime_type, &self.config.allowed_types) {
            return Err(UploadError::unsupported_media_type(
                mime_type,
                self.config.allowed_types.clone(),
            ));
        }
        tracker.advance(UploadStage::TypeChecked);

        let mut staged = self.resolver.stage().await?;

        let body = request.body;
        futures::pin_mut!(body);
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;

            if staged.size() + chunk.len() as u64 > self.config.max_bytes {
                return Err(UploadError::payload_too_large(self.config.max_bytes));
            }

            staged.write_chunk(&chunk).await?;
        }
        tracker.advance(UploadStage::SizeChecked);

        let stored = self
            .resolver
            .commit(staged, &request.original_name, &mime_type)
            .await?;
        tracker.advance(UploadStage::Stored);

        Ok(UploadResponse::new(&stored, &request.original_name))
    }
}

/// Translate a multipart parsing failure into the upload taxonomy
fn map_multipart_error(err: MultipartError, max_bytes: u64) -> UploadError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        UploadError::payload_too_large(max_bytes)
    } else {
        UploadError::malformed(err.body_text())
    }
}

/// Logs stage transitions for one upload
struct UploadTracker {
    id: Uuid,
    original_name: String,
    stage: UploadStage,
    started: Instant,
}

impl UploadTracker {
    fn new(original_name: &str) -> Self {
        let tracker = Self {
            id: Uuid::new_v4(),
            original_name: original_name.to_string(),
            stage: UploadStage::Received,
            started: Instant::now(),
        };
        debug!(
            upload_id = %tracker.id,
            "Received upload {}", tracker.original_name
        );
        tracker
    }

    fn advance(&mut self, next: UploadStage) {
        debug!(
            upload_id = %self.id,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Upload {} -> {}", self.stage, next
        );
        self.stage = next;
    }

    fn reject(&mut self, error: &UploadError) {
        let rejected = UploadStage::Rejected(error.error_code());

        if error.is_client_error() {
            warn!(
                upload_id = %self.id,
                "Rejected upload {} after {}: {}", self.original_name, self.stage, error
            );
        } else {
            error!(
                upload_id = %self.id,
                "Upload {} failed after {}: {}", self.original_name, self.stage, error
            );
        }

        self.stage = rejected;
    }
}

impl Drop for UploadTracker {
    fn drop(&mut self) {
        if !self.stage.is_terminal() {
            warn!(
                upload_id = %self.id,
                "Upload {} abandoned at {}", self.original_name, self.stage
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_types::StorageConfig;
    use axum::{body::Body, extract::FromRequest, http::Request};
    use futures::stream;
    use pretty_assertions::assert_eq;
    use std::{path::Path, time::Duration};
    use tempfile::{tempdir, TempDir};

    fn pipeline_in(dir: &TempDir, max_bytes: u64) -> UploadPipeline {
        let resolver = StorageResolver::new(&StorageConfig {
            directory: dir.path().join("uploads").to_string_lossy().into_owned(),
            ..StorageConfig::default()
        })
        .unwrap();

        UploadPipeline::new(
            UploadConfig {
                max_bytes,
                ..UploadConfig::default()
            },
            Arc::new(resolver),
        )
    }

    fn chunks(parts: &[&[u8]]) -> impl Stream<Item = UploadResult<Bytes>> {
        let items: Vec<UploadResult<Bytes>> = parts
            .iter()
            .map(|part| Ok(Bytes::copy_from_slice(part)))
            .collect();
        stream::iter(items)
    }

    fn stored_entries(root: &Path) -> Vec<String> {
        if !root.exists() {
            return Vec::new();
        }
        let mut names: Vec<String> = std::fs::read_dir(root)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    async fn multipart_from(body: String) -> Multipart {
        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .header("content-type", "multipart/form-data; boundary=X-BOUNDARY")
            .body(Body::from(body))
            .unwrap();

        Multipart::from_request(request, &()).await.unwrap()
    }

    #[tokio::test]
    async fn test_accepts_allowed_upload() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline_in(&dir, 1024);

        let response = pipeline
            .accept(UploadRequest::new(
                "scan.pdf",
                Some("application/pdf".to_string()),
                chunks(&[b"%PDF-1.7", b" body"]),
            ))
            .await
            .unwrap();

        assert_eq!(response.filename, "scan.pdf");
        assert_eq!(response.size, 13);
        assert_eq!(response.message, "File uploaded successfully: scan.pdf");
        assert_eq!(
            stored_entries(&dir.path().join("uploads")),
            vec!["scan.pdf"]
        );
    }

    #[tokio::test]
    async fn test_disallowed_type_stores_nothing() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline_in(&dir, 1024);

        let result = pipeline
            .accept(UploadRequest::new(
                "notes.txt",
                Some("text/plain".to_string()),
                chunks(&[b"hello"]),
            ))
            .await;

        assert!(matches!(
            result,
            Err(UploadError::UnsupportedMediaType { ref mime_type, .. }) if mime_type == "text/plain"
        ));
        assert!(stored_entries(&dir.path().join("uploads")).is_empty());
    }

    #[tokio::test]
    async fn test_configured_types_are_case_insensitive() {
        let dir = tempdir().unwrap();
        let resolver = StorageResolver::new(&StorageConfig {
            directory: dir.path().join("uploads").to_string_lossy().into_owned(),
            ..StorageConfig::default()
        })
        .unwrap();
        let pipeline = UploadPipeline::new(
            UploadConfig {
                allowed_types: vec!["IMAGE/JPEG".to_string(), " Application/PDF ".to_string()],
                ..UploadConfig::default()
            },
            Arc::new(resolver),
        );

        let response = pipeline
            .accept(UploadRequest::new(
                "photo.jpg",
                Some("image/jpeg".to_string()),
                chunks(&[b"jpeg"]),
            ))
            .await
            .unwrap();

        assert_eq!(response.content_type, "image/jpeg");
        assert_eq!(
            pipeline.config().allowed_types,
            vec!["image/jpeg", "application/pdf"]
        );
    }

    #[tokio::test]
    async fn test_missing_content_type_is_unsupported() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline_in(&dir, 1024);

        let result = pipeline
            .accept(UploadRequest::new("photo.jpg", None, chunks(&[b"jpeg"])))
            .await;

        assert!(matches!(
            result,
            Err(UploadError::UnsupportedMediaType { .. })
        ));
    }

    #[tokio::test]
    async fn test_over_limit_body_leaves_no_file() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline_in(&dir, 10);

        let result = pipeline
            .accept(UploadRequest::new(
                "big.png",
                Some("image/png".to_string()),
                chunks(&[b"123456", b"78901"]),
            ))
            .await;

        assert!(matches!(
            result,
            Err(UploadError::PayloadTooLarge { max_bytes: 10 })
        ));
        assert!(stored_entries(&dir.path().join("uploads")).is_empty());
    }

    #[tokio::test]
    async fn test_body_of_exactly_max_bytes_is_accepted() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline_in(&dir, 10);

        let response = pipeline
            .accept(UploadRequest::new(
                "edge.png",
                Some("image/png".to_string()),
                chunks(&[b"12345", b"67890"]),
            ))
            .await
            .unwrap();

        assert_eq!(response.size, 10);
    }

    #[tokio::test]
    async fn test_stream_failure_cleans_up() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline_in(&dir, 1024);

        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"first half")),
            Err(UploadError::malformed("connection reset")),
        ]);

        let result = pipeline
            .accept(UploadRequest::new(
                "photo.png",
                Some("image/png".to_string()),
                body,
            ))
            .await;

        assert!(matches!(result, Err(UploadError::MalformedRequest { .. })));
        assert!(stored_entries(&dir.path().join("uploads")).is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_upload_cleans_up() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline_in(&dir, 1024);

        // A client that sends one chunk and then goes silent
        let body = stream::iter(vec![Ok::<_, UploadError>(Bytes::from_static(b"partial"))])
            .chain(stream::pending());

        let outcome = tokio::time::timeout(
            Duration::from_millis(100),
            pipeline.accept(UploadRequest::new(
                "photo.png",
                Some("image/png".to_string()),
                body,
            )),
        )
        .await;

        assert!(outcome.is_err());
        assert!(stored_entries(&dir.path().join("uploads")).is_empty());
    }

    #[tokio::test]
    async fn test_multipart_without_file_part() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline_in(&dir, 1024);

        let multipart = multipart_from("--X-BOUNDARY--\r\n".to_string()).await;
        let result = pipeline.process_multipart(multipart).await;

        assert!(matches!(result, Err(UploadError::MissingFile)));
    }

    #[tokio::test]
    async fn test_multipart_skips_other_fields() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline_in(&dir, 1024);

        let body = concat!(
            "--X-BOUNDARY\r\n",
            "Content-Disposition: form-data; name=\"description\"\r\n\r\n",
            "holiday\r\n",
            "--X-BOUNDARY\r\n",
            "Content-Disposition: form-data; name=\"file\"; filename=\"beach.png\"\r\n",
            "Content-Type: image/png\r\n\r\n",
            "PNGDATA\r\n",
            "--X-BOUNDARY--\r\n"
        );

        let multipart = multipart_from(body.to_string()).await;
        let response = pipeline.process_multipart(multipart).await.unwrap();

        assert_eq!(response.filename, "beach.png");
        assert_eq!(response.size, 7);
    }

    #[tokio::test]
    async fn test_multipart_with_only_text_fields() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline_in(&dir, 1024);

        let body = concat!(
            "--X-BOUNDARY\r\n",
            "Content-Disposition: form-data; name=\"file\"\r\n\r\n",
            "just text\r\n",
            "--X-BOUNDARY--\r\n"
        );

        let multipart = multipart_from(body.to_string()).await;
        let result = pipeline.process_multipart(multipart).await;

        assert!(matches!(result, Err(UploadError::MissingFile)));
        assert!(stored_entries(&dir.path().join("uploads")).is_empty());
    }
}
