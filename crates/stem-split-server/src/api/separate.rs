//! Upload + separation handler.

use std::io;
use std::path::Path;

use actix_multipart::{Field, Multipart, MultipartError};
use actix_web::{HttpResponse, Responder, post, web};
use futures_util::TryStreamExt;
use tokio::io::AsyncWriteExt;
use utoipa::ToSchema;

use crate::relay;
use crate::state::AppState;
use crate::storage::{SeparationJob, sanitize_file_name};

use super::streams::relay_response;

/// Multipart field carrying the audio file.
pub const UPLOAD_FIELD: &str = "file";

/// Multipart form accepted by `/separate`.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct SeparateUpload {
    /// Audio file to separate.
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

/// Errors raised before the event stream starts.
#[derive(Debug)]
pub(crate) enum UploadError {
    MissingFile,
    Malformed(MultipartError),
    Storage(io::Error),
}

impl UploadError {
    pub(crate) fn into_response(self) -> HttpResponse {
        match self {
            UploadError::MissingFile => HttpResponse::BadRequest().body("No file uploaded."),
            UploadError::Malformed(err) => {
                HttpResponse::BadRequest().body(format!("malformed upload: {err}"))
            }
            UploadError::Storage(err) => {
                tracing::error!(error = %err, "failed to store upload");
                HttpResponse::InternalServerError().body("failed to store upload")
            }
        }
    }
}

#[utoipa::path(
    post,
    path = "/separate",
    request_body(content = SeparateUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Progress event stream (`data: <0-99>`, then `data: DONE|<vocals>|<instrumental>` or `data: ERROR`)", content_type = "text/event-stream"),
        (status = 400, description = "No file uploaded"),
        (status = 500, description = "Upload could not be stored")
    )
)]
#[post("/separate")]
/// Store the uploaded track, start the separator and stream its progress.
pub async fn separate_track(state: web::Data<AppState>, payload: Multipart) -> impl Responder {
    let job = match receive_upload(&state, payload).await {
        Ok(job) => job,
        Err(err) => return err.into_response(),
    };
    tracing::info!(
        job_id = %job.id,
        track = %job.track_name,
        upload = %job.upload_path.display(),
        "separation job accepted"
    );
    let events = relay::start(job, state.separator.clone());
    relay_response(events)
}

/// Save the first `file` field with a usable file name.
async fn receive_upload(
    state: &AppState,
    mut payload: Multipart,
) -> Result<SeparationJob, UploadError> {
    while let Some(mut field) = payload.try_next().await.map_err(UploadError::Malformed)? {
        let file_name = if field.name() == Some(UPLOAD_FIELD) {
            field
                .content_disposition()
                .and_then(|cd| cd.get_filename())
                .and_then(sanitize_file_name)
        } else {
            None
        };
        let Some(file_name) = file_name else {
            drain_field(&mut field).await?;
            continue;
        };

        let job = state
            .storage
            .prepare_job(&file_name, state.separator.model_dir())
            .await
            .map_err(UploadError::Storage)?;
        let cleanup = job.cleanup_guard();
        let bytes = write_field(&mut field, &job.upload_path).await?;
        cleanup.disarm();
        tracing::debug!(job_id = %job.id, bytes, "upload stored");
        return Ok(job);
    }
    Err(UploadError::MissingFile)
}

async fn write_field(field: &mut Field, path: &Path) -> Result<u64, UploadError> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(UploadError::Storage)?;
    let mut written = 0u64;
    while let Some(chunk) = field.try_next().await.map_err(UploadError::Malformed)? {
        file.write_all(&chunk).await.map_err(UploadError::Storage)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(UploadError::Storage)?;
    Ok(written)
}

async fn drain_field(field: &mut Field) -> Result<(), UploadError> {
    while field.try_next().await.map_err(UploadError::Malformed)?.is_some() {}
    Ok(())
}
