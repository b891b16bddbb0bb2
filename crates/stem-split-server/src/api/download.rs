//! Stem download handler.

use actix_files::NamedFile;
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{HttpRequest, HttpResponse, Responder, get, web};

use crate::gateway::{find_output_file, is_bare_file_name};
use crate::state::AppState;

#[derive(Debug)]
pub(crate) enum DownloadError {
    NotFound(String),
    Lookup(String),
}

impl DownloadError {
    pub(crate) fn into_response(self) -> HttpResponse {
        match self {
            DownloadError::NotFound(name) => {
                tracing::debug!(file = %name, "download miss");
                HttpResponse::NotFound().body("File not found")
            }
            DownloadError::Lookup(reason) => {
                tracing::warn!(reason = %reason, "download lookup failed");
                HttpResponse::InternalServerError().body("download lookup failed")
            }
        }
    }
}

#[utoipa::path(
    get,
    path = "/download/{filename}",
    params(
        ("filename" = String, Path, description = "Bare stem file name, e.g. song_vocals.wav")
    ),
    responses(
        (status = 200, description = "Stem file as an attachment"),
        (status = 404, description = "No output file with that name")
    )
)]
#[get("/download/{filename}")]
/// Download a produced stem by file name.
pub async fn download_stem(
    state: web::Data<AppState>,
    req: HttpRequest,
    filename: web::Path<String>,
) -> impl Responder {
    let name = filename.into_inner();
    let path = match locate(&state, &name).await {
        Ok(path) => path,
        Err(err) => return err.into_response(),
    };
    match NamedFile::open_async(&path).await {
        Ok(file) => file
            .set_content_disposition(ContentDisposition {
                disposition: DispositionType::Attachment,
                parameters: vec![DispositionParam::Filename(name)],
            })
            .into_response(&req),
        Err(e) => {
            DownloadError::Lookup(format!("open {}: {e}", path.display())).into_response()
        }
    }
}

async fn locate(state: &AppState, name: &str) -> Result<std::path::PathBuf, DownloadError> {
    if !is_bare_file_name(name) {
        return Err(DownloadError::NotFound(name.to_string()));
    }
    let root = state.storage.output_root().to_path_buf();
    let target = name.to_string();
    let found = web::block(move || find_output_file(&root, &target))
        .await
        .map_err(|e| DownloadError::Lookup(e.to_string()))?
        .map_err(|e| DownloadError::Lookup(e.to_string()))?;
    found.ok_or_else(|| DownloadError::NotFound(name.to_string()))
}
