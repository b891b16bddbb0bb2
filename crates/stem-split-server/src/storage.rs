//! Upload and output directory layout.
//!
//! Every separation job gets its own `<upload_root>/<job_id>/` and
//! `<output_root>/<job_id>/` directories, so uploads sharing a file name
//! never touch each other's files.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::relay::FIELD_DELIMITER;

/// Root directories shared by all jobs.
#[derive(Clone, Debug)]
pub struct Storage {
    upload_root: PathBuf,
    output_root: PathBuf,
}

/// Paths owned by one separation job.
#[derive(Clone, Debug)]
pub struct SeparationJob {
    /// Generated job id.
    pub id: Uuid,
    /// Uploaded file name with the extension stripped.
    pub track_name: String,
    /// Where the raw upload is written.
    pub upload_path: PathBuf,
    /// Output root handed to the separator for this job.
    pub output_root: PathBuf,
    /// Directory the separator writes this track's stems into.
    pub track_dir: PathBuf,
}

impl Storage {
    /// Create the upload and output roots if they do not exist yet.
    pub fn bootstrap(upload_root: &Path, output_root: &Path) -> Result<Self> {
        std::fs::create_dir_all(upload_root)
            .with_context(|| format!("create upload dir {:?}", upload_root))?;
        std::fs::create_dir_all(output_root)
            .with_context(|| format!("create output dir {:?}", output_root))?;
        Ok(Self {
            upload_root: upload_root.to_path_buf(),
            output_root: output_root.to_path_buf(),
        })
    }

    pub fn upload_root(&self) -> &Path {
        &self.upload_root
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Allocate directories for a new job.
    ///
    /// `file_name` must already be sanitized with [`sanitize_file_name`].
    /// `model_dir` is the directory the separator creates under its output
    /// root.
    pub async fn prepare_job(&self, file_name: &str, model_dir: &str) -> io::Result<SeparationJob> {
        let id = Uuid::new_v4();
        let track_name = track_name(file_name);

        let upload_dir = self.upload_root.join(id.to_string());
        tokio::fs::create_dir_all(&upload_dir).await?;

        let output_root = self.output_root.join(id.to_string());
        let track_dir = output_root.join(model_dir).join(&track_name);
        tokio::fs::create_dir_all(&output_root).await?;

        Ok(SeparationJob {
            id,
            track_name,
            upload_path: upload_dir.join(file_name),
            output_root,
            track_dir,
        })
    }
}

impl SeparationJob {
    /// Guard that deletes this job's directories when dropped.
    ///
    /// Held while the upload is being written; a failed or aborted upload
    /// leaves nothing behind. Call [`JobCleanup::disarm`] once the job is
    /// handed to the separator.
    pub fn cleanup_guard(&self) -> JobCleanup {
        let mut dirs = Vec::with_capacity(2);
        if let Some(upload_dir) = self.upload_path.parent() {
            dirs.push(upload_dir.to_path_buf());
        }
        dirs.push(self.output_root.clone());
        JobCleanup {
            job_id: self.id,
            dirs,
            armed: true,
        }
    }
}

/// Removes a job's directories on drop unless disarmed.
#[derive(Debug)]
pub struct JobCleanup {
    job_id: Uuid,
    dirs: Vec<PathBuf>,
    armed: bool,
}

impl JobCleanup {
    /// Keep the job's directories.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for JobCleanup {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        for dir in &self.dirs {
            match std::fs::remove_dir_all(dir) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(job_id = %self.job_id, path = %dir.display(), error = %e, "failed to remove job dir");
                }
            }
        }
        tracing::debug!(job_id = %self.job_id, "discarded incomplete job");
    }
}

/// Reduce a client-supplied file name to a safe final path component.
///
/// Both `/` and `\` count as separators. The event delimiter `|` and
/// control characters become `_`, so the name can travel inside a `DONE`
/// event. Returns `None` for names that end up empty, `.` or `..`.
pub fn sanitize_file_name(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or(raw).trim();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    let name = name
        .chars()
        .map(|c| if c == FIELD_DELIMITER || c.is_control() { '_' } else { c })
        .collect();
    Some(name)
}

/// Track name for a file: its name without the final extension.
pub fn track_name(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string())
}
