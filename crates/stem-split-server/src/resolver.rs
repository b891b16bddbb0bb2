//! Renames separator output to track-specific stem names.

use std::io;
use std::path::Path;

use anyhow::{Context, Result};

use crate::runner::TWO_STEMS;

/// Name Demucs gives the isolated stem in two-stem mode.
pub const VOCALS_SOURCE: &str = "vocals.wav";
/// Name Demucs gives the complement stem in two-stem mode.
pub const INSTRUMENTAL_SOURCE: &str = "no_vocals.wav";

/// Final stem file names reported to the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StemFiles {
    pub vocals: String,
    pub instrumental: String,
}

impl StemFiles {
    pub fn for_track(track_name: &str) -> Self {
        Self {
            vocals: format!("{track_name}_{TWO_STEMS}.wav"),
            instrumental: format!("{track_name}_instrumental.wav"),
        }
    }
}

/// Rename the stems in `track_dir` to names embedding `track_name`.
///
/// A missing source file is skipped with a warning and the returned names
/// still include it. Any other rename failure is an error.
pub async fn resolve_outputs(track_dir: &Path, track_name: &str) -> Result<StemFiles> {
    let stems = StemFiles::for_track(track_name);
    rename_if_present(&track_dir.join(VOCALS_SOURCE), &track_dir.join(&stems.vocals)).await?;
    rename_if_present(
        &track_dir.join(INSTRUMENTAL_SOURCE),
        &track_dir.join(&stems.instrumental),
    )
    .await?;
    Ok(stems)
}

async fn rename_if_present(from: &Path, to: &Path) -> Result<bool> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::warn!(path = %from.display(), "separator output missing; rename skipped");
            Ok(false)
        }
        Err(e) => Err(e).with_context(|| format!("rename {:?} -> {:?}", from, to)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn track_dir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "stem-split-resolver-{label}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[tokio::test]
    async fn renames_both_stems() {
        let dir = track_dir("both");
        std::fs::write(dir.join(VOCALS_SOURCE), b"v").unwrap();
        std::fs::write(dir.join(INSTRUMENTAL_SOURCE), b"i").unwrap();

        let stems = resolve_outputs(&dir, "song").await.unwrap();

        assert_eq!(stems.vocals, "song_vocals.wav");
        assert_eq!(stems.instrumental, "song_instrumental.wav");
        assert_eq!(std::fs::read(dir.join("song_vocals.wav")).unwrap(), b"v");
        assert_eq!(std::fs::read(dir.join("song_instrumental.wav")).unwrap(), b"i");
        assert!(!dir.join(VOCALS_SOURCE).exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn missing_stem_is_skipped_but_still_named() {
        let dir = track_dir("missing");
        std::fs::write(dir.join(VOCALS_SOURCE), b"v").unwrap();

        let stems = resolve_outputs(&dir, "song").await.unwrap();

        assert_eq!(stems, StemFiles::for_track("song"));
        assert!(dir.join("song_vocals.wav").exists());
        assert!(!dir.join("song_instrumental.wav").exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn missing_track_dir_is_not_an_error() {
        let dir = std::env::temp_dir().join("stem-split-resolver-never-created");
        let stems = resolve_outputs(&dir, "ghost").await.unwrap();
        assert_eq!(stems.vocals, "ghost_vocals.wav");
    }
}
