//! Output file lookup for downloads.
//!
//! Walks the output tree looking for an exact file-name match. Only bare
//! names are accepted, so callers can never address a path.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// True when `name` is a single path component that could name a file.
pub fn is_bare_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

/// Find the file called `name` anywhere under `root`.
///
/// Several jobs can produce the same name; the most recently modified one
/// wins. A missing root yields `Ok(None)`. Symlinks are not followed.
pub fn find_output_file(root: &Path, name: &str) -> io::Result<Option<PathBuf>> {
    if !is_bare_file_name(name) {
        return Ok(None);
    }
    let mut best = None;
    match walk(root, name, &mut best) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    }
    Ok(best.map(|(_, path)| path))
}

fn walk(dir: &Path, name: &str, best: &mut Option<(SystemTime, PathBuf)>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();
        if file_type.is_dir() {
            if let Err(e) = walk(&path, name, best) {
                tracing::debug!(path = %path.display(), error = %e, "skipping unreadable dir");
            }
            continue;
        }
        if !file_type.is_file() || entry.file_name() != name {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|meta| meta.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let newer = best.as_ref().is_none_or(|(current, _)| modified > *current);
        if newer {
            *best = Some((modified, path));
        }
    }
    Ok(())
}
