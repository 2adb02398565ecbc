use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, Context, Result};

const STAGING_MARKER: &str = ".staging-";

static STAGING_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Replaces `path` with `content` in one rename, so a reader sees either the
/// previous file or the new one.
///
/// The content is staged next to the destination and flushed to disk before
/// the rename. Missing parent directories are created.
pub fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("'{}' does not name a file", path.display()))?;
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create state directory {}", dir.display()))?;

    let staging = staging_path(dir, file_name);
    let staged = stage(&staging, content).and_then(|()| {
        fs::rename(&staging, path).with_context(|| {
            format!("failed to move {} into place", staging.display())
        })
    });
    if staged.is_err() {
        let _ = fs::remove_file(&staging);
    }
    staged
}

/// Reads a text file, returning `None` when it does not exist yet.
pub fn read_text_if_exists(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error).with_context(|| format!("failed to read {}", path.display())),
    }
}

/// Deletes staging files a crashed writer left next to `path`. Returns how many
/// were removed.
pub fn remove_stale_staging_files(path: &Path) -> Result<usize> {
    let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
        return Ok(0);
    };
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(error) => {
            return Err(error).with_context(|| format!("failed to list {}", dir.display()))
        }
    };
    let prefix = format!(".{file_name}{STAGING_MARKER}");
    let mut removed = 0;
    for entry in entries.flatten() {
        let is_staging = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(&prefix));
        if is_staging && fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

fn staging_path(dir: &Path, file_name: &str) -> PathBuf {
    let sequence = STAGING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    dir.join(format!(
        ".{file_name}{STAGING_MARKER}{}-{sequence}",
        std::process::id()
    ))
}

fn stage(staging: &Path, content: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(staging)
        .with_context(|| format!("failed to create {}", staging.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("failed to write {}", staging.display()))?;
    file.sync_all()
        .with_context(|| format!("failed to flush {}", staging.display()))
}
