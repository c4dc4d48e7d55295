//! Small helpers for logging and the filesystem.

use crate::error::StoreError;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument, warn};

/// Truncate a string for logging purposes.
///
/// Long strings are cut to at most `max` bytes (on a char boundary) with an
/// ellipsis and the number of dropped bytes appended.
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…(+{} bytes)", &s[..end], s.len() - end)
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then creates and removes a probe file so
/// that permission problems surface before any network call is made.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    fs::create_dir_all(path).await.map_err(io_err)?;
    let probe_path = path.join("..__probe_write__");
    fs::write(&probe_path, b"").await.map_err(io_err)?;
    if let Err(e) = fs::remove_file(&probe_path).await {
        warn!(path = %probe_path.display(), error = %e, "Failed to remove write probe");
    }
    info!("Output directory is writable");
    Ok(())
}
