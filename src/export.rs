use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::info;

/// Writes an exported summary into `dir` and returns the path. Files are
/// date-stamped; when today's name is already taken, a numeric suffix is
/// added instead of overwriting the earlier export.
pub fn save_summary(dir: &Path, payload: &[u8]) -> std::io::Result<PathBuf> {
    let stem = Local::now().format("docq-summary-%Y-%m-%d").to_string();
    let mut path = dir.join(format!("{}.pdf", stem));
    let mut attempt = 1;
    while path.exists() {
        path = dir.join(format!("{}-{}.pdf", stem, attempt));
        attempt += 1;
    }

    std::fs::write(&path, payload)?;
    info!("wrote summary to {}", path.display());
    Ok(path)
}
