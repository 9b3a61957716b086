//! Input resolution: normalise a user-supplied path or URL to a local file.
//!
//! The engine reads documents from the file system, so URL inputs are
//! downloaded into a `TempDir` first. The directory lives as long as the
//! [`ResolvedInput`] and is removed on drop.

use crate::error::TaskError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

static RE_DISPOSITION_FILENAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)filename\*?=(?:UTF-8'')?"?([^";]+)"?"#).unwrap()
});

/// The resolved input: either a local path or a downloaded temp file.
#[derive(Debug)]
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL; the document lives in a temp directory kept alive here.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a readable local file.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, TaskError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        let path = PathBuf::from(input);
        validate_local(&path)?;
        debug!("Resolved local input: {}", path.display());
        Ok(ResolvedInput::Local(path))
    }
}

/// Check that `path` names a readable regular file.
///
/// Runs synchronously so a bad path is rejected before it is ever queued.
pub fn validate_local(path: &Path) -> Result<(), TaskError> {
    let meta = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TaskError::InputNotFound {
                path: path.to_path_buf(),
            })
        }
        Err(e) => {
            return Err(TaskError::InputUnreadable {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })
        }
    };

    if !meta.is_file() {
        return Err(TaskError::InputUnreadable {
            path: path.to_path_buf(),
            detail: "not a regular file".into(),
        });
    }

    std::fs::File::open(path).map_err(|e| TaskError::InputUnreadable {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    Ok(())
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, TaskError> {
    info!("Downloading document from: {}", url);

    let failed = |reason: String| TaskError::InputDownload {
        url: url.to_string(),
        detail: reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            failed(format!("timed out after {timeout_secs}s"))
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let disposition = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let filename = extract_filename(url, disposition.as_deref());

    let temp_dir = TempDir::new().map_err(|e| failed(format!("temp dir: {e}")))?;
    let file_path = temp_dir.path().join(&filename);

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    if bytes.is_empty() {
        return Err(failed("empty response body".into()));
    }

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| failed(format!("write temp file: {e}")))?;

    info!("Downloaded {} bytes to: {}", bytes.len(), file_path.display());

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Pick a file name from Content-Disposition, then the URL path.
fn extract_filename(url: &str, disposition: Option<&str>) -> String {
    if let Some(name) = disposition
        .and_then(|d| RE_DISPOSITION_FILENAME.captures(d))
        .map(|c| sanitize(&c[1]))
        .filter(|n| !n.is_empty())
    {
        return name;
    }

    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return sanitize(last);
                }
            }
        }
    }

    "downloaded.bin".to_string()
}

// Keep only the final path component of a server-supplied name.
fn sanitize(name: &str) -> String {
    name.rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}
