//! Input resolution: turn user-supplied paths and URLs into image inputs.
//!
//! Each argument is either a local file, a directory (its `.png`, `.jpg` and
//! `.jpeg` files, sorted by name, non-recursive) or an HTTP/HTTPS URL.
//! Argument order is upload order. File contents are not validated here: an
//! undecodable file becomes a per-image error later instead of failing the
//! whole batch.

use crate::error::Form2SheetError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Extensions picked up when an argument is a directory.
pub const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// One image to process: the name shown in the `Arquivo` column and its raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl ImageInput {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// True when the path has one of [`IMAGE_EXTENSIONS`] (case-insensitive).
pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Resolve every argument, preserving order.
pub async fn resolve_inputs(
    inputs: &[String],
    timeout_secs: u64,
) -> Result<Vec<ImageInput>, Form2SheetError> {
    let mut images = Vec::new();
    for input in inputs {
        if is_url(input) {
            images.push(download_url(input, timeout_secs).await?);
        } else {
            images.extend(resolve_local(Path::new(input)).await?);
        }
    }
    if images.is_empty() {
        return Err(Form2SheetError::NoImages);
    }
    info!("Resolved {} images", images.len());
    Ok(images)
}

async fn resolve_local(path: &Path) -> Result<Vec<ImageInput>, Form2SheetError> {
    if !path.exists() {
        return Err(Form2SheetError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    if path.is_dir() {
        let mut entries = tokio::fs::read_dir(path)
            .await
            .map_err(|e| map_io_error(path, e))?;
        let mut files: Vec<PathBuf> = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| map_io_error(path, e))?
        {
            let p = entry.path();
            if p.is_file() && has_image_extension(&p) {
                files.push(p);
            }
        }
        files.sort();
        debug!("{}: {} images in directory", path.display(), files.len());

        let mut images = Vec::with_capacity(files.len());
        for file in files {
            images.push(read_file(&file).await?);
        }
        return Ok(images);
    }

    Ok(vec![read_file(path).await?])
}

async fn read_file(path: &Path) -> Result<ImageInput, Form2SheetError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| map_io_error(path, e))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    debug!("Read {} ({} bytes)", path.display(), bytes.len());
    Ok(ImageInput { file_name, bytes })
}

fn map_io_error(path: &Path, e: std::io::Error) -> Form2SheetError {
    match e.kind() {
        std::io::ErrorKind::PermissionDenied => Form2SheetError::PermissionDenied {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::NotFound => Form2SheetError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => Form2SheetError::Internal(format!("reading '{}': {}", path.display(), e)),
    }
}

/// Download a URL into memory.
async fn download_url(url: &str, timeout_secs: u64) -> Result<ImageInput, Form2SheetError> {
    info!("Downloading image from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Form2SheetError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            Form2SheetError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            Form2SheetError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(Form2SheetError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| Form2SheetError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    Ok(ImageInput {
        file_name: filename_from_url(url),
        bytes: bytes.to_vec(),
    })
}

/// Last path segment of the URL, or a generic name.
pub fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.png".to_string()
}
