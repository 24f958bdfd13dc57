//! Error types for the edgequake-form2sheet library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Form2SheetError`]: **Fatal**, the batch cannot proceed at all
//!   (service client not configured, no readable inputs, output not
//!   writable). Returned as `Err(Form2SheetError)` from the top-level
//!   `extract*` functions.
//!
//! * [`ImageError`]: **Non-fatal**, a single image failed (undecodable
//!   bytes, unknown model, transient service fault) but the rest of the batch
//!   is fine. Stored inside [`crate::output::ImageResult`] so one bad scan
//!   never loses the rows already extracted.
//!
//! A configuration fault is deliberately *not* an [`ImageError`]: the
//! operator has to fix the endpoint or key, not the individual scans.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-form2sheet library.
///
/// Image-level failures use [`ImageError`] and are stored in
/// [`crate::output::ImageResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum Form2SheetError {
    // ── Service client errors ─────────────────────────────────────────────
    /// The document-analysis client could not be constructed (missing
    /// endpoint or key, malformed endpoint, TLS backend failure).
    #[error(
        "Document analysis client is unavailable: {reason}\n\
Set AZURE_FORM_RECOGNIZER_ENDPOINT and AZURE_FORM_RECOGNIZER_KEY, or pass --endpoint / --key."
    )]
    ClientUnavailable { reason: String },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Image file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The batch contained no images to process.
    #[error("No images to process (supported formats: png, jpg, jpeg)")]
    NoImages,

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write the output table.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A CSV table could not be read or written.
    #[error("CSV error in '{path}': {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single image.
///
/// The display string is what lands in the `Status` column of the exported
/// table, so every variant names the offending file.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum ImageError {
    /// The bytes could not be decoded as a raster image.
    #[error("'{file_name}': could not decode image: {detail}")]
    Decode { file_name: String, detail: String },

    /// The model id does not exist or is not ready on the service.
    #[error("'{file_name}': model id '{model_id}' was not found. Check the id in Document Intelligence Studio.")]
    ModelNotFound { file_name: String, model_id: String },

    /// Any other service failure (network, throttling, auth, bad payload).
    #[error("'{file_name}': error while analysing the document: {detail}")]
    Service { file_name: String, detail: String },
}

impl ImageError {
    /// Name of the image this error belongs to.
    pub fn file_name(&self) -> &str {
        match self {
            ImageError::Decode { file_name, .. }
            | ImageError::ModelNotFound { file_name, .. }
            | ImageError::Service { file_name, .. } => file_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_unavailable_display() {
        let e = Form2SheetError::ClientUnavailable {
            reason: "endpoint is not set".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("endpoint is not set"), "got: {msg}");
        assert!(msg.contains("AZURE_FORM_RECOGNIZER_KEY"));
    }

    #[test]
    fn model_not_found_mentions_file_and_model() {
        let e = ImageError::ModelNotFound {
            file_name: "ficha_01.jpg".into(),
            model_id: "fichas-v3".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("ficha_01.jpg"));
        assert!(msg.contains("fichas-v3"));
    }

    #[test]
    fn service_error_carries_cause() {
        let e = ImageError::Service {
            file_name: "scan.png".into(),
            detail: "HTTP 429 Too Many Requests".into(),
        };
        assert!(e.to_string().contains("429"));
        assert_eq!(e.file_name(), "scan.png");
    }

    #[test]
    fn decode_error_names_file() {
        let e = ImageError::Decode {
            file_name: "broken.png".into(),
            detail: "unexpected EOF".into(),
        };
        assert!(e.to_string().starts_with("'broken.png'"));
    }
}
