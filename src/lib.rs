//! # edgequake-form2sheet
//!
//! Extract structured contact fields from scanned paper forms into a table,
//! using a custom-trained cloud document-analysis model.
//!
//! ## Pipeline Overview
//!
//! ```text
//! images
//!  │
//!  ├─ 1. Input      local files, directories or URLs, in upload order
//!  ├─ 2. Preprocess grayscale + Gaussian adaptive threshold (spawn_blocking)
//!  ├─ 3. Analyze    submit to the custom model, poll until done, flatten fields
//!  ├─ 4. Normalize  synonym table → Nome / Data / Fone / Cel / Address
//!  └─ 5. Export     one row per image (CSV / JSON), merge of previous tables
//! ```
//!
//! A failing image becomes an error row; the batch carries on. Only an
//! unconfigured service client stops a batch, and it does so before the
//! first image is touched.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_form2sheet::{extract, ExtractionConfig, ResultTable, ServiceCredentials};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Endpoint and key from AZURE_FORM_RECOGNIZER_ENDPOINT / AZURE_FORM_RECOGNIZER_KEY
//!     let credentials = ServiceCredentials::from_env();
//!     let config = ExtractionConfig::builder().model_id("fichas-v1").build()?;
//!
//!     let output = extract(&["scans/".to_string()], &credentials, &config).await?;
//!     let table = ResultTable::from_results(&output.results);
//!     print!("{}", table.to_csv_string()?);
//!     eprintln!("{}/{} images ok", output.stats.processed_images, output.stats.total_images);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `form2sheet` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-form2sheet = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod client;
pub mod config;
pub mod error;
pub mod export;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use client::{AzureDocumentClient, ClientCache};
pub use config::{CancellationFlag, ExtractionConfig, ExtractionConfigBuilder, ServiceCredentials};
pub use error::{Form2SheetError, ImageError};
pub use export::ResultTable;
pub use extract::{
    extract, extract_batch, extract_image, extract_sync, extract_to_file, extract_with_cache,
};
pub use output::{
    BatchOutput, BatchStats, Column, FixedRecord, ImageResult, RawFieldMap, NOT_AVAILABLE,
};
pub use pipeline::analyze::{
    AnalyzedDocument, DocumentAnalysisService, DocumentField, ServiceFault,
};
pub use pipeline::input::ImageInput;
pub use pipeline::normalize::normalize;
pub use pipeline::phone::format_phone;
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use stream::{extract_stream, stream_images, ImageStream};
