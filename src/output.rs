//! Data types flowing between pipeline stages and out of the library.

use crate::error::ImageError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Sentinel stored in a column the service did not fill.
pub const NOT_AVAILABLE: &str = "N/A";

/// Header of the source-filename column prepended by the batch driver.
pub const FILE_COLUMN: &str = "Arquivo";

/// Header of the column holding the error message of a failed image.
pub const STATUS_COLUMN: &str = "Status";

// ── RawFieldMap ──────────────────────────────────────────────────────────

/// Lower-cased field label → extracted text, as flattened from the service
/// response. Transient: built once per image and consumed by
/// [`crate::pipeline::normalize::normalize`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFieldMap(HashMap<String, String>);

impl RawFieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field, replacing any earlier value under the same key.
    pub fn insert(&mut self, label: impl Into<String>, content: impl Into<String>) {
        self.0.insert(label.into(), content.into());
    }

    pub fn get(&self, label: &str) -> Option<&str> {
        self.0.get(label).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawFieldMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

// ── Columns & FixedRecord ────────────────────────────────────────────────

/// The closed set of canonical output columns, in export order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Column {
    Nome,
    Data,
    Fone,
    Cel,
    Address,
}

impl Column {
    /// Every column, in canonical order.
    pub const ALL: [Column; 5] = [
        Column::Nome,
        Column::Data,
        Column::Fone,
        Column::Cel,
        Column::Address,
    ];

    /// Column header as it appears in the exported table.
    pub fn header(self) -> &'static str {
        match self {
            Column::Nome => "Nome",
            Column::Data => "Data",
            Column::Fone => "Fone",
            Column::Cel => "Cel",
            Column::Address => "Address",
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header())
    }
}

/// One normalized row. Every canonical column always holds a value, possibly
/// [`NOT_AVAILABLE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedRecord {
    #[serde(rename = "Nome")]
    pub nome: String,
    #[serde(rename = "Data")]
    pub data: String,
    #[serde(rename = "Fone")]
    pub fone: String,
    #[serde(rename = "Cel")]
    pub cel: String,
    #[serde(rename = "Address")]
    pub address: String,
}

impl Default for FixedRecord {
    fn default() -> Self {
        Self {
            nome: NOT_AVAILABLE.to_string(),
            data: NOT_AVAILABLE.to_string(),
            fone: NOT_AVAILABLE.to_string(),
            cel: NOT_AVAILABLE.to_string(),
            address: NOT_AVAILABLE.to_string(),
        }
    }
}

impl FixedRecord {
    pub fn get(&self, column: Column) -> &str {
        match column {
            Column::Nome => &self.nome,
            Column::Data => &self.data,
            Column::Fone => &self.fone,
            Column::Cel => &self.cel,
            Column::Address => &self.address,
        }
    }

    pub fn set(&mut self, column: Column, value: String) {
        let slot = match column {
            Column::Nome => &mut self.nome,
            Column::Data => &mut self.data,
            Column::Fone => &mut self.fone,
            Column::Cel => &mut self.cel,
            Column::Address => &mut self.address,
        };
        *slot = value;
    }

    /// `(header, value)` pairs in canonical order.
    pub fn cells(&self) -> impl Iterator<Item = (&'static str, &str)> {
        Column::ALL.into_iter().map(move |c| (c.header(), self.get(c)))
    }
}

// ── Per-image and batch results ──────────────────────────────────────────

/// Outcome of the analysis stage: the flattened fields, or the reason the
/// image produced none.
pub type ExtractionOutcome = Result<RawFieldMap, ImageError>;

/// Result for a single input image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageResult {
    /// 0-based position of the image in the batch.
    pub index: usize,
    /// Source filename (the `Arquivo` column).
    pub file_name: String,
    /// Normalized record, or the per-image error.
    pub outcome: Result<FixedRecord, ImageError>,
    /// Wall-clock time spent on this image.
    pub duration_ms: u64,
}

impl ImageResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn record(&self) -> Option<&FixedRecord> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&ImageError> {
        self.outcome.as_ref().err()
    }
}

/// Aggregate counters for a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    /// Images handed to the batch.
    pub total_images: usize,
    /// Images that produced a record.
    pub processed_images: usize,
    /// Images that produced an error entry.
    pub failed_images: usize,
    /// Images never started because the batch was cancelled.
    pub skipped_images: usize,
    pub total_duration_ms: u64,
    /// Time spent binarizing images.
    pub preprocess_duration_ms: u64,
    /// Time spent waiting on the analysis service.
    pub analysis_duration_ms: u64,
}

/// Everything produced by [`crate::extract::extract_batch`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutput {
    /// One entry per processed image, in upload order.
    pub results: Vec<ImageResult>,
    pub stats: BatchStats,
}

impl BatchOutput {
    /// True when the batch stopped early on cancellation.
    pub fn was_cancelled(&self) -> bool {
        self.stats.skipped_images > 0
    }
}
