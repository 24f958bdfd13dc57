//! Document analysis: the capability seam and the response flattening.
//!
//! [`DocumentAnalysisService`] is the only thing the pipeline knows about the
//! cloud recognizer: submit image bytes for a model, eventually get back a
//! list of documents with named fields. [`crate::client::AzureDocumentClient`]
//! is the production implementation; tests plug in an in-memory fake.
//!
//! ## Flattening
//!
//! Every document and every field with non-empty content contributes
//! `lowercase(name) -> content` to one [`RawFieldMap`]. A label seen twice
//! keeps the value seen **last** (documents in response order, fields in
//! response order within a document).

use crate::error::ImageError;
use crate::output::{ExtractionOutcome, RawFieldMap};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

/// A single extracted field. `content` is absent when the model located the
/// field but read nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentField {
    pub content: Option<String>,
}

impl DocumentField {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
        }
    }

    pub fn empty() -> Self {
        Self { content: None }
    }
}

/// One analyzed document with its fields in response order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzedDocument {
    pub doc_type: Option<String>,
    pub fields: Vec<(String, DocumentField)>,
}

impl AnalyzedDocument {
    pub fn with_fields<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, DocumentField)>,
        K: Into<String>,
    {
        Self {
            doc_type: None,
            fields: fields.into_iter().map(|(k, f)| (k.into(), f)).collect(),
        }
    }
}

/// Failure reported by a [`DocumentAnalysisService`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceFault {
    /// The model id does not exist or is not ready.
    #[error("model '{model_id}' not found")]
    ModelNotFound { model_id: String },

    /// Anything else: network, throttling, auth, malformed payload.
    #[error("{detail}")]
    Other { detail: String },
}

/// Asynchronous submit → wait → result capability of the cloud recognizer.
///
/// Implementations must be safe to reuse across sequential calls.
#[async_trait]
pub trait DocumentAnalysisService: Send + Sync {
    /// Analyze `image` with the custom model `model_id`, resolving once the
    /// service reports a terminal state.
    async fn analyze_document(
        &self,
        model_id: &str,
        image: &[u8],
    ) -> Result<Vec<AnalyzedDocument>, ServiceFault>;
}

/// Merge all documents' fields into one map, lower-casing labels.
pub fn flatten_documents(documents: &[AnalyzedDocument]) -> RawFieldMap {
    let mut raw = RawFieldMap::new();
    for doc in documents {
        for (name, field) in &doc.fields {
            match field.content.as_deref() {
                Some(content) if !content.is_empty() => {
                    raw.insert(name.to_lowercase(), content);
                }
                _ => {}
            }
        }
    }
    raw
}

/// Run one image through the service and flatten the response.
///
/// Never fails past the caller: service faults come back as the `Err` side
/// of the outcome, tagged with `file_name`.
pub async fn analyze(
    service: &dyn DocumentAnalysisService,
    file_name: &str,
    image: &[u8],
    model_id: &str,
) -> ExtractionOutcome {
    let start = Instant::now();
    match service.analyze_document(model_id, image).await {
        Ok(documents) => {
            let raw = flatten_documents(&documents);
            debug!(
                "{}: {} documents, {} fields in {:?}",
                file_name,
                documents.len(),
                raw.len(),
                start.elapsed()
            );
            Ok(raw)
        }
        Err(ServiceFault::ModelNotFound { model_id }) => {
            warn!("{}: model '{}' not found", file_name, model_id);
            Err(ImageError::ModelNotFound {
                file_name: file_name.to_string(),
                model_id,
            })
        }
        Err(ServiceFault::Other { detail }) => {
            warn!("{}: analysis failed: {}", file_name, detail);
            Err(ImageError::Service {
                file_name: file_name.to_string(),
                detail,
            })
        }
    }
}
