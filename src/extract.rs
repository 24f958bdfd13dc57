//! Eager (whole-batch) extraction entry points.
//!
//! Images are processed one at a time, in upload order. A failing image
//! becomes an error entry and the loop moves on; only an unavailable service
//! client stops the batch, and that is checked before the first image.
//! Use [`crate::stream::extract_stream`] to receive entries as they finish.

use crate::client::{AzureDocumentClient, ClientCache};
use crate::config::{ExtractionConfig, ServiceCredentials};
use crate::error::{Form2SheetError, ImageError};
use crate::export::ResultTable;
use crate::output::{BatchOutput, BatchStats, ImageResult};
use crate::pipeline::analyze::{self, DocumentAnalysisService};
use crate::pipeline::input::{self, ImageInput};
use crate::pipeline::{normalize, preprocess};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Time spent in each stage for one image.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct StageTimings {
    pub preprocess_ms: u64,
    pub analysis_ms: u64,
}

/// Resolve inputs, connect to the service and extract every image.
///
/// The client is connected before any input is read, so a configuration
/// fault is reported before anything else happens.
///
/// # Errors
/// Returns `Err(Form2SheetError)` only for fatal errors:
/// - client unavailable (missing endpoint or key)
/// - input file not found / unreadable, or no images at all
pub async fn extract(
    inputs: &[String],
    credentials: &ServiceCredentials,
    config: &ExtractionConfig,
) -> Result<BatchOutput, Form2SheetError> {
    let client = AzureDocumentClient::connect(credentials, config)?;
    let service: Arc<dyn DocumentAnalysisService> = Arc::new(client);

    let images = input::resolve_inputs(inputs, config.download_timeout_secs).await?;
    extract_batch(&images, service, config).await
}

/// Extract a batch using the session's cached client.
pub async fn extract_with_cache(
    images: &[ImageInput],
    cache: &ClientCache,
    config: &ExtractionConfig,
) -> Result<BatchOutput, Form2SheetError> {
    let service = cache.get_or_connect()?;
    extract_batch(images, service, config).await
}

/// Extract a batch with an already constructed service.
///
/// Returns one [`ImageResult`] per image actually processed, in upload
/// order. If [`ExtractionConfig::cancel`] is set mid-batch, the remaining
/// images are counted in `stats.skipped_images` and produce no entry.
pub async fn extract_batch(
    images: &[ImageInput],
    service: Arc<dyn DocumentAnalysisService>,
    config: &ExtractionConfig,
) -> Result<BatchOutput, Form2SheetError> {
    if images.is_empty() {
        return Err(Form2SheetError::NoImages);
    }

    let total_start = Instant::now();
    let total = images.len();
    info!("Starting extraction of {} images with model '{}'", total, config.model_id);

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(total);
    }

    let mut results = Vec::with_capacity(total);
    let mut stats = BatchStats {
        total_images: total,
        ..Default::default()
    };

    for (index, image) in images.iter().enumerate() {
        if config.cancel.is_cancelled() {
            stats.skipped_images = total - index;
            warn!("Batch cancelled; {} images not processed", stats.skipped_images);
            break;
        }

        if let Some(ref cb) = config.progress_callback {
            cb.on_image_start(index, total, &image.file_name);
        }

        let (result, timings) = run_image(service.as_ref(), index, image, config).await;
        stats.preprocess_duration_ms += timings.preprocess_ms;
        stats.analysis_duration_ms += timings.analysis_ms;

        match &result.outcome {
            Ok(_) => {
                stats.processed_images += 1;
                if let Some(ref cb) = config.progress_callback {
                    cb.on_image_complete(index, total, &image.file_name);
                }
            }
            Err(e) => {
                stats.failed_images += 1;
                if let Some(ref cb) = config.progress_callback {
                    cb.on_image_error(index, total, &image.file_name, &e.to_string());
                }
            }
        }

        results.push(result);
    }

    stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
    info!(
        "Extraction complete: {}/{} images, {} failed, {}ms total",
        stats.processed_images, total, stats.failed_images, stats.total_duration_ms
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_complete(total, stats.processed_images);
    }

    Ok(BatchOutput { results, stats })
}

/// Run a single image through preprocess → analyze → normalize.
///
/// Always returns an [`ImageResult`]; failures land in its `outcome`.
pub async fn extract_image(
    service: &dyn DocumentAnalysisService,
    index: usize,
    image: &ImageInput,
    config: &ExtractionConfig,
) -> ImageResult {
    run_image(service, index, image, config).await.0
}

pub(crate) async fn run_image(
    service: &dyn DocumentAnalysisService,
    index: usize,
    image: &ImageInput,
    config: &ExtractionConfig,
) -> (ImageResult, StageTimings) {
    let start = Instant::now();
    let mut timings = StageTimings::default();

    let outcome = async {
        let prepared = if config.preprocess {
            let t = Instant::now();
            let prepared = binarize(image, config).await?;
            timings.preprocess_ms = t.elapsed().as_millis() as u64;
            prepared
        } else {
            image.bytes.clone()
        };

        let t = Instant::now();
        let raw = analyze::analyze(service, &image.file_name, &prepared, &config.model_id).await;
        timings.analysis_ms = t.elapsed().as_millis() as u64;

        raw.map(|raw| normalize::normalize(&raw))
    }
    .await;

    let duration_ms = start.elapsed().as_millis() as u64;
    match &outcome {
        Ok(_) => debug!("{}: extracted in {}ms", image.file_name, duration_ms),
        Err(e) => warn!("{}", e),
    }

    (
        ImageResult {
            index,
            file_name: image.file_name.clone(),
            outcome,
            duration_ms,
        },
        timings,
    )
}

/// Binarize on the blocking pool; the threshold pass is CPU-bound.
async fn binarize(image: &ImageInput, config: &ExtractionConfig) -> Result<Vec<u8>, ImageError> {
    let bytes = image.bytes.clone();
    let block = config.threshold_block_size;
    let offset = config.threshold_offset;

    let result = tokio::task::spawn_blocking(move || preprocess::preprocess(&bytes, block, offset))
        .await
        .map_err(|e| ImageError::Decode {
            file_name: image.file_name.clone(),
            detail: format!("preprocessing task panicked: {e}"),
        })?;

    result.map_err(|e| ImageError::Decode {
        file_name: image.file_name.clone(),
        detail: e.to_string(),
    })
}

/// Extract and write the result table to `output_path` as CSV.
///
/// The file is written atomically (temp file in the same directory, then
/// rename), so a failed run never leaves a half-written table behind.
pub async fn extract_to_file(
    inputs: &[String],
    output_path: impl AsRef<Path>,
    credentials: &ServiceCredentials,
    config: &ExtractionConfig,
) -> Result<BatchStats, Form2SheetError> {
    let output = extract(inputs, credentials, config).await?;
    let table = ResultTable::from_results(&output.results);

    let path = output_path.as_ref().to_path_buf();
    tokio::task::spawn_blocking(move || table.write_csv_file(&path))
        .await
        .map_err(|e| Form2SheetError::Internal(format!("export task panicked: {e}")))??;

    Ok(output.stats)
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    inputs: &[String],
    credentials: &ServiceCredentials,
    config: &ExtractionConfig,
) -> Result<BatchOutput, Form2SheetError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Form2SheetError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract(inputs, credentials, config))
}
