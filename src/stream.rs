//! Streaming extraction API: emit image results as they complete.
//!
//! Unlike the eager [`crate::extract::extract`] which returns only after the
//! whole batch finishes, [`extract_stream`] yields one [`ImageResult`] per
//! image as soon as it is done. Images are still processed one at a time, so
//! items arrive in upload order.
//!
//! Setting [`crate::config::CancellationFlag`] ends the stream before the next
//! image starts.

use crate::client::AzureDocumentClient;
use crate::config::{ExtractionConfig, ServiceCredentials};
use crate::error::Form2SheetError;
use crate::extract::extract_image;
use crate::output::ImageResult;
use crate::pipeline::analyze::DocumentAnalysisService;
use crate::pipeline::input::{self, ImageInput};
use futures::future;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of image results.
pub type ImageStream = Pin<Box<dyn Stream<Item = ImageResult> + Send>>;

/// Resolve inputs, connect, and stream results image by image.
///
/// # Returns
/// - `Ok(ImageStream)`: one item per processed image, failures included
/// - `Err(Form2SheetError)`: fatal error (client unavailable, missing file, no images)
///
/// # Example
/// ```rust,no_run
/// use edgequake_form2sheet::{extract_stream, ExtractionConfig, ServiceCredentials};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ExtractionConfig::builder().model_id("fichas-v1").build()?;
/// let inputs = vec!["scans/".to_string()];
/// let mut stream = extract_stream(&inputs, &ServiceCredentials::from_env(), &config).await?;
/// while let Some(item) = stream.next().await {
///     match item.outcome {
///         Ok(record) => println!("{}: {}", item.file_name, record.nome),
///         Err(e) => eprintln!("Error: {e}"),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub async fn extract_stream(
    inputs: &[String],
    credentials: &ServiceCredentials,
    config: &ExtractionConfig,
) -> Result<ImageStream, Form2SheetError> {
    let client = AzureDocumentClient::connect(credentials, config)?;
    let images = input::resolve_inputs(inputs, config.download_timeout_secs).await?;
    stream_images(images, Arc::new(client), config)
}

/// Stream already-loaded images through `service`.
pub fn stream_images(
    images: Vec<ImageInput>,
    service: Arc<dyn DocumentAnalysisService>,
    config: &ExtractionConfig,
) -> Result<ImageStream, Form2SheetError> {
    if images.is_empty() {
        return Err(Form2SheetError::NoImages);
    }
    info!("Starting streaming extraction of {} images", images.len());

    let cancel = config.cancel.clone();
    let config_clone = config.clone();

    let s = stream::iter(images.into_iter().enumerate())
        .take_while(move |_| future::ready(!cancel.is_cancelled()))
        .then(move |(index, image)| {
            let service = Arc::clone(&service);
            let cfg = config_clone.clone();
            async move { extract_image(service.as_ref(), index, &image, &cfg).await }
        });

    Ok(Box::pin(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::analyze::{AnalyzedDocument, ServiceFault};
    use async_trait::async_trait;

    struct NoDocs;

    #[async_trait]
    impl DocumentAnalysisService for NoDocs {
        async fn analyze_document(
            &self,
            _model_id: &str,
            _image: &[u8],
        ) -> Result<Vec<AnalyzedDocument>, ServiceFault> {
            Ok(vec![])
        }
    }

    fn config() -> ExtractionConfig {
        ExtractionConfig::builder()
            .model_id("m")
            .preprocess(false)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn yields_in_upload_order() {
        let images = vec![ImageInput::new("1.png", vec![1]), ImageInput::new("2.png", vec![2])];
        let items: Vec<ImageResult> = stream_images(images, Arc::new(NoDocs), &config())
            .unwrap()
            .collect()
            .await;
        let names: Vec<&str> = items.iter().map(|r| r.file_name.as_str()).collect();
        assert_eq!(names, vec!["1.png", "2.png"]);
        assert!(items.iter().all(|r| r.is_ok()));
    }

    #[tokio::test]
    async fn cancelled_before_start_yields_nothing() {
        let cfg = config();
        cfg.cancel.cancel();
        let items: Vec<ImageResult> =
            stream_images(vec![ImageInput::new("1.png", vec![1])], Arc::new(NoDocs), &cfg)
                .unwrap()
                .collect()
                .await;
        assert!(items.is_empty());
    }

    #[test]
    fn collects_on_blocking_executor_without_preprocessing() {
        let s = stream_images(vec![ImageInput::new("1.png", vec![1])], Arc::new(NoDocs), &config())
            .unwrap();
        let items: Vec<ImageResult> = tokio_test::block_on(s.collect());
        assert_eq!(items.len(), 1);
        assert!(items[0].record().is_some());
    }

    #[test]
    fn empty_input_is_fatal() {
        let err = stream_images(vec![], Arc::new(NoDocs), &config()).err().unwrap();
        assert!(matches!(err, Form2SheetError::NoImages));
    }
}
