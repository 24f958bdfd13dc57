//! Configuration types for form extraction.
//!
//! All batch behaviour is controlled through [`ExtractionConfig`], built via
//! its [`ExtractionConfigBuilder`]. Service credentials live separately in
//! [`ServiceCredentials`] because they are process-wide state read once at
//! startup, while an `ExtractionConfig` describes a single batch.

use crate::error::Form2SheetError;
use crate::progress::ProgressCallback;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Environment variable holding the Document Intelligence endpoint URL.
pub const ENDPOINT_ENV: &str = "AZURE_FORM_RECOGNIZER_ENDPOINT";

/// Environment variable holding the Document Intelligence access key.
pub const KEY_ENV: &str = "AZURE_FORM_RECOGNIZER_KEY";

/// REST API version spoken by [`crate::client::AzureDocumentClient`].
pub const DEFAULT_API_VERSION: &str = "2023-07-31";

/// Configuration for one extraction batch.
///
/// # Example
/// ```rust
/// use edgequake_form2sheet::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .model_id("fichas-v3")
///     .poll_interval_ms(500)
///     .build()
///     .unwrap();
/// assert_eq!(config.threshold_block_size, 11);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Identifier of the trained custom model on the service. Required.
    pub model_id: String,

    /// Binarize images before submitting them. Default: true.
    ///
    /// Scanned forms often carry uneven lighting and paper shading; a local
    /// threshold turns them into crisp black-on-white text, which the
    /// recognizer reads noticeably better than the raw photo.
    pub preprocess: bool,

    /// Neighbourhood size (pixels, odd, ≥ 3) of the adaptive threshold. Default: 11.
    pub threshold_block_size: u32,

    /// Constant subtracted from the weighted local mean. Default: 2.
    pub threshold_offset: i32,

    /// Delay between polls of a running analysis, in milliseconds. Default: 1000.
    pub poll_interval_ms: u64,

    /// Maximum number of polls before an analysis is reported as failed. Default: 120.
    pub max_poll_attempts: u32,

    /// Per-HTTP-request timeout for service calls, in seconds. Default: 60.
    pub request_timeout_secs: u64,

    /// Retries of one submit or poll request on a transient failure
    /// (transport error, HTTP 408, 429 or 5xx). Default: 3.
    ///
    /// Other statuses (bad key, unknown model) are never retried.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled after each attempt.
    /// A `Retry-After` header from the service takes precedence. Default: 500.
    pub retry_backoff_ms: u64,

    /// Download timeout for URL inputs, in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional per-image progress callback.
    pub progress_callback: Option<ProgressCallback>,

    /// Flag checked between images; set it to stop the remaining batch.
    pub cancel: CancellationFlag,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            model_id: String::new(),
            preprocess: true,
            threshold_block_size: 11,
            threshold_offset: 2,
            poll_interval_ms: 1000,
            max_poll_attempts: 120,
            request_timeout_secs: 60,
            max_retries: 3,
            retry_backoff_ms: 500,
            download_timeout_secs: 120,
            progress_callback: None,
            cancel: CancellationFlag::default(),
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("model_id", &self.model_id)
            .field("preprocess", &self.preprocess)
            .field("threshold_block_size", &self.threshold_block_size)
            .field("threshold_offset", &self.threshold_offset)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("max_poll_attempts", &self.max_poll_attempts)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn ExtractionProgressCallback>"),
            )
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn model_id(mut self, id: impl Into<String>) -> Self {
        self.config.model_id = id.into();
        self
    }

    pub fn preprocess(mut self, v: bool) -> Self {
        self.config.preprocess = v;
        self
    }

    pub fn threshold_block_size(mut self, size: u32) -> Self {
        self.config.threshold_block_size = size;
        self
    }

    pub fn threshold_offset(mut self, offset: i32) -> Self {
        self.config.threshold_offset = offset;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn max_poll_attempts(mut self, n: u32) -> Self {
        self.config.max_poll_attempts = n.max(1);
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn cancel(mut self, flag: CancellationFlag) -> Self {
        self.config.cancel = flag;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, Form2SheetError> {
        let c = &self.config;
        if c.model_id.trim().is_empty() {
            return Err(Form2SheetError::InvalidConfig(
                "a model id is required".into(),
            ));
        }
        if c.threshold_block_size < 3 || c.threshold_block_size % 2 == 0 {
            return Err(Form2SheetError::InvalidConfig(format!(
                "threshold block size must be odd and ≥ 3, got {}",
                c.threshold_block_size
            )));
        }
        Ok(self.config)
    }
}

// ── Credentials ──────────────────────────────────────────────────────────

/// Endpoint and key of the document-analysis service.
///
/// Either field may be absent; [`crate::client::AzureDocumentClient::connect`]
/// turns an absence into [`Form2SheetError::ClientUnavailable`].
#[derive(Clone, Default)]
pub struct ServiceCredentials {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub api_version: Option<String>,
}

impl ServiceCredentials {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            api_key: Some(api_key.into()),
            api_version: None,
        }
    }

    /// Read [`ENDPOINT_ENV`] and [`KEY_ENV`]. Empty values count as absent.
    pub fn from_env() -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            endpoint: read(ENDPOINT_ENV),
            api_key: read(KEY_ENV),
            api_version: None,
        }
    }

    /// Override fields with explicit values when given (CLI flags win over env).
    pub fn with_overrides(mut self, endpoint: Option<String>, api_key: Option<String>) -> Self {
        if endpoint.is_some() {
            self.endpoint = endpoint;
        }
        if api_key.is_some() {
            self.api_key = api_key;
        }
        self
    }

    pub fn api_version(&self) -> &str {
        self.api_version.as_deref().unwrap_or(DEFAULT_API_VERSION)
    }
}

impl fmt::Debug for ServiceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceCredentials")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_version", &self.api_version())
            .finish()
    }
}

// ── Cancellation ─────────────────────────────────────────────────────────

/// Cloneable stop flag shared between the batch driver and whoever wants to
/// abort it (a Ctrl-C handler, an operator "reset").
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
