//! Azure Document Intelligence client and the per-session client cache.
//!
//! ## Protocol
//!
//! ```text
//! POST {endpoint}/formrecognizer/documentModels/{model}:analyze?api-version=…
//!      {"base64Source": "…"}                 ──▶ 202 + Operation-Location
//! GET  {Operation-Location}  (every poll_interval_ms)
//!      {"status": "running"}                 ──▶ keep polling
//!      {"status": "succeeded", "analyzeResult": {"documents": [...]}}
//!      {"status": "failed", "error": {...}}
//! ```
//!
//! A missing model answers the submit with HTTP 404 and an error code of
//! `NotFound` / `ModelNotFound`; that becomes [`ServiceFault::ModelNotFound`].
//! Every other failure becomes [`ServiceFault::Other`] carrying the HTTP
//! status and the service's own message.
//!
//! ## Construct once
//!
//! [`AzureDocumentClient::connect`] is the explicit initialization step: it
//! validates credentials and builds the HTTP client, failing with
//! [`Form2SheetError::ClientUnavailable`]. [`ClientCache`] keeps the result
//! of that step for the session, failure included, until [`ClientCache::reset`].

use crate::config::{ExtractionConfig, ServiceCredentials};
use crate::error::Form2SheetError;
use crate::pipeline::analyze::{AnalyzedDocument, DocumentAnalysisService, DocumentField, ServiceFault};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const OPERATION_LOCATION: &str = "operation-location";

/// Document Intelligence REST client for custom-model analysis.
#[derive(Clone)]
pub struct AzureDocumentClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    api_version: String,
    poll_interval: Duration,
    max_poll_attempts: u32,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl fmt::Debug for AzureDocumentClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureDocumentClient")
            .field("endpoint", &self.endpoint)
            .field("api_version", &self.api_version)
            .field("poll_interval", &self.poll_interval)
            .field("max_poll_attempts", &self.max_poll_attempts)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl AzureDocumentClient {
    /// Validate credentials and build the HTTP client.
    pub fn connect(
        credentials: &ServiceCredentials,
        config: &ExtractionConfig,
    ) -> Result<Self, Form2SheetError> {
        let unavailable = |reason: String| Form2SheetError::ClientUnavailable { reason };

        let endpoint = credentials
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| unavailable("endpoint is not set".into()))?;
        let api_key = credentials
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| unavailable("access key is not set".into()))?;

        let parsed = reqwest::Url::parse(endpoint)
            .map_err(|e| unavailable(format!("endpoint '{endpoint}' is not a valid URL: {e}")))?;
        if parsed.scheme() != "https" && parsed.scheme() != "http" {
            return Err(unavailable(format!(
                "endpoint '{endpoint}' must use http or https"
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| unavailable(format!("could not build HTTP client: {e}")))?;

        info!("Document analysis client ready for {}", endpoint);

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            api_version: credentials.api_version().to_string(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_poll_attempts: config.max_poll_attempts,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        })
    }

    /// URL of the analyze operation for `model_id`.
    pub fn analyze_url(&self, model_id: &str) -> String {
        format!(
            "{}/formrecognizer/documentModels/{}:analyze?api-version={}",
            self.endpoint, model_id, self.api_version
        )
    }

    async fn submit(&self, model_id: &str, image: &[u8]) -> Result<String, ServiceFault> {
        let url = self.analyze_url(model_id);
        let body = serde_json::json!({ "base64Source": STANDARD.encode(image) });
        let response = self
            .send_with_retry(model_id, || self.http.post(&url).json(&body))
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_error(status.as_u16(), &text, model_id));
        }

        response
            .headers()
            .get(OPERATION_LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ServiceFault::Other {
                detail: format!("HTTP {status}: response had no Operation-Location header"),
            })
    }

    async fn poll(&self, model_id: &str, location: &str) -> Result<Vec<AnalyzedDocument>, ServiceFault> {
        for attempt in 1..=self.max_poll_attempts {
            let response = self
                .send_with_retry(model_id, || self.http.get(location))
                .await?;

            let status = response.status();
            let text = response.text().await.map_err(transport_fault)?;
            if !status.is_success() {
                return Err(classify_error(status.as_u16(), &text, model_id));
            }

            match parse_operation(&text)? {
                OperationState::Succeeded(documents) => {
                    debug!("Analysis finished after {} polls", attempt);
                    return Ok(documents);
                }
                OperationState::Running => {
                    debug!("Analysis still running (poll {}/{})", attempt, self.max_poll_attempts);
                    sleep(self.poll_interval).await;
                }
            }
        }

        warn!("Analysis did not finish after {} polls", self.max_poll_attempts);
        Err(ServiceFault::Other {
            detail: format!(
                "analysis did not finish after {} polls",
                self.max_poll_attempts
            ),
        })
    }

    /// Send one request, retrying transport errors and transient statuses.
    ///
    /// Returns the first response that is not transient, success or not.
    /// Delays double from `retry_backoff_ms`; a `Retry-After` header wins.
    async fn send_with_retry<F>(
        &self,
        model_id: &str,
        build: F,
    ) -> Result<reqwest::Response, ServiceFault>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt: u32 = 0;
        loop {
            let outcome = build().header(KEY_HEADER, &self.api_key).send().await;

            let (reason, retry_after) = match outcome {
                Ok(response) if !is_transient(response.status().as_u16()) => return Ok(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    if attempt >= self.max_retries {
                        let text = response.text().await.unwrap_or_default();
                        return Err(classify_error(status, &text, model_id));
                    }
                    (format!("HTTP {status}"), retry_after(response.headers()))
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(transport_fault(e));
                    }
                    (e.to_string(), None)
                }
            };

            attempt += 1;
            let delay = retry_after.unwrap_or_else(|| {
                let factor = 1u64 << (attempt - 1).min(16);
                Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
            });
            warn!(
                "{}: retry {}/{} after {}ms",
                reason,
                attempt,
                self.max_retries,
                delay.as_millis()
            );
            sleep(delay).await;
        }
    }
}

#[async_trait]
impl DocumentAnalysisService for AzureDocumentClient {
    async fn analyze_document(
        &self,
        model_id: &str,
        image: &[u8],
    ) -> Result<Vec<AnalyzedDocument>, ServiceFault> {
        let location = self.submit(model_id, image).await?;
        debug!("Submitted {} bytes to model '{}'", image.len(), model_id);
        self.poll(model_id, &location).await
    }
}

/// Statuses worth another attempt: timeout, throttling, server-side faults.
fn is_transient(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

/// `Retry-After` in whole seconds, if present and numeric.
fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn transport_fault(e: reqwest::Error) -> ServiceFault {
    let detail = if e.is_timeout() {
        format!("request timed out: {e}")
    } else {
        format!("request failed: {e}")
    };
    ServiceFault::Other { detail }
}

// ── Response payloads ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
    #[serde(rename = "innererror")]
    inner: Option<Box<ErrorBody>>,
}

impl ErrorBody {
    fn codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self.code.as_deref().into_iter().collect();
        if let Some(inner) = &self.inner {
            codes.extend(inner.codes());
        }
        codes
    }

    fn describe(&self) -> String {
        match (&self.code, &self.message) {
            (Some(c), Some(m)) => format!("{c}: {m}"),
            (Some(c), None) => c.clone(),
            (None, Some(m)) => m.clone(),
            (None, None) => "unknown error".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OperationBody {
    status: String,
    #[serde(rename = "analyzeResult")]
    analyze_result: Option<AnalyzeResultBody>,
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResultBody {
    #[serde(default)]
    documents: Option<Vec<DocumentBody>>,
}

#[derive(Debug, Deserialize)]
struct DocumentBody {
    #[serde(rename = "docType")]
    doc_type: Option<String>,
    #[serde(default)]
    fields: serde_json::Map<String, serde_json::Value>,
}

/// Parsed state of a polled analyze operation.
#[derive(Debug, PartialEq, Eq)]
pub enum OperationState {
    Running,
    Succeeded(Vec<AnalyzedDocument>),
}

/// Interpret the body of an Operation-Location poll.
pub fn parse_operation(body: &str) -> Result<OperationState, ServiceFault> {
    let op: OperationBody = serde_json::from_str(body).map_err(|e| ServiceFault::Other {
        detail: format!("malformed analyze response: {e}"),
    })?;

    match op.status.as_str() {
        "notStarted" | "running" => Ok(OperationState::Running),
        "succeeded" => {
            let documents = op
                .analyze_result
                .and_then(|r| r.documents)
                .unwrap_or_default()
                .into_iter()
                .map(|d| AnalyzedDocument {
                    doc_type: d.doc_type,
                    fields: d
                        .fields
                        .into_iter()
                        .map(|(name, value)| {
                            let content = value
                                .get("content")
                                .and_then(|c| c.as_str())
                                .map(str::to_string);
                            (name, DocumentField { content })
                        })
                        .collect(),
                })
                .collect();
            Ok(OperationState::Succeeded(documents))
        }
        "failed" => Err(ServiceFault::Other {
            detail: format!(
                "analysis failed: {}",
                op.error
                    .map(|e| e.describe())
                    .unwrap_or_else(|| "no error details".into())
            ),
        }),
        other => Err(ServiceFault::Other {
            detail: format!("unexpected analysis status '{other}'"),
        }),
    }
}

/// Map a non-2xx response to a fault.
pub fn classify_error(status: u16, body: &str, model_id: &str) -> ServiceFault {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.error);

    let model_missing = parsed
        .as_ref()
        .map(|e| {
            e.codes()
                .iter()
                .any(|c| c.eq_ignore_ascii_case("ModelNotFound") || c.eq_ignore_ascii_case("NotFound"))
        })
        .unwrap_or(false);

    if status == 404 || model_missing {
        return ServiceFault::ModelNotFound {
            model_id: model_id.to_string(),
        };
    }

    let detail = match parsed {
        Some(e) => format!("HTTP {status}: {}", e.describe()),
        None if body.trim().is_empty() => format!("HTTP {status}"),
        None => format!("HTTP {status}: {}", body.trim()),
    };
    ServiceFault::Other { detail }
}

// ── Session cache ────────────────────────────────────────────────────────

type Connector =
    Box<dyn Fn() -> Result<Arc<dyn DocumentAnalysisService>, Form2SheetError> + Send + Sync>;

/// Session-scoped slot for the document-analysis client.
///
/// The first [`get_or_connect`](Self::get_or_connect) runs the connector and
/// remembers the outcome. A failed construction stays failed (reported as
/// [`Form2SheetError::ClientUnavailable`]) until [`reset`](Self::reset).
pub struct ClientCache {
    connector: Connector,
    slot: Mutex<Option<Result<Arc<dyn DocumentAnalysisService>, String>>>,
}

impl fmt::Debug for ClientCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCache")
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl ClientCache {
    /// Cache over an arbitrary connector.
    pub fn new<F>(connector: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn DocumentAnalysisService>, Form2SheetError> + Send + Sync + 'static,
    {
        Self {
            connector: Box::new(connector),
            slot: Mutex::new(None),
        }
    }

    /// Cache that connects an [`AzureDocumentClient`].
    pub fn azure(credentials: ServiceCredentials, config: &ExtractionConfig) -> Self {
        let config = config.clone();
        Self::new(move || {
            let client = AzureDocumentClient::connect(&credentials, &config)?;
            Ok(Arc::new(client) as Arc<dyn DocumentAnalysisService>)
        })
    }

    /// Return the cached client, constructing it on first use.
    pub fn get_or_connect(&self) -> Result<Arc<dyn DocumentAnalysisService>, Form2SheetError> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            let outcome = (self.connector)().map_err(|e| match e {
                Form2SheetError::ClientUnavailable { reason } => reason,
                other => other.to_string(),
            });
            if let Err(reason) = &outcome {
                warn!("Document analysis client unavailable: {}", reason);
            }
            *slot = Some(outcome);
        }

        match slot.as_ref() {
            Some(Ok(client)) => Ok(Arc::clone(client)),
            Some(Err(reason)) => Err(Form2SheetError::ClientUnavailable {
                reason: reason.clone(),
            }),
            None => Err(Form2SheetError::Internal("client slot left empty".into())),
        }
    }

    /// Forget the cached outcome; the next call constructs again.
    pub fn reset(&self) {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn is_initialized(&self) -> bool {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn config() -> ExtractionConfig {
        ExtractionConfig::builder().model_id("fichas").build().unwrap()
    }

    #[test]
    fn connect_requires_endpoint_and_key() {
        let err = AzureDocumentClient::connect(&ServiceCredentials::default(), &config()).unwrap_err();
        assert!(err.to_string().contains("endpoint is not set"));

        let creds = ServiceCredentials {
            endpoint: Some("https://x.cognitiveservices.azure.com".into()),
            api_key: Some("  ".into()),
            api_version: None,
        };
        let err = AzureDocumentClient::connect(&creds, &config()).unwrap_err();
        assert!(err.to_string().contains("access key is not set"));
    }

    #[test]
    fn connect_rejects_non_http_endpoint() {
        let creds = ServiceCredentials::new("ftp://x.example", "k");
        let err = AzureDocumentClient::connect(&creds, &config()).unwrap_err();
        assert!(matches!(err, Form2SheetError::ClientUnavailable { .. }));

        let creds = ServiceCredentials::new("not a url", "k");
        assert!(AzureDocumentClient::connect(&creds, &config()).is_err());
    }

    #[test]
    fn analyze_url_trims_trailing_slash() {
        let creds = ServiceCredentials::new("https://x.cognitiveservices.azure.com/", "k");
        let client = AzureDocumentClient::connect(&creds, &config()).unwrap();
        assert_eq!(
            client.analyze_url("fichas-v3"),
            "https://x.cognitiveservices.azure.com/formrecognizer/documentModels/fichas-v3:analyze?api-version=2023-07-31"
        );
    }

    #[test]
    fn debug_never_prints_key() {
        let creds = ServiceCredentials::new("https://x.example", "super-secret");
        let client = AzureDocumentClient::connect(&creds, &config()).unwrap();
        assert!(!format!("{client:?}").contains("super-secret"));
    }

    #[test]
    fn parse_running_states() {
        assert_eq!(parse_operation(r#"{"status":"running"}"#).unwrap(), OperationState::Running);
        assert_eq!(parse_operation(r#"{"status":"notStarted"}"#).unwrap(), OperationState::Running);
    }

    #[test]
    fn parse_succeeded_keeps_field_order_and_nulls() {
        let body = r#"{
            "status": "succeeded",
            "analyzeResult": {
                "documents": [{
                    "docType": "fichas:fichas",
                    "fields": {
                        "Nome": {"type": "string", "content": "Ana Souza", "confidence": 0.98},
                        "Celular": {"type": "string", "confidence": 0.1},
                        "Telefone": null,
                        "Data": {"type": "string", "content": "03/04/1985"}
                    }
                }]
            }
        }"#;
        let OperationState::Succeeded(docs) = parse_operation(body).unwrap() else {
            panic!("expected success");
        };
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].doc_type.as_deref(), Some("fichas:fichas"));
        let names: Vec<&str> = docs[0].fields.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["Nome", "Celular", "Telefone", "Data"]);
        assert_eq!(docs[0].fields[0].1.content.as_deref(), Some("Ana Souza"));
        assert_eq!(docs[0].fields[1].1.content, None);
        assert_eq!(docs[0].fields[2].1.content, None);
    }

    #[test]
    fn parse_succeeded_without_documents_is_empty() {
        let body = r#"{"status":"succeeded","analyzeResult":{"apiVersion":"2023-07-31"}}"#;
        assert_eq!(parse_operation(body).unwrap(), OperationState::Succeeded(vec![]));
    }

    #[test]
    fn parse_failed_status_carries_message() {
        let body = r#"{"status":"failed","error":{"code":"InvalidContent","message":"The file is corrupted."}}"#;
        let fault = parse_operation(body).unwrap_err();
        assert!(fault.to_string().contains("The file is corrupted."));
    }

    #[test]
    fn parse_garbage_is_other_fault() {
        assert!(matches!(parse_operation("<html>"), Err(ServiceFault::Other { .. })));
    }

    #[test]
    fn classify_model_not_found() {
        let body = r#"{"error":{"code":"NotFound","message":"Resource not found.","innererror":{"code":"ModelNotFound","message":"The requested model was not found."}}}"#;
        assert_eq!(
            classify_error(404, body, "fichas-v3"),
            ServiceFault::ModelNotFound { model_id: "fichas-v3".into() }
        );
        assert!(matches!(classify_error(404, "", "m"), ServiceFault::ModelNotFound { .. }));
    }

    #[test]
    fn classify_other_errors_include_status_and_message() {
        let body = r#"{"error":{"code":"401","message":"Access denied due to invalid subscription key."}}"#;
        let fault = classify_error(401, body, "m");
        let msg = fault.to_string();
        assert!(msg.contains("HTTP 401"));
        assert!(msg.contains("invalid subscription key"));

        assert_eq!(
            classify_error(503, "", "m"),
            ServiceFault::Other { detail: "HTTP 503".into() }
        );
    }

    struct Nothing;

    #[async_trait]
    impl DocumentAnalysisService for Nothing {
        async fn analyze_document(
            &self,
            _model_id: &str,
            _image: &[u8],
        ) -> Result<Vec<AnalyzedDocument>, ServiceFault> {
            Ok(vec![])
        }
    }

    #[test]
    fn cache_constructs_once_and_reuses() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cache = ClientCache::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Nothing) as Arc<dyn DocumentAnalysisService>)
        });

        assert!(!cache.is_initialized());
        cache.get_or_connect().unwrap();
        cache.get_or_connect().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.is_initialized());
    }

    #[test]
    fn cache_remembers_failure_until_reset() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cache = ClientCache::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Form2SheetError::ClientUnavailable {
                reason: "access key is not set".into(),
            })
        });

        for _ in 0..3 {
            let err = cache.get_or_connect().err().expect("unavailable");
            assert!(err.to_string().contains("access key is not set"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.reset();
        assert!(!cache.is_initialized());
        assert!(cache.get_or_connect().is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn azure_cache_reports_missing_config() {
        let cache = ClientCache::azure(ServiceCredentials::default(), &config());
        let err = cache.get_or_connect().err().expect("unavailable");
        assert!(matches!(err, Form2SheetError::ClientUnavailable { .. }));
    }

    #[test]
    fn is_initialized_survives_poisoned_lock() {
        let cache = Arc::new(ClientCache::new(|| {
            Ok(Arc::new(Nothing) as Arc<dyn DocumentAnalysisService>)
        }));
        cache.get_or_connect().unwrap();

        let poisoner = Arc::clone(&cache);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.slot.lock().unwrap();
            panic!("poison the slot");
        })
        .join();

        assert!(cache.slot.is_poisoned());
        assert!(cache.is_initialized());
        assert!(cache.get_or_connect().is_ok());
    }

    // ── REST protocol against a local HTTP fake ──────────────────────────

    /// Serves one scripted response per connection and records request heads.
    struct FakeServer {
        base: String,
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl FakeServer {
        async fn start<F>(script: F) -> Self
        where
            F: FnOnce(&str) -> Vec<String>,
        {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let base = format!("http://{}", listener.local_addr().unwrap());
            let responses = script(&base);
            let requests = Arc::new(Mutex::new(Vec::new()));

            let log = Arc::clone(&requests);
            tokio::spawn(async move {
                for response in responses {
                    let Ok((mut socket, _)) = listener.accept().await else {
                        return;
                    };
                    let head = read_request(&mut socket).await;
                    log.lock().unwrap().push(head);
                    socket.write_all(response.as_bytes()).await.ok();
                    socket.shutdown().await.ok();
                }
            });

            Self { base, requests }
        }

        fn hits(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn client(&self, config: &ExtractionConfig) -> AzureDocumentClient {
            AzureDocumentClient::connect(&ServiceCredentials::new(&self.base, "test-key"), config)
                .unwrap()
        }
    }

    /// Read one request (head and `content-length` body); returns the lower-cased head.
    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                return String::from_utf8_lossy(&buf).to_lowercase();
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
                let body_len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + body_len {
                    return head;
                }
            }
        }
    }

    fn reply(status: &str, headers: &[(&str, &str)], body: &str) -> String {
        let mut out = format!(
            "HTTP/1.1 {status}\r\ncontent-length: {}\r\nconnection: close\r\n",
            body.len()
        );
        for (name, value) in headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str("\r\n");
        out.push_str(body);
        out
    }

    fn accepted(base: &str) -> String {
        let location = format!("{base}/formrecognizer/documentModels/fichas/analyzeResults/op-1?api-version=2023-07-31");
        reply("202 Accepted", &[("operation-location", &location)], "")
    }

    fn running() -> String {
        reply("200 OK", &[("content-type", "application/json")], r#"{"status":"running"}"#)
    }

    fn succeeded() -> String {
        reply(
            "200 OK",
            &[("content-type", "application/json")],
            r#"{"status":"succeeded","analyzeResult":{"documents":[{"docType":"fichas","fields":{"Nome":{"content":"Ana Souza"}}}]}}"#,
        )
    }

    fn fast_config() -> ExtractionConfig {
        ExtractionConfig::builder()
            .model_id("fichas")
            .poll_interval_ms(1)
            .retry_backoff_ms(1)
            .request_timeout_secs(5)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn submit_then_poll_until_succeeded() {
        let server = FakeServer::start(|base| vec![accepted(base), running(), succeeded()]).await;
        let client = server.client(&fast_config());

        let docs = client.analyze_document("fichas", b"png-bytes").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].fields[0].0, "Nome");
        assert_eq!(docs[0].fields[0].1.content.as_deref(), Some("Ana Souza"));
        assert_eq!(server.hits(), 3);

        let requests = server.requests.lock().unwrap();
        assert!(requests[0].starts_with("post /formrecognizer/documentmodels/fichas:analyze?api-version=2023-07-31"));
        assert!(requests[0].contains("ocp-apim-subscription-key: test-key"));
        assert!(requests[1].starts_with("get /formrecognizer/documentmodels/fichas/analyzeresults/op-1"));
        assert!(requests[1].contains("ocp-apim-subscription-key: test-key"));
    }

    #[tokio::test]
    async fn throttled_submit_and_poll_are_retried() {
        let server = FakeServer::start(|base| {
            vec![
                reply("429 Too Many Requests", &[("retry-after", "0")], ""),
                accepted(base),
                reply("503 Service Unavailable", &[], ""),
                succeeded(),
            ]
        })
        .await;
        let client = server.client(&fast_config());

        let docs = client.analyze_document("fichas", b"png-bytes").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(server.hits(), 4);
    }

    #[tokio::test]
    async fn transient_failure_gives_up_after_max_retries() {
        let server = FakeServer::start(|_| {
            vec![
                reply("500 Internal Server Error", &[], ""),
                reply("500 Internal Server Error", &[], ""),
                reply("500 Internal Server Error", &[], ""),
            ]
        })
        .await;
        let config = ExtractionConfig::builder()
            .model_id("fichas")
            .max_retries(1)
            .retry_backoff_ms(1)
            .build()
            .unwrap();
        let client = server.client(&config);

        let fault = client.analyze_document("fichas", b"x").await.unwrap_err();
        assert_eq!(fault, ServiceFault::Other { detail: "HTTP 500".into() });
        assert_eq!(server.hits(), 2);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let server = FakeServer::start(|_| {
            vec![
                reply(
                    "401 Unauthorized",
                    &[("content-type", "application/json")],
                    r#"{"error":{"code":"401","message":"Access denied due to invalid subscription key."}}"#,
                ),
                reply("202 Accepted", &[], ""),
            ]
        })
        .await;
        let client = server.client(&fast_config());

        let fault = client.analyze_document("fichas", b"x").await.unwrap_err();
        assert!(fault.to_string().contains("HTTP 401"));
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn submit_404_is_model_not_found() {
        let server = FakeServer::start(|_| {
            vec![reply(
                "404 Not Found",
                &[("content-type", "application/json")],
                r#"{"error":{"code":"NotFound","message":"Resource not found."}}"#,
            )]
        })
        .await;
        let client = server.client(&fast_config());

        let fault = client.analyze_document("fichas-v9", b"x").await.unwrap_err();
        assert_eq!(fault, ServiceFault::ModelNotFound { model_id: "fichas-v9".into() });
    }

    #[tokio::test]
    async fn accepted_without_operation_location_is_a_fault() {
        let server = FakeServer::start(|_| vec![reply("202 Accepted", &[], "")]).await;
        let client = server.client(&fast_config());

        let fault = client.analyze_document("fichas", b"x").await.unwrap_err();
        assert!(fault.to_string().contains("Operation-Location"));
    }

    #[tokio::test]
    async fn polling_stops_after_max_attempts() {
        let server = FakeServer::start(|base| vec![accepted(base), running(), running(), succeeded()]).await;
        let config = ExtractionConfig::builder()
            .model_id("fichas")
            .poll_interval_ms(1)
            .max_poll_attempts(2)
            .build()
            .unwrap();
        let client = server.client(&config);

        let fault = client.analyze_document("fichas", b"x").await.unwrap_err();
        assert!(fault.to_string().contains("did not finish after 2 polls"));
        assert_eq!(server.hits(), 3);
    }

    #[test]
    fn transient_statuses() {
        for status in [408, 429, 500, 502, 503, 504] {
            assert!(is_transient(status), "{status}");
        }
        for status in [200, 202, 400, 401, 403, 404] {
            assert!(!is_transient(status), "{status}");
        }
    }
}
