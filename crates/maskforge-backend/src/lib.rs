#![warn(missing_docs)]
//! # maskforge-backend
//!
//! ## Purpose
//! Sends assembled generation requests to a remote generative backend and
//! classifies transport-level failures.
//!
//! ## Responsibilities
//! - Build the ordered content sequence: instruction, user text, images.
//! - Validate backend endpoints (HTTPS, loopback excepted).
//! - Execute calls through the injectable [`GenerationBackend`] trait.
//! - Map HTTP statuses and transport failures onto [`BackendError`].
//!
//! ## Data flow
//! Orchestrator -> [`GenerationRequest`] -> [`GenerationBackend::generate`] ->
//! raw JSON handed to `maskforge-contract` for decoding.
//!
//! ## Ownership and lifetimes
//! Requests own their image bytes; transports borrow them only while
//! serializing the outbound body.
//!
//! ## Error model
//! [`BackendError`] keeps quota, model availability, timeouts and generic
//! transport failures apart; [`BackendError::kind`] projects them onto the
//! shared [`ErrorKind`] taxonomy. Nothing here retries.
//!
//! ## Security and privacy notes
//! The API key travels in a request header, never in the URL, so transport
//! error messages cannot echo it. Request bodies are never logged.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use maskforge_core::{BinaryImage, ContentPart, ErrorKind};
use reqwest::StatusCode;
use reqwest::blocking::Client as HttpClient;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Default Gemini REST base.
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";

/// Header carrying the Gemini API key.
pub const GEMINI_KEY_HEADER: &str = "x-goog-api-key";

/// Longest upstream error body kept in [`BackendError::Http`].
pub const MAX_ERROR_BODY_CHARS: usize = 512;

/// One generation call: instruction, user text, then images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Model-level safety instruction, sent first.
    pub instruction: String,
    /// User-supplied prompt or question.
    pub user_text: String,
    /// Inline images, in submission order.
    pub images: Vec<BinaryImage>,
}

impl GenerationRequest {
    /// Creates a request.
    pub fn new(
        instruction: impl Into<String>,
        user_text: impl Into<String>,
        images: Vec<BinaryImage>,
    ) -> Self {
        Self {
            instruction: instruction.into(),
            user_text: user_text.into(),
            images,
        }
    }

    /// Ordered content sequence sent to the backend.
    ///
    /// Blank text entries are skipped; images keep their order.
    pub fn parts(&self) -> Vec<ContentPart> {
        let mut parts = Vec::with_capacity(self.images.len() + 2);
        for text in [&self.instruction, &self.user_text] {
            if !text.trim().is_empty() {
                parts.push(ContentPart::Text(text.clone()));
            }
        }
        parts.extend(self.images.iter().cloned().map(ContentPart::InlineImage));
        parts
    }
}

/// Abstract generation transport.
pub trait GenerationBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Sends `request` for `model` and returns the raw JSON reply.
    ///
    /// # Errors
    /// Returns [`BackendError`] for non-success statuses, timeouts, transport
    /// failures and non-JSON bodies.
    fn generate(&self, model: &str, request: &GenerationRequest) -> Result<Value, BackendError>;
}

/// Gemini `generateContent` REST transport.
#[derive(Clone)]
pub struct GeminiBackend {
    api_base: Url,
    api_key: String,
    http: HttpClient,
}

impl std::fmt::Debug for GeminiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiBackend")
            .field("api_base", &self.api_base.as_str())
            .field("api_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl GeminiBackend {
    /// Creates a validated Gemini transport with a per-request timeout.
    ///
    /// # Errors
    /// Returns [`BackendError::Config`] for a blank key, an invalid base URL
    /// or an HTTP client that cannot be built.
    pub fn new(
        api_base: &str,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(BackendError::Config("gemini api key is empty".to_string()));
        }

        Ok(Self {
            api_base: validate_endpoint(api_base)?,
            api_key,
            http: build_http_client(timeout)?,
        })
    }

    /// Full `generateContent` URL for `model`.
    ///
    /// # Errors
    /// Returns [`BackendError::Config`] when the joined URL is invalid.
    pub fn endpoint_for_model(&self, model: &str) -> Result<Url, BackendError> {
        let trimmed = model.trim();
        let model_path = trimmed.strip_prefix("models/").unwrap_or(trimmed);
        let base = self.api_base.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/v1beta/models/{model_path}:generateContent"))
            .map_err(|error| BackendError::Config(format!("invalid model endpoint: {error}")))
    }
}

/// Builds the `generateContent` JSON body for `request`.
pub fn gemini_request_body(request: &GenerationRequest) -> Value {
    let parts: Vec<Value> = request
        .parts()
        .into_iter()
        .map(|part| match part {
            ContentPart::Text(text) => json!({ "text": text }),
            ContentPart::InlineImage(image) => json!({
                "inline_data": {
                    "mime_type": image.mime_type,
                    "data": BASE64.encode(&image.bytes),
                }
            }),
        })
        .collect();

    json!({ "contents": [{ "role": "user", "parts": parts }] })
}

impl GenerationBackend for GeminiBackend {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn generate(&self, model: &str, request: &GenerationRequest) -> Result<Value, BackendError> {
        let endpoint = self.endpoint_for_model(model)?;
        debug!(
            stage = "backend",
            action = "gemini_request",
            model,
            images = request.images.len(),
            prompt_chars = request.user_text.chars().count(),
        );

        let response = self
            .http
            .post(endpoint)
            .header(GEMINI_KEY_HEADER, &self.api_key)
            .json(&gemini_request_body(request))
            .send()
            .map_err(classify_transport_error)?;

        read_json_response(response)
    }
}

/// Workflow-webhook transport posting `{prompt, instruction, images[]}`.
#[derive(Debug, Clone)]
pub struct WebhookBackend {
    url: Url,
    http: HttpClient,
}

impl WebhookBackend {
    /// Creates a validated webhook transport.
    ///
    /// # Errors
    /// Returns [`BackendError::Config`] for an invalid or non-HTTPS URL.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, BackendError> {
        Ok(Self {
            url: validate_endpoint(url)?,
            http: build_http_client(timeout)?,
        })
    }
}

/// Builds the webhook JSON body for `request`.
pub fn webhook_request_body(request: &GenerationRequest) -> Value {
    let images: Vec<Value> = request
        .images
        .iter()
        .map(|image| json!({ "mimeType": image.mime_type, "data": BASE64.encode(&image.bytes) }))
        .collect();

    json!({
        "prompt": request.user_text,
        "instruction": request.instruction,
        "images": images,
    })
}

impl GenerationBackend for WebhookBackend {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn generate(&self, _model: &str, request: &GenerationRequest) -> Result<Value, BackendError> {
        debug!(
            stage = "backend",
            action = "webhook_request",
            images = request.images.len(),
            prompt_chars = request.user_text.chars().count(),
        );

        let response = self
            .http
            .post(self.url.clone())
            .json(&webhook_request_body(request))
            .send()
            .map_err(classify_transport_error)?;

        let status = response.status();
        let body = response.text().map_err(classify_transport_error)?;
        check_status(status, &body)?;

        // Workflow runners may answer with plain text instead of JSON.
        Ok(serde_json::from_str(&body).unwrap_or_else(|_| json!({ "text": body })))
    }
}

fn build_http_client(timeout: Duration) -> Result<HttpClient, BackendError> {
    HttpClient::builder()
        .timeout(timeout)
        .build()
        .map_err(|error| BackendError::Config(format!("http client build failed: {error}")))
}

fn read_json_response(response: reqwest::blocking::Response) -> Result<Value, BackendError> {
    let status = response.status();
    let body = response.text().map_err(classify_transport_error)?;
    check_status(status, &body)?;
    serde_json::from_str(&body).map_err(|error| BackendError::InvalidBody(error.to_string()))
}

/// Maps a non-success status onto [`BackendError`]; success passes.
///
/// # Errors
/// 429 is [`BackendError::QuotaExceeded`], 404 and 503 are
/// [`BackendError::ModelUnavailable`], everything else is [`BackendError::Http`].
pub fn check_status(status: StatusCode, body: &str) -> Result<(), BackendError> {
    if status.is_success() {
        return Ok(());
    }

    warn!(stage = "backend", action = "upstream_status", status = status.as_u16());
    match status {
        StatusCode::TOO_MANY_REQUESTS => Err(BackendError::QuotaExceeded),
        StatusCode::NOT_FOUND | StatusCode::SERVICE_UNAVAILABLE => {
            Err(BackendError::ModelUnavailable { status: status.as_u16() })
        }
        _ => Err(BackendError::Http {
            status: status.as_u16(),
            body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
        }),
    }
}

fn classify_transport_error(error: reqwest::Error) -> BackendError {
    if error.is_timeout() {
        return BackendError::Timeout;
    }
    BackendError::Transport(error.without_url().to_string())
}

/// Validates a backend endpoint: HTTPS, or plain HTTP on a loopback host.
///
/// # Errors
/// Returns [`BackendError::Config`] for unparsable URLs, unsupported schemes
/// and non-loopback plain HTTP.
pub fn validate_endpoint(endpoint: &str) -> Result<Url, BackendError> {
    let parsed = Url::parse(endpoint)
        .map_err(|error| BackendError::Config(format!("invalid backend url: {error}")))?;

    match parsed.scheme() {
        "https" => Ok(parsed),
        "http" if is_loopback(&parsed) => Ok(parsed),
        "http" => Err(BackendError::Config(
            "backend endpoint must use https unless it is a loopback host".to_string(),
        )),
        other => Err(BackendError::Config(format!("unsupported backend scheme `{other}`"))),
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(address)) => address.is_loopback(),
        Some(url::Host::Ipv6(address)) => address.is_loopback(),
        None => false,
    }
}

/// Backend transport errors.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Upstream rejected the call for quota or rate reasons (HTTP 429).
    #[error("upstream quota exceeded")]
    QuotaExceeded,
    /// Model missing or overloaded (HTTP 404 or 503).
    #[error("upstream model unavailable (status {status})")]
    ModelUnavailable {
        /// Upstream status.
        status: u16,
    },
    /// Call exceeded the configured timeout.
    #[error("upstream call timed out")]
    Timeout,
    /// Any other non-success status.
    #[error("upstream returned status {status}: {body}")]
    Http {
        /// Upstream status.
        status: u16,
        /// Truncated upstream body.
        body: String,
    },
    /// Connection-level failure.
    #[error("transport failure: {0}")]
    Transport(String),
    /// Success status with a body that is not JSON.
    #[error("upstream body is not valid json: {0}")]
    InvalidBody(String),
    /// Transport could not be configured.
    #[error("backend configuration error: {0}")]
    Config(String),
}

impl BackendError {
    /// Projects this error onto the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::QuotaExceeded => ErrorKind::QuotaExceeded,
            Self::ModelUnavailable { .. } => ErrorKind::ModelUnavailable,
            Self::InvalidBody(_) => ErrorKind::MalformedUpstreamResponse,
            Self::Timeout | Self::Http { .. } | Self::Transport(_) | Self::Config(_) => {
                ErrorKind::Transport
            }
        }
    }

    /// Returns `true` for [`BackendError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}
