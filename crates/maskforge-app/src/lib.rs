#![warn(missing_docs)]
//! # maskforge-app
//!
//! ## Purpose
//! Server side of `maskforge`: configuration, request orchestration, upload
//! lifecycle, audit trail and the framework-independent route handlers behind
//! the HTTP binary.
//!
//! ## Responsibilities
//! - Load and validate [`ServerConfig`] once at startup.
//! - Run the keyword prefilter before any upload is written or any backend
//!   call is made.
//! - Persist uploads for exactly one request ([`UploadScope`]).
//! - Assemble, send and decode generation calls ([`RequestOrchestrator`]).
//! - Append best-effort audit records ([`AuditSink`]).
//! - Map every outcome onto one HTTP status and camelCase body.
//!
//! ## Data flow
//! HTTP layer -> `handle_*` -> field checks -> safety gate -> size limits ->
//! [`UploadScope::persist`] -> mask validation -> [`RequestOrchestrator::invoke`]
//! -> [`RouteResponse`]; the scope is released on every exit path.
//!
//! ## Ownership and lifetimes
//! [`ServerContext`] is shared read-only behind `Arc`; everything mutable is
//! owned by a single request. Collaborators are injected trait objects so
//! tests substitute fakes.
//!
//! ## Error model
//! Startup problems are [`AppError`]s. Per-request problems never escape a
//! handler: they become [`RouteResponse`]s via the shared [`ErrorKind`]
//! taxonomy.
//!
//! ## Security and privacy notes
//! - Logs carry prompt lengths, never prompt text, image bytes or keys.
//! - [`redact_sensitive`] scrubs key material from upstream error text.
//! - The matched blocklist token is only disclosed outside production.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write as _};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use maskforge_backend::{
    BackendError, DEFAULT_GEMINI_API_BASE, GeminiBackend, GenerationBackend, GenerationRequest,
    WebhookBackend, validate_endpoint,
};
use maskforge_canvas::{CanvasError, SurfaceSize, composite};
use maskforge_contract::{AnswerReply, ErrorReply, ImageReply, decode_answer, decode_response};
use maskforge_core::{
    BinaryImage, Bitmap, CoreError, EditRequest, ErrorKind, GenerationResult, Rgba,
};
use maskforge_identity::{
    CallerIdentity, HeaderIdentityProvider, IdentityProvider, resolve_or_anonymous,
};
use maskforge_mask::{MaskError, MaskKind, build_expansion, derive_mask, validate_mask_pairing};
use maskforge_safety::SafetyPolicy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Build-time application version loaded from root `VERSION` file.
pub const APP_VERSION: &str = env!("MASKFORGE_VERSION");

/// Default listening port.
pub const DEFAULT_PORT: u16 = 5000;

/// Default image-producing model.
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image-preview";

/// Default question-answering model.
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";

/// Default backend call timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Default per-file upload limit (20 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Route labels used in logs and audit records.
pub mod routes {
    /// Prompt-only generation.
    pub const GENERATE: &str = "/api/generate-image";
    /// Masked edit.
    pub const EDIT: &str = "/api/edit-image";
    /// Multi-image merge.
    pub const COMBINE: &str = "/api/combine-images";
    /// Image question answering.
    pub const UNDERSTAND: &str = "/api/understand-image";
}

/// Returns the app version sourced from root `VERSION`.
pub fn app_version() -> &'static str {
    APP_VERSION
}

/// Which transport serves generation calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendChoice {
    /// Gemini `generateContent`.
    Gemini,
    /// Workflow webhook.
    Webhook,
}

/// Validated server configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Listen address.
    pub bind: IpAddr,
    /// Listen port.
    pub port: u16,
    /// Selected transport.
    pub backend: BackendChoice,
    /// Gemini API key.
    pub gemini_api_key: Option<String>,
    /// Webhook URL.
    pub webhook_url: Option<String>,
    /// Gemini REST base.
    pub api_base: String,
    /// Model for image-producing routes.
    pub image_model: String,
    /// Model for the understanding route.
    pub text_model: String,
    /// Backend call timeout.
    pub timeout: Duration,
    /// Directory for transient uploads.
    pub upload_dir: PathBuf,
    /// JSON-lines audit file, if any.
    pub audit_log: Option<PathBuf>,
    /// Production mode hides diagnostic details.
    pub production: bool,
    /// Operator-supplied banned substrings.
    pub extra_blocklist: Vec<String>,
    /// Per-file upload limit in bytes.
    pub max_upload_bytes: usize,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind", &self.bind)
            .field("port", &self.port)
            .field("backend", &self.backend)
            .field("gemini_api_key", &self.gemini_api_key.as_ref().map(|_| "<redacted>"))
            .field("webhook_url", &self.webhook_url)
            .field("api_base", &self.api_base)
            .field("image_model", &self.image_model)
            .field("text_model", &self.text_model)
            .field("timeout", &self.timeout)
            .field("upload_dir", &self.upload_dir)
            .field("audit_log", &self.audit_log)
            .field("production", &self.production)
            .field("extra_blocklist", &self.extra_blocklist.len())
            .field("max_upload_bytes", &self.max_upload_bytes)
            .finish()
    }
}

impl ServerConfig {
    /// Reads configuration from the process environment.
    ///
    /// # Errors
    /// Returns [`AppError::Config`] for missing or invalid values.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads configuration through `lookup`; blank values count as unset.
    ///
    /// # Errors
    /// Returns [`AppError::Config`] for missing or invalid values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let get = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let bind = match get("MASKFORGE_BIND") {
            Some(raw) => raw.parse().map_err(|_| {
                AppError::Config(format!("MASKFORGE_BIND `{raw}` is not an IP address"))
            })?,
            None => IpAddr::from([0, 0, 0, 0]),
        };
        let port = parse_or("PORT", get("PORT"), DEFAULT_PORT)?;

        let backend = match get("MASKFORGE_BACKEND")
            .map(|raw| raw.to_ascii_lowercase())
            .as_deref()
        {
            None | Some("gemini") => BackendChoice::Gemini,
            Some("webhook") => BackendChoice::Webhook,
            Some(other) => {
                return Err(AppError::Config(format!(
                    "MASKFORGE_BACKEND must be `gemini` or `webhook`, got `{other}`"
                )));
            }
        };

        let gemini_api_key = get("GEMINI_API_KEY");
        let webhook_url = get("MASKFORGE_WEBHOOK_URL");
        match backend {
            BackendChoice::Gemini if gemini_api_key.is_none() => {
                return Err(AppError::Config(
                    "GEMINI_API_KEY is required for the gemini backend".to_string(),
                ));
            }
            BackendChoice::Webhook => {
                let url = webhook_url.as_deref().ok_or_else(|| {
                    AppError::Config(
                        "MASKFORGE_WEBHOOK_URL is required for the webhook backend".to_string(),
                    )
                })?;
                validate_endpoint(url)?;
            }
            BackendChoice::Gemini => {}
        }

        let api_base =
            get("MASKFORGE_API_BASE").unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string());
        validate_endpoint(&api_base)?;

        let timeout_secs: u64 = parse_or(
            "MASKFORGE_TIMEOUT_SECS",
            get("MASKFORGE_TIMEOUT_SECS"),
            DEFAULT_TIMEOUT_SECS,
        )?;
        if timeout_secs == 0 {
            return Err(AppError::Config("MASKFORGE_TIMEOUT_SECS must be positive".to_string()));
        }
        let max_upload_bytes: usize = parse_or(
            "MASKFORGE_MAX_UPLOAD_BYTES",
            get("MASKFORGE_MAX_UPLOAD_BYTES"),
            DEFAULT_MAX_UPLOAD_BYTES,
        )?;
        if max_upload_bytes == 0 {
            return Err(AppError::Config("MASKFORGE_MAX_UPLOAD_BYTES must be positive".to_string()));
        }

        Ok(Self {
            bind,
            port,
            backend,
            gemini_api_key,
            webhook_url,
            api_base,
            image_model: get("MASKFORGE_IMAGE_MODEL")
                .unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string()),
            text_model: get("MASKFORGE_TEXT_MODEL")
                .unwrap_or_else(|| DEFAULT_TEXT_MODEL.to_string()),
            timeout: Duration::from_secs(timeout_secs),
            upload_dir: get("MASKFORGE_UPLOAD_DIR")
                .map_or_else(|| PathBuf::from("uploads"), PathBuf::from),
            audit_log: get("MASKFORGE_AUDIT_LOG").map(PathBuf::from),
            production: get("MASKFORGE_ENV")
                .is_some_and(|env| env.eq_ignore_ascii_case("production")),
            extra_blocklist: get("MASKFORGE_EXTRA_BLOCKLIST")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|token| !token.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            max_upload_bytes,
        })
    }

    /// Listen socket address.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    /// Safety policy with operator tokens appended.
    pub fn safety_policy(&self) -> SafetyPolicy {
        let mut policy = SafetyPolicy::new(!self.production);
        policy.gate = policy.gate.with_extra_tokens(&self.extra_blocklist);
        policy
    }

    /// Builds the configured transport.
    ///
    /// Must run outside an async runtime: the transports use blocking HTTP.
    ///
    /// # Errors
    /// Returns [`AppError::Backend`] when the transport cannot be configured.
    pub fn build_backend(&self) -> Result<Arc<dyn GenerationBackend>, AppError> {
        match self.backend {
            BackendChoice::Gemini => {
                let key = self.gemini_api_key.clone().unwrap_or_default();
                Ok(Arc::new(GeminiBackend::new(&self.api_base, key, self.timeout)?))
            }
            BackendChoice::Webhook => {
                let url = self.webhook_url.as_deref().unwrap_or_default();
                Ok(Arc::new(WebhookBackend::new(url, self.timeout)?))
            }
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    name: &str,
    raw: Option<String>,
    default: T,
) -> Result<T, AppError> {
    match raw {
        Some(raw) => raw
            .parse()
            .map_err(|_| AppError::Config(format!("{name} `{raw}` is not a valid number"))),
        None => Ok(default),
    }
}

/// One audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// `name@domain` or `anonymous`.
    pub caller_identity: String,
    /// Route label.
    pub route: String,
    /// Submitted prompt or question.
    pub text: String,
    /// RFC 3339 UTC timestamp.
    pub timestamp: String,
}

impl AuditRecord {
    /// Record stamped with the current time.
    pub fn now(caller: &CallerIdentity, route: &str, text: &str) -> Self {
        Self {
            caller_identity: caller.qualified(),
            route: route.to_string(),
            text: text.to_string(),
            timestamp: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string()),
        }
    }
}

/// Append-only audit destination.
pub trait AuditSink: Send + Sync {
    /// Appends one record.
    ///
    /// # Errors
    /// Returns [`AppError`] when the record cannot be written.
    fn append(&self, record: &AuditRecord) -> Result<(), AppError>;
}

/// Sink that drops every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn append(&self, _record: &AuditRecord) -> Result<(), AppError> {
        Ok(())
    }
}

/// JSON-lines audit file; one `write_all` per record under a lock.
#[derive(Debug)]
pub struct JsonlAuditLog {
    file: Mutex<File>,
    path: PathBuf,
}

impl JsonlAuditLog {
    /// Opens `path` for appending, creating it and its parent as needed.
    ///
    /// # Errors
    /// Returns [`AppError::Io`] when the file cannot be opened.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            file: Mutex::new(file),
            path,
        })
    }

    /// Audit file location.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonlAuditLog {
    fn append(&self, record: &AuditRecord) -> Result<(), AppError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = self
            .file
            .lock()
            .map_err(|_| AppError::Audit("audit log lock poisoned".to_string()))?;
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }
}

/// Shared, read-only collaborators for every request.
#[derive(Clone)]
pub struct ServerContext {
    /// Generation transport.
    pub backend: Arc<dyn GenerationBackend>,
    /// Audit destination.
    pub audit: Arc<dyn AuditSink>,
    /// Caller resolution.
    pub identity: Arc<dyn IdentityProvider>,
    /// Keyword gate and model instruction.
    pub safety: SafetyPolicy,
    /// Directory for transient uploads.
    pub upload_dir: PathBuf,
    /// Model for image-producing routes.
    pub image_model: String,
    /// Model for the understanding route.
    pub text_model: String,
    /// Per-file upload limit in bytes.
    pub max_upload_bytes: usize,
}

impl ServerContext {
    /// Wires real collaborators from `config` and creates the upload dir.
    ///
    /// # Errors
    /// Returns [`AppError`] when the transport, audit file or upload directory
    /// cannot be set up.
    pub fn from_config(config: &ServerConfig) -> Result<Self, AppError> {
        fs::create_dir_all(&config.upload_dir)?;
        let audit: Arc<dyn AuditSink> = match &config.audit_log {
            Some(path) => Arc::new(JsonlAuditLog::open(path)?),
            None => Arc::new(NullAuditSink),
        };

        Ok(Self {
            backend: config.build_backend()?,
            audit,
            identity: Arc::new(HeaderIdentityProvider::default()),
            safety: config.safety_policy(),
            upload_dir: config.upload_dir.clone(),
            image_model: config.image_model.clone(),
            text_model: config.text_model.clone(),
            max_upload_bytes: config.max_upload_bytes,
        })
    }
}

/// Whether a call expects an image or an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Image-producing call; decoded image first, then prose.
    Image,
    /// Question answering; decoded as prose only.
    Answer,
}

/// Assembles, sends and decodes one generation call.
pub struct RequestOrchestrator<'a> {
    context: &'a ServerContext,
    caller: CallerIdentity,
    route: &'static str,
    kind: CallKind,
}

impl<'a> RequestOrchestrator<'a> {
    /// Orchestrator for one request.
    pub fn new(
        context: &'a ServerContext,
        caller: CallerIdentity,
        route: &'static str,
        kind: CallKind,
    ) -> Self {
        Self {
            context,
            caller,
            route,
            kind,
        }
    }

    /// Sends `[safety_instruction, user_text, images...]` and decodes the reply.
    ///
    /// Never retries. Writes an audit record whenever `user_text` is
    /// non-empty; audit failures are logged and otherwise ignored.
    pub fn invoke(
        &self,
        safety_instruction: &str,
        user_text: &str,
        images: Vec<BinaryImage>,
    ) -> GenerationResult {
        let request = GenerationRequest::new(safety_instruction, user_text, images);
        let model = match self.kind {
            CallKind::Image => &self.context.image_model,
            CallKind::Answer => &self.context.text_model,
        };

        info!(
            stage = "orchestrator",
            action = "invoke",
            route = self.route,
            backend = self.context.backend.name(),
            model = model.as_str(),
            images = request.images.len(),
            prompt_chars = user_text.chars().count(),
        );

        let result = match self.context.backend.generate(model, &request) {
            Ok(raw) => match self.kind {
                CallKind::Image => decode_response(&raw),
                CallKind::Answer => decode_answer(&raw),
            },
            Err(error) => {
                warn!(
                    stage = "orchestrator",
                    action = "backend_failed",
                    route = self.route,
                    kind = error.kind().as_str(),
                    detail = %redact_sensitive(&error.to_string()),
                );
                GenerationResult::error(error.kind(), redact_sensitive(&error.to_string()))
            }
        };

        if !user_text.trim().is_empty() {
            self.audit(user_text);
        }

        debug!(
            stage = "orchestrator",
            action = "decoded",
            route = self.route,
            outcome = outcome_label(&result)
        );
        result
    }

    fn audit(&self, user_text: &str) {
        let record = AuditRecord::now(&self.caller, self.route, user_text);
        if let Err(error) = self.context.audit.append(&record) {
            warn!(stage = "audit", action = "append_failed", route = self.route, error = %error);
        }
    }
}

fn outcome_label(result: &GenerationResult) -> &'static str {
    match result {
        GenerationResult::Image { .. } => "image",
        GenerationResult::Text { .. } => "text",
        GenerationResult::Error { kind, .. } => kind.as_str(),
    }
}

/// Collision-resistant upload file name: `<uuid>-<sanitized original>`.
pub fn unique_upload_name(original: &str) -> String {
    format!("{}-{}", Uuid::new_v4(), sanitize_filename(original))
}

fn sanitize_filename(original: &str) -> String {
    let base = original.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .take(64)
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

/// One transient file, removed at most once.
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    released: bool,
}

impl TempArtifact {
    /// File location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the file back.
    ///
    /// # Errors
    /// Returns [`AppError::Io`] when the file cannot be read.
    pub fn read(&self) -> Result<Vec<u8>, AppError> {
        Ok(fs::read(&self.path)?)
    }

    /// Deletes the file. Repeated calls and already-missing files are fine.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(stage = "lifecycle", action = "released", path = %self.path.display()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => warn!(
                stage = "lifecycle",
                action = "release_failed",
                path = %self.path.display(),
                error = %error,
            ),
        }
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        self.release();
    }
}

/// Uploads persisted for one request; all are released when the scope ends.
#[derive(Debug)]
pub struct UploadScope {
    dir: PathBuf,
    artifacts: Vec<TempArtifact>,
}

impl UploadScope {
    /// Scope writing into `dir`, created if missing.
    ///
    /// # Errors
    /// Returns [`AppError::Io`] when the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, AppError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            artifacts: Vec::new(),
        })
    }

    /// Writes `bytes` under a unique name and tracks the file.
    ///
    /// A partially written file is still tracked and released.
    ///
    /// # Errors
    /// Returns [`AppError::Io`] when the write fails.
    pub fn persist(
        &mut self,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<&TempArtifact, AppError> {
        let path = self.dir.join(unique_upload_name(original_name));
        self.artifacts.push(TempArtifact {
            path,
            released: false,
        });
        let index = self.artifacts.len() - 1;
        fs::write(self.artifacts[index].path(), bytes)?;
        Ok(&self.artifacts[index])
    }

    /// Tracked files.
    pub fn artifacts(&self) -> &[TempArtifact] {
        &self.artifacts
    }

    /// Releases every tracked file. Safe to call more than once.
    pub fn release(&mut self) {
        for artifact in &mut self.artifacts {
            artifact.release();
        }
    }
}

impl Drop for UploadScope {
    fn drop(&mut self) {
        self.release();
    }
}

/// One uploaded multipart file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Form field name.
    pub field: String,
    /// Client-supplied filename.
    pub filename: String,
    /// Client-declared media type.
    pub content_type: Option<String>,
    /// File contents.
    pub bytes: Vec<u8>,
}

/// Parsed multipart body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipartInput {
    /// Text fields in arrival order.
    pub fields: Vec<(String, String)>,
    /// File fields in arrival order.
    pub files: Vec<UploadedFile>,
}

impl MultipartInput {
    /// First non-blank text field named `name`.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, value)| field == name && !value.trim().is_empty())
            .map(|(_, value)| value.as_str())
    }

    /// First file field named `name`.
    pub fn file(&self, name: &str) -> Option<&UploadedFile> {
        self.files.iter().find(|file| file.field == name)
    }
}

/// Handler output: status plus JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteResponse {
    /// HTTP status.
    pub status: u16,
    /// JSON body.
    pub body: Value,
}

impl RouteResponse {
    fn json(status: u16, body: impl Serialize) -> Self {
        Self {
            status,
            body: serde_json::to_value(body).unwrap_or(Value::Null),
        }
    }

    /// 400 with a message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::json(status_for(ErrorKind::Validation), ErrorReply::message(message))
    }

    /// 500 for failures outside the taxonomy (disk, join errors).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::json(500, ErrorReply::message(message))
    }
}

/// HTTP status for each failure kind.
pub fn status_for(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::Validation | ErrorKind::SafetyRejection => 400,
        ErrorKind::QuotaExceeded => 429,
        ErrorKind::ModelUnavailable => 404,
        ErrorKind::MalformedUpstreamResponse => 502,
        ErrorKind::Transport => 500,
    }
}

/// User-facing message for each upstream failure kind.
pub fn user_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Validation => {
            "The request is missing required fields or contains invalid images."
        }
        ErrorKind::SafetyRejection => maskforge_safety::SAFETY_REJECTION_MESSAGE,
        ErrorKind::QuotaExceeded => {
            "You have exceeded your API request quota. Please check your plan and billing details, or try again later."
        }
        ErrorKind::ModelUnavailable => {
            "The specified model is not available. Please check the model name."
        }
        ErrorKind::MalformedUpstreamResponse => "Could not parse the AI response.",
        ErrorKind::Transport => "An unexpected error occurred while communicating with the AI.",
    }
}

/// Message for a text reply on an image-producing route.
pub const NO_IMAGE_MESSAGE: &str = "AI response did not contain an image.";

fn image_route_response(result: GenerationResult) -> RouteResponse {
    match result {
        GenerationResult::Image { locator } => {
            RouteResponse::json(200, ImageReply { image_url: locator })
        }
        GenerationResult::Text { explanation } => RouteResponse::json(
            422,
            ErrorReply {
                message: NO_IMAGE_MESSAGE.to_string(),
                matched_token: None,
                ai_response: Some(explanation),
            },
        ),
        GenerationResult::Error { kind, .. } => {
            RouteResponse::json(status_for(kind), ErrorReply::message(user_message(kind)))
        }
    }
}

fn answer_route_response(result: GenerationResult) -> RouteResponse {
    match result {
        GenerationResult::Text { explanation } => {
            RouteResponse::json(200, AnswerReply { answer: explanation })
        }
        GenerationResult::Image { .. } => {
            let kind = ErrorKind::MalformedUpstreamResponse;
            RouteResponse::json(status_for(kind), ErrorReply::message(user_message(kind)))
        }
        GenerationResult::Error { kind, .. } => {
            RouteResponse::json(status_for(kind), ErrorReply::message(user_message(kind)))
        }
    }
}

/// Runs the keyword gate; `Some` is the rejection to return as-is.
fn safety_rejection(context: &ServerContext, route: &str, text: &str) -> Option<RouteResponse> {
    let verdict = context.safety.check(text);
    let rejection = context.safety.rejection(&verdict)?;
    warn!(
        stage = "safety",
        action = "blocked",
        route,
        category = verdict
            .matched_token
            .as_deref()
            .and_then(|token| context.safety.gate.category_of(token))
            .unwrap_or("unknown"),
    );
    Some(RouteResponse::json(
        status_for(ErrorKind::SafetyRejection),
        ErrorReply {
            message: rejection.message,
            matched_token: rejection.matched_token,
            ai_response: None,
        },
    ))
}

fn check_sizes<'f>(
    context: &ServerContext,
    files: impl IntoIterator<Item = &'f UploadedFile>,
) -> Result<(), RouteResponse> {
    for file in files {
        if file.bytes.is_empty() {
            return Err(RouteResponse::validation(format!(
                "Uploaded file `{}` is empty.",
                file.field
            )));
        }
        if file.bytes.len() > context.max_upload_bytes {
            return Err(RouteResponse::validation(format!(
                "Uploaded file `{}` exceeds the {} byte limit.",
                file.field, context.max_upload_bytes
            )));
        }
    }
    Ok(())
}

/// Persists `file` and reads it back as a typed image.
fn persist_image(
    scope: &mut UploadScope,
    file: &UploadedFile,
) -> Result<BinaryImage, RouteResponse> {
    let artifact = scope.persist(&file.filename, &file.bytes).map_err(|error| {
        warn!(stage = "lifecycle", action = "persist_failed", error = %error);
        RouteResponse::internal("Could not store the uploaded file.")
    })?;
    let bytes = artifact.read().map_err(|error| {
        warn!(stage = "lifecycle", action = "read_back_failed", error = %error);
        RouteResponse::internal("Could not read the uploaded file.")
    })?;

    BinaryImage::sniffed(bytes).map_err(|_| {
        RouteResponse::validation(format!(
            "Uploaded file `{}` is not a PNG, JPEG or WebP image.",
            file.field
        ))
    })
}

fn open_scope(context: &ServerContext) -> Result<UploadScope, RouteResponse> {
    UploadScope::new(&context.upload_dir).map_err(|error| {
        warn!(stage = "lifecycle", action = "scope_failed", error = %error);
        RouteResponse::internal("Upload storage is unavailable.")
    })
}

fn caller(context: &ServerContext, headers: &[(String, String)]) -> CallerIdentity {
    resolve_or_anonymous(context.identity.as_ref(), headers)
}

/// `POST /api/generate-image`.
pub fn handle_generate(
    context: &ServerContext,
    headers: &[(String, String)],
    prompt: Option<&str>,
) -> RouteResponse {
    let Some(prompt) = prompt.map(str::trim).filter(|prompt| !prompt.is_empty()) else {
        return RouteResponse::validation("Prompt is required");
    };
    if let Some(rejection) = safety_rejection(context, routes::GENERATE, prompt) {
        return rejection;
    }

    let orchestrator = RequestOrchestrator::new(
        context,
        caller(context, headers),
        routes::GENERATE,
        CallKind::Image,
    );
    image_route_response(orchestrator.invoke(&context.safety.instruction, prompt, Vec::new()))
}

/// Instruction suffix describing the mask that follows the source image.
pub fn mask_hint(kind: MaskKind) -> &'static str {
    match kind {
        MaskKind::Edit => {
            "The first image is the source. The second image is a mask: change only the white region \
and keep every black pixel unchanged."
        }
        MaskKind::Preserve => {
            "The first image is the source on an enlarged canvas. The second image is a mask: keep the \
transparent region unchanged and fill the opaque region so it extends the scene seamlessly."
        }
    }
}

/// `POST /api/edit-image`.
pub fn handle_edit(
    context: &ServerContext,
    headers: &[(String, String)],
    input: &MultipartInput,
) -> RouteResponse {
    let Some(prompt) = input.text("prompt").map(str::trim) else {
        return RouteResponse::validation("Prompt is required");
    };
    let (Some(image), Some(mask)) = (input.file("image"), input.file("mask")) else {
        return RouteResponse::validation("Both `image` and `mask` files are required");
    };
    let kind = match input.text("maskKind").unwrap_or_default().parse::<MaskKind>() {
        Ok(kind) => kind,
        Err(error) => return RouteResponse::validation(error.to_string()),
    };
    if let Some(rejection) = safety_rejection(context, routes::EDIT, prompt) {
        return rejection;
    }
    if let Err(response) = check_sizes(context, [image, mask]) {
        return response;
    }

    let mut scope = match open_scope(context) {
        Ok(scope) => scope,
        Err(response) => return response,
    };
    let source_image = match persist_image(&mut scope, image) {
        Ok(part) => part,
        Err(response) => return response,
    };
    let mask_image = match persist_image(&mut scope, mask) {
        Ok(part) => part,
        Err(response) => return response,
    };

    if let Err(error) = validate_mask_pairing(&source_image.bytes, &mask_image.bytes, kind) {
        debug!(stage = "mask", action = "rejected", error = %error);
        return RouteResponse::validation(mask_error_message(&error));
    }

    let (prompt_text, images) = EditRequest {
        prompt_text: prompt.to_string(),
        source_image,
        mask: mask_image,
        auxiliary_images: Vec::new(),
    }
    .into_parts();
    let instruction = format!("{}\n\n{}", context.safety.instruction, mask_hint(kind));

    let orchestrator =
        RequestOrchestrator::new(context, caller(context, headers), routes::EDIT, CallKind::Image);
    let response = image_route_response(orchestrator.invoke(&instruction, &prompt_text, images));
    scope.release();
    response
}

fn mask_error_message(error: &MaskError) -> String {
    match error {
        MaskError::DimensionMismatch { expected, actual } => format!(
            "Mask is {}x{} but the image is {}x{}; they must match.",
            actual.0, actual.1, expected.0, expected.1
        ),
        MaskError::NotBinary { .. } => {
            "Edit mask must contain only opaque black and white pixels.".to_string()
        }
        MaskError::PartialAlpha { .. } => {
            "Preserve mask must contain only fully opaque or fully transparent pixels.".to_string()
        }
        _ => "Image and mask must be valid PNG, JPEG or WebP files.".to_string(),
    }
}

/// `POST /api/combine-images`: `image1..imageN`, sent in index order.
pub fn handle_combine(
    context: &ServerContext,
    headers: &[(String, String)],
    input: &MultipartInput,
) -> RouteResponse {
    let Some(prompt) = input.text("prompt").map(str::trim) else {
        return RouteResponse::validation("Prompt is required");
    };

    let mut numbered: Vec<(u32, &UploadedFile)> = input
        .files
        .iter()
        .filter_map(|file| {
            let index = file.field.strip_prefix("image")?.parse::<u32>().ok()?;
            Some((index, file))
        })
        .collect();
    numbered.sort_by_key(|(index, _)| *index);
    numbered.dedup_by_key(|(index, _)| *index);
    if numbered.len() < 2 {
        return RouteResponse::validation(
            "At least two images (`image1`, `image2`, ...) are required",
        );
    }

    if let Some(rejection) = safety_rejection(context, routes::COMBINE, prompt) {
        return rejection;
    }
    if let Err(response) = check_sizes(context, numbered.iter().map(|(_, file)| *file)) {
        return response;
    }

    let mut scope = match open_scope(context) {
        Ok(scope) => scope,
        Err(response) => return response,
    };
    let mut images = Vec::with_capacity(numbered.len());
    for (_, file) in &numbered {
        match persist_image(&mut scope, file) {
            Ok(part) => images.push(part),
            Err(response) => return response,
        }
    }

    let orchestrator = RequestOrchestrator::new(
        context,
        caller(context, headers),
        routes::COMBINE,
        CallKind::Image,
    );
    let response =
        image_route_response(orchestrator.invoke(&context.safety.instruction, prompt, images));
    scope.release();
    response
}

/// `POST /api/understand-image`.
pub fn handle_understand(
    context: &ServerContext,
    headers: &[(String, String)],
    input: &MultipartInput,
) -> RouteResponse {
    let Some(question) = input.text("question").map(str::trim) else {
        return RouteResponse::validation("Question is required");
    };
    let Some(image) = input.file("image") else {
        return RouteResponse::validation("An `image` file is required");
    };
    if let Some(rejection) = safety_rejection(context, routes::UNDERSTAND, question) {
        return rejection;
    }
    if let Err(response) = check_sizes(context, [image]) {
        return response;
    }

    let mut scope = match open_scope(context) {
        Ok(scope) => scope,
        Err(response) => return response,
    };
    let part = match persist_image(&mut scope, image) {
        Ok(part) => part,
        Err(response) => return response,
    };

    let orchestrator = RequestOrchestrator::new(
        context,
        caller(context, headers),
        routes::UNDERSTAND,
        CallKind::Answer,
    );
    let response = answer_route_response(orchestrator.invoke(
        &context.safety.instruction,
        question,
        vec![part],
    ));
    scope.release();
    response
}

/// Writes the edit mask of `annotated` against `original` to `out`.
///
/// Returns the number of edited pixels.
///
/// # Errors
/// Returns [`AppError`] for unreadable inputs, size mismatch or write failure.
pub fn derive_mask_files(original: &Path, annotated: &Path, out: &Path) -> Result<usize, AppError> {
    let original = Bitmap::decode(&fs::read(original)?)?;
    let annotated = Bitmap::decode(&fs::read(annotated)?)?;
    let mask = derive_mask(&original, &annotated)?;
    fs::write(out, mask.as_bitmap().to_png()?)?;
    Ok(mask.edited_pixel_count())
}

/// Writes the 2x expanded canvas and its preserve mask.
///
/// Returns the expanded `(width, height)`.
///
/// # Errors
/// Returns [`AppError`] for unreadable input or write failure.
pub fn expand_file(
    image: &Path,
    out_image: &Path,
    out_mask: &Path,
) -> Result<(u32, u32), AppError> {
    let source = Bitmap::decode(&fs::read(image)?)?;
    let expansion = build_expansion(&source)?;
    fs::write(out_image, expansion.expanded_image.to_png()?)?;
    fs::write(out_mask, expansion.preserve_mask.as_bitmap().to_png()?)?;
    Ok(expansion.expanded_image.dimensions())
}

/// Writes `image` letterboxed onto a white `width x height` surface.
///
/// # Errors
/// Returns [`AppError`] for unreadable input, empty surface or write failure.
pub fn letterbox_file(image: &Path, width: u32, height: u32, out: &Path) -> Result<(), AppError> {
    let source = Bitmap::decode(&fs::read(image)?)?;
    let (bitmap, _) = composite(&source, SurfaceSize::new(width, height)?, Rgba::OPAQUE_WHITE)?;
    fs::write(out, bitmap.to_png()?)?;
    Ok(())
}

const SENSITIVE_KEYS: [&str; 5] = ["bearer", "authorization", "password", "token", "key"];

/// Redacts values following common secret markers (`key=`, `token:`,
/// `Bearer ...`) in log-safe output.
pub fn redact_sensitive(input: &str) -> String {
    let mut redacted = input.to_string();
    for key in SENSITIVE_KEYS {
        redacted = redact_key_value(&redacted, key);
    }
    redacted
}

fn redact_key_value(input: &str, key: &str) -> String {
    const PLACEHOLDER: &str = "<redacted>";
    let lower = input.to_ascii_lowercase();
    let mut output = String::with_capacity(input.len());
    let mut cursor = 0;

    while let Some(found) = lower[cursor..].find(key) {
        let key_end = cursor + found + key.len();
        let separator_len: usize = input[key_end..]
            .chars()
            .take_while(|ch| matches!(ch, '=' | ':' | ' ' | '"'))
            .map(char::len_utf8)
            .sum();
        let separator = &input[key_end..key_end + separator_len];
        let is_assignment =
            separator.contains(['=', ':']) || (key == "bearer" && separator_len > 0);

        if !is_assignment {
            output.push_str(&input[cursor..key_end]);
            cursor = key_end;
            continue;
        }

        let value_start = key_end + separator_len;
        let value_len = input[value_start..]
            .find(|ch: char| ch.is_whitespace() || matches!(ch, '&' | '"' | ',' | ';'))
            .unwrap_or(input.len() - value_start);
        output.push_str(&input[cursor..value_start]);
        if value_len > 0 {
            output.push_str(PLACEHOLDER);
        }
        cursor = value_start + value_len;
    }

    output.push_str(&input[cursor..]);
    output
}

/// App integration error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),
    /// Transport could not be configured.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// Audit record could not be serialized.
    #[error("audit serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Audit sink failure other than I/O.
    #[error("audit error: {0}")]
    Audit(String),
    /// Image decode/encode failure.
    #[error("image error: {0}")]
    Core(#[from] CoreError),
    /// Compositing failure.
    #[error("canvas error: {0}")]
    Canvas(#[from] CanvasError),
    /// Mask derivation or validation failure.
    #[error("mask error: {0}")]
    Mask(#[from] MaskError),
}

#[cfg(test)]
mod tests {
    //! Unit tests for naming, redaction and status mapping.

    use super::*;

    #[test]
    fn upload_names_are_sanitized_and_unique() {
        let first = unique_upload_name("../../etc/pass wd.png");
        let second = unique_upload_name("../../etc/pass wd.png");
        assert_ne!(first, second);
        assert!(first.ends_with("-pass_wd.png"));
        assert!(!first.contains('/'));
        assert!(unique_upload_name("...").ends_with("-upload"));
    }

    #[test]
    fn redaction_keeps_structure_and_hides_values() {
        assert_eq!(
            redact_sensitive("request failed: key=AIzaSecret&alt=json"),
            "request failed: key=<redacted>&alt=json"
        );
        assert_eq!(redact_sensitive("no secrets here"), "no secrets here");
    }

    #[test]
    fn every_kind_has_a_distinct_upstream_status() {
        assert_eq!(status_for(ErrorKind::QuotaExceeded), 429);
        assert_eq!(status_for(ErrorKind::ModelUnavailable), 404);
        assert_eq!(status_for(ErrorKind::MalformedUpstreamResponse), 502);
        assert_eq!(status_for(ErrorKind::Transport), 500);
    }
}
