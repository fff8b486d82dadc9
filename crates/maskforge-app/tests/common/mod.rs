//! Shared fixtures for app integration tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use maskforge_app::{AppError, AuditRecord, AuditSink, MultipartInput, ServerContext, UploadedFile};
use maskforge_backend::{BackendError, GenerationBackend, GenerationRequest};
use maskforge_core::{Bitmap, Rgba};
use maskforge_identity::HeaderIdentityProvider;
use maskforge_safety::SafetyPolicy;
use serde_json::{Value, json};

type Reply = Box<dyn Fn() -> Result<Value, BackendError> + Send + Sync>;

/// Backend fake counting calls and recording what it saw.
pub struct CountingBackend {
    calls: AtomicUsize,
    reply: Reply,
    upload_dir: Mutex<Option<PathBuf>>,
    files_seen: Mutex<Vec<usize>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

#[allow(dead_code)]
impl CountingBackend {
    /// Fake answering every call with `reply()`.
    pub fn new(
        reply: impl Fn() -> Result<Value, BackendError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            reply: Box::new(reply),
            upload_dir: Mutex::new(None),
            files_seen: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Fake returning one inline PNG part.
    pub fn image() -> Arc<Self> {
        Self::new(|| Ok(gemini_image_reply()))
    }

    /// Number of `generate` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Counts files in `dir` at call time.
    pub fn watch_dir(&self, dir: &Path) {
        *self.upload_dir.lock().expect("lock should not be poisoned") = Some(dir.to_path_buf());
    }

    /// File counts observed at each call.
    pub fn files_seen(&self) -> Vec<usize> {
        self.files_seen.lock().expect("lock should not be poisoned").clone()
    }

    /// Requests received, in order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().expect("lock should not be poisoned").clone()
    }
}

impl GenerationBackend for CountingBackend {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn generate(&self, _model: &str, request: &GenerationRequest) -> Result<Value, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .expect("lock should not be poisoned")
            .push(request.clone());
        if let Some(dir) = self.upload_dir.lock().expect("lock should not be poisoned").as_ref() {
            self.files_seen
                .lock()
                .expect("lock should not be poisoned")
                .push(count_files(dir));
        }
        (self.reply)()
    }
}

/// Audit fake keeping records in memory.
#[derive(Default)]
pub struct RecordingAudit {
    records: Mutex<Vec<AuditRecord>>,
}

#[allow(dead_code)]
impl RecordingAudit {
    /// Records appended so far.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().expect("lock should not be poisoned").clone()
    }
}

impl AuditSink for RecordingAudit {
    fn append(&self, record: &AuditRecord) -> Result<(), AppError> {
        self.records
            .lock()
            .expect("lock should not be poisoned")
            .push(record.clone());
        Ok(())
    }
}

/// Audit fake that always fails.
pub struct FailingAudit;

impl AuditSink for FailingAudit {
    fn append(&self, _record: &AuditRecord) -> Result<(), AppError> {
        Err(AppError::Audit("audit database unreachable".to_string()))
    }
}

/// Context wired with fakes, writing uploads into `upload_dir`.
#[allow(dead_code)]
pub fn context(
    backend: Arc<CountingBackend>,
    audit: Arc<dyn AuditSink>,
    upload_dir: &Path,
) -> ServerContext {
    ServerContext {
        backend,
        audit,
        identity: Arc::new(HeaderIdentityProvider::default()),
        safety: SafetyPolicy::new(true),
        upload_dir: upload_dir.to_path_buf(),
        image_model: "image-model".to_string(),
        text_model: "text-model".to_string(),
        max_upload_bytes: 1024 * 1024,
    }
}

/// Gemini-shaped reply with one inline PNG.
#[allow(dead_code)]
pub fn gemini_image_reply() -> Value {
    json!({
        "candidates": [{
            "content": {"parts": [
                {"text": "Done."},
                {"inlineData": {"mimeType": "image/png", "data": "AQID"}}
            ]}
        }]
    })
}

/// Gemini-shaped reply with prose only.
#[allow(dead_code)]
pub fn gemini_text_reply(text: &str) -> Value {
    json!({"candidates": [{"content": {"parts": [{"text": text}]}}]})
}

/// Opaque PNG of one color.
#[allow(dead_code)]
pub fn png(width: u32, height: u32, color: Rgba) -> Vec<u8> {
    Bitmap::filled(width, height, color)
        .and_then(|bitmap| bitmap.to_png())
        .expect("png fixture should encode")
}

/// Edit mask PNG: black with a white top-left pixel.
#[allow(dead_code)]
pub fn edit_mask_png(width: u32, height: u32) -> Vec<u8> {
    let mut rgba = Bitmap::filled(width, height, Rgba::OPAQUE_BLACK)
        .expect("mask fixture should build")
        .into_rgba();
    rgba[..4].copy_from_slice(&Rgba::OPAQUE_WHITE.0);
    Bitmap::new(width, height, rgba)
        .and_then(|bitmap| bitmap.to_png())
        .expect("mask fixture should encode")
}

/// File upload fixture.
#[allow(dead_code)]
pub fn file(field: &str, bytes: Vec<u8>) -> UploadedFile {
    UploadedFile {
        field: field.to_string(),
        filename: format!("{field}.png"),
        content_type: Some("image/png".to_string()),
        bytes,
    }
}

/// Multipart body fixture.
#[allow(dead_code)]
pub fn multipart(fields: &[(&str, &str)], files: Vec<UploadedFile>) -> MultipartInput {
    MultipartInput {
        fields: fields
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect(),
        files,
    }
}

/// Number of entries in `dir`.
#[allow(dead_code)]
pub fn count_files(dir: &Path) -> usize {
    fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}
