//! Integration tests for upstream failure classification on the wire.

mod common;

use std::sync::Arc;

use common::{CountingBackend, RecordingAudit, context, gemini_text_reply};
use maskforge_app::{NO_IMAGE_MESSAGE, RouteResponse, handle_generate};
use maskforge_backend::BackendError;
use serde_json::json;

fn generate_with(backend: Arc<CountingBackend>) -> RouteResponse {
    let dir = tempfile::tempdir().expect("temp dir should be created");
    let context = context(backend, Arc::new(RecordingAudit::default()), dir.path());
    handle_generate(&context, &[], Some("a lighthouse at dusk"))
}

#[test]
fn status_mapping_tests_quota_is_429() {
    let response = generate_with(CountingBackend::new(|| Err(BackendError::QuotaExceeded)));
    assert_eq!(response.status, 429);
    assert!(
        response.body["message"]
            .as_str()
            .expect("message should be a string")
            .contains("quota")
    );
}

#[test]
fn status_mapping_tests_missing_and_overloaded_model_are_404() {
    for status in [404, 503] {
        let response = generate_with(CountingBackend::new(move || {
            Err(BackendError::ModelUnavailable { status })
        }));
        assert_eq!(response.status, 404);
        assert_eq!(
            response.body["message"],
            "The specified model is not available. Please check the model name."
        );
    }
}

#[test]
fn status_mapping_tests_transport_and_timeout_are_500() {
    let failures: [fn() -> BackendError; 3] = [
        || BackendError::Timeout,
        || BackendError::Transport("dns failure".to_string()),
        || BackendError::Http {
            status: 400,
            body: "bad request".to_string(),
        },
    ];
    for make in failures {
        let response = generate_with(CountingBackend::new(move || Err(make())));
        assert_eq!(response.status, 500);
    }
}

#[test]
fn status_mapping_tests_unrecognized_reply_is_502() {
    let response = generate_with(CountingBackend::new(|| Ok(json!({"candidates": []}))));
    assert_eq!(response.status, 502);
}

#[test]
fn status_mapping_tests_prose_reply_is_422_with_ai_response() {
    let response = generate_with(CountingBackend::new(|| {
        Ok(gemini_text_reply("I can't depict real politicians."))
    }));
    assert_eq!(response.status, 422);
    assert_eq!(response.body["message"], NO_IMAGE_MESSAGE);
    assert_eq!(response.body["aiResponse"], "I can't depict real politicians.");
}

#[test]
fn status_mapping_tests_image_reply_is_200_with_data_uri() {
    let response = generate_with(CountingBackend::image());
    assert_eq!(response.status, 200);
    assert_eq!(response.body["imageUrl"], "data:image/png;base64,AQID");
}

#[test]
fn status_mapping_tests_missing_prompt_is_400_without_backend_call() {
    let backend = CountingBackend::image();
    let dir = tempfile::tempdir().expect("temp dir should be created");
    let context = context(Arc::clone(&backend), Arc::new(RecordingAudit::default()), dir.path());

    assert_eq!(handle_generate(&context, &[], None).status, 400);
    assert_eq!(handle_generate(&context, &[], Some("   ")).status, 400);
    assert_eq!(backend.calls(), 0);
}
