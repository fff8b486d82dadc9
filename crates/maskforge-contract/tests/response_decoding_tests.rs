//! Integration tests for backend reply decoding.

use maskforge_contract::{decode_answer, decode_response};
use maskforge_core::{ErrorKind, GenerationResult};
use serde_json::json;

#[test]
fn response_decoding_tests_text_then_inline_image_yields_image() {
    let raw = json!({
        "candidates": [{
            "content": {"parts": [
                {"text": "Here is the edited photo."},
                {"inlineData": {"mimeType": "image/png", "data": "iVBORw=="}}
            ]}
        }]
    });

    assert_eq!(
        decode_response(&raw),
        GenerationResult::Image {
            locator: "data:image/png;base64,iVBORw==".to_string()
        }
    );
}

#[test]
fn response_decoding_tests_snake_case_inline_data_is_accepted() {
    let raw = json!({
        "candidates": [{
            "content": {"parts": [
                {"inline_data": {"mime_type": "image/jpeg", "data": "AQID"}}
            ]}
        }]
    });

    assert_eq!(
        decode_response(&raw),
        GenerationResult::Image {
            locator: "data:image/jpeg;base64,AQID".to_string()
        }
    );
}

#[test]
fn response_decoding_tests_file_reference_is_forwarded_verbatim() {
    let raw = json!({
        "candidates": [{
            "content": {"parts": [
                {"fileData": {"fileUri": "https://files.example.test/out.png", "mimeType": "image/png"}},
                {"inlineData": {"mimeType": "image/png", "data": "AQID"}}
            ]}
        }]
    });

    assert_eq!(
        decode_response(&raw),
        GenerationResult::Image {
            locator: "https://files.example.test/out.png".to_string()
        }
    );
}

#[test]
fn response_decoding_tests_image_in_second_candidate_is_found() {
    let raw = json!({
        "candidates": [
            {"content": {"parts": [{"text": "thinking about it"}]}},
            {"content": {"parts": [{"inlineData": {"mimeType": "image/png", "data": "AQID"}}]}}
        ]
    });

    assert!(matches!(decode_response(&raw), GenerationResult::Image { .. }));
}

#[test]
fn response_decoding_tests_text_only_yields_explanation() {
    let raw = json!({
        "candidates": [{
            "content": {"parts": [
                {"text": "I can't edit real public figures."},
                {"text": "Try a fictional character instead."}
            ]}
        }]
    });

    assert_eq!(
        decode_response(&raw),
        GenerationResult::Text {
            explanation: "I can't edit real public figures.\nTry a fictional character instead."
                .to_string()
        }
    );
}

#[test]
fn response_decoding_tests_no_parts_is_malformed() {
    let raw = json!({"candidates": [], "promptFeedback": {"blockReason": "OTHER"}});

    match decode_response(&raw) {
        GenerationResult::Error { kind, .. } => {
            assert_eq!(kind, ErrorKind::MalformedUpstreamResponse)
        }
        other => panic!("expected malformed error, got {other:?}"),
    }
}

#[test]
fn response_decoding_tests_bad_base64_is_malformed() {
    let raw = json!({
        "candidates": [{
            "content": {"parts": [{"inlineData": {"mimeType": "image/png", "data": "***"}}]}
        }]
    });

    assert!(matches!(
        decode_response(&raw),
        GenerationResult::Error {
            kind: ErrorKind::MalformedUpstreamResponse,
            ..
        }
    ));
}

#[test]
fn response_decoding_tests_answer_ignores_images() {
    let raw = json!({
        "candidates": [{
            "content": {"parts": [
                {"inlineData": {"mimeType": "image/png", "data": "AQID"}},
                {"text": "A red bicycle leaning on a wall."}
            ]}
        }]
    });

    assert_eq!(
        decode_answer(&raw),
        GenerationResult::Text {
            explanation: "A red bicycle leaning on a wall.".to_string()
        }
    );
}

#[test]
fn response_decoding_tests_answer_without_text_is_malformed() {
    let raw = json!({
        "candidates": [{
            "content": {"parts": [{"inlineData": {"mimeType": "image/png", "data": "AQID"}}]}
        }]
    });

    assert!(matches!(
        decode_answer(&raw),
        GenerationResult::Error {
            kind: ErrorKind::MalformedUpstreamResponse,
            ..
        }
    ));
}
