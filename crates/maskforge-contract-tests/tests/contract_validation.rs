//! Validates reply fixtures and serialized reply bodies against frozen JSON schemas.

use jsonschema::JSONSchema;
use maskforge_contract::{AnswerReply, ErrorReply, ImageReply};
use serde_json::{Value, json};

fn load_json(path: &str) -> Value {
    let raw = std::fs::read_to_string(path).expect("json file should be readable");
    serde_json::from_str(&raw).expect("json file should be valid")
}

fn compile_validator(schema_path: &str) -> JSONSchema {
    let schema = load_json(schema_path);
    JSONSchema::compile(&schema).expect("schema should compile")
}

fn image_reply_validator() -> JSONSchema {
    compile_validator(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../contracts/image-reply.schema.json"
    ))
}

fn error_reply_validator() -> JSONSchema {
    compile_validator(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../contracts/error-reply.schema.json"
    ))
}

#[test]
fn image_reply_fixture_matches_schema() {
    let fixture = load_json(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../contracts/fixtures/image-reply.valid.json"
    ));
    assert!(
        image_reply_validator().is_valid(&fixture),
        "image reply fixture should validate against schema"
    );
}

#[test]
fn answer_reply_fixture_matches_schema() {
    let validator = compile_validator(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../contracts/answer-reply.schema.json"
    ));
    let fixture = load_json(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../contracts/fixtures/answer-reply.valid.json"
    ));
    assert!(
        validator.is_valid(&fixture),
        "answer reply fixture should validate against schema"
    );
    let serialized = serde_json::to_value(AnswerReply {
        answer: "A cat.".to_string(),
    })
    .expect("reply should serialize");
    assert!(validator.is_valid(&serialized));
}

#[test]
fn error_reply_fixture_matches_schema() {
    let fixture = load_json(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../contracts/fixtures/error-reply.valid.json"
    ));
    assert!(
        error_reply_validator().is_valid(&fixture),
        "error reply fixture should validate against schema"
    );
}

#[test]
fn serialized_replies_use_camel_case_wire_names() {
    let image = serde_json::to_value(ImageReply {
        image_url: "https://cdn.example.com/out.png".to_string(),
    })
    .expect("reply should serialize");
    assert!(image_reply_validator().is_valid(&image));

    let rejection = serde_json::to_value(ErrorReply {
        message: "This request is NSFW and cannot be processed.".to_string(),
        matched_token: Some("nsfw".to_string()),
        ai_response: None,
    })
    .expect("reply should serialize");
    assert!(error_reply_validator().is_valid(&rejection));
    assert!(rejection.get("aiResponse").is_none());
}

#[test]
fn schemas_reject_snake_case_and_empty_bodies() {
    assert!(!image_reply_validator().is_valid(&json!({"image_url": "data:image/png;base64,AA=="})));
    assert!(!image_reply_validator().is_valid(&json!({"imageUrl": "ftp://example.com/x.png"})));
    assert!(!error_reply_validator().is_valid(&json!({})));
}
