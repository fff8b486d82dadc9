#![warn(missing_docs)]
//! # maskforge-contract
//!
//! ## Purpose
//! Turns backend replies of varying shape into one [`GenerationResult`], and
//! defines the JSON reply bodies exchanged between server and client.
//!
//! ## Responsibilities
//! - Normalize raw backend JSON into a flat list of [`ResponsePart`]s.
//! - Apply an ordered list of independent [`ExtractionRule`]s.
//! - Build and parse `data:` URIs for inline images.
//! - Serialize/parse the HTTP reply bodies (`imageUrl`, `answer`, `message`).
//!
//! ## Data flow
//! Raw JSON -> [`normalize_response`] (first matching [`ShapeNormalizer`]) ->
//! [`NormalizedResponse`] -> [`decode_with`] (first rule that yields) ->
//! [`GenerationResult`].
//!
//! ## Ownership and lifetimes
//! Parsed values are owned so they outlive the transient network buffer.
//!
//! ## Error model
//! Shape and payload failures return [`ContractError`]; [`decode_response`]
//! folds them into `GenerationResult::Error` with
//! [`ErrorKind::MalformedUpstreamResponse`].
//!
//! ## Extending
//! A new backend shape is one more [`ShapeNormalizer`]; a new way of reading a
//! result is one more [`ExtractionRule`]. Neither touches existing entries.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use maskforge_core::{BinaryImage, ErrorKind, GenerationResult, PNG_MEDIA_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Keys a webhook reply may use for its image, in lookup order.
pub const WEBHOOK_IMAGE_KEYS: &[&str] = &["imageUrl", "url", "image_url", "imageUrlSigned"];

/// Keys a webhook reply may use for prose.
pub const WEBHOOK_TEXT_KEYS: &[&str] = &["message", "error", "text", "answer"];

/// One content unit of a normalized backend reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePart {
    /// Prose.
    Text(String),
    /// Image bytes carried in the reply.
    InlineData(BinaryImage),
    /// Reference to an image stored elsewhere.
    FileData {
        /// Remote URI, forwarded verbatim.
        uri: String,
        /// Declared media type, when given.
        mime_type: Option<String>,
    },
}

/// Backend reply flattened to its content parts, in reply order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedResponse {
    /// Parts across all candidates.
    pub parts: Vec<ResponsePart>,
}

/// Recognizes one backend reply shape.
pub trait ShapeNormalizer: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Returns `true` when `raw` looks like this shape.
    fn matches(&self, raw: &Value) -> bool;

    /// Flattens `raw` into content parts.
    ///
    /// # Errors
    /// Returns [`ContractError`] when an inline payload cannot be decoded.
    fn normalize(&self, raw: &Value) -> Result<NormalizedResponse, ContractError>;
}

/// `generateContent` replies: `candidates[].content.parts[]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiShape;

impl ShapeNormalizer for GeminiShape {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn matches(&self, raw: &Value) -> bool {
        raw.get("candidates").is_some() || raw.get("promptFeedback").is_some()
    }

    fn normalize(&self, raw: &Value) -> Result<NormalizedResponse, ContractError> {
        let mut parts = Vec::new();
        let candidates = raw
            .get("candidates")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for candidate in candidates {
            let raw_parts = candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();

            for part in raw_parts {
                if part.get("thought").and_then(Value::as_bool) == Some(true) {
                    continue;
                }
                if let Some(inline) = either(part, "inlineData", "inline_data") {
                    let data = inline.get("data").and_then(Value::as_str).unwrap_or_default();
                    if data.is_empty() {
                        continue;
                    }
                    let mime_type = either(inline, "mimeType", "mime_type")
                        .and_then(Value::as_str)
                        .unwrap_or(PNG_MEDIA_TYPE);
                    let bytes = BASE64
                        .decode(data.as_bytes())
                        .map_err(ContractError::InlineData)?;
                    parts.push(ResponsePart::InlineData(BinaryImage::new(mime_type, bytes)));
                } else if let Some(file) = either(part, "fileData", "file_data") {
                    if let Some(uri) = either(file, "fileUri", "file_uri").and_then(Value::as_str) {
                        parts.push(ResponsePart::FileData {
                            uri: uri.to_string(),
                            mime_type: either(file, "mimeType", "mime_type")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                        });
                    }
                } else if let Some(text) = part.get("text").and_then(Value::as_str) {
                    parts.push(ResponsePart::Text(text.to_string()));
                }
            }
        }

        Ok(NormalizedResponse { parts })
    }
}

/// Loose workflow-webhook replies keyed by `imageUrl`, `url`, `output[0]`,
/// `data.url`, `image`, and friends.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebhookShape;

impl ShapeNormalizer for WebhookShape {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn matches(&self, raw: &Value) -> bool {
        raw.is_object() || raw.as_array().is_some_and(|items| !items.is_empty())
    }

    fn normalize(&self, raw: &Value) -> Result<NormalizedResponse, ContractError> {
        // Workflow runners often wrap the item in a one-element array.
        let item = match raw {
            Value::Array(items) => items.first().unwrap_or(&Value::Null),
            other => other,
        };

        let mut parts = Vec::new();
        // Null, empty and non-string values fall through to the next key.
        let candidate = WEBHOOK_IMAGE_KEYS
            .iter()
            .find_map(|key| item.get(*key).and_then(webhook_locator))
            .or_else(|| {
                item.get("output")
                    .and_then(|output| output.get(0))
                    .and_then(webhook_locator)
            })
            .or_else(|| {
                item.get("data")
                    .and_then(|data| data.get("url"))
                    .and_then(webhook_locator)
            })
            .or_else(|| item.get("image").and_then(webhook_locator));

        if let Some(value) = candidate {
            parts.push(webhook_image_part(value)?);
        }

        for key in WEBHOOK_TEXT_KEYS {
            if let Some(text) = item.get(*key).and_then(Value::as_str) {
                parts.push(ResponsePart::Text(text.to_string()));
            }
        }

        Ok(NormalizedResponse { parts })
    }
}

/// Usable locator string in `value`, taking the first element of an array.
fn webhook_locator(value: &Value) -> Option<&str> {
    let value = match value {
        Value::Array(values) => values.first()?,
        other => other,
    };
    value.as_str().map(str::trim).filter(|locator| !locator.is_empty())
}

fn webhook_image_part(value: &str) -> Result<ResponsePart, ContractError> {
    if value.starts_with("http") {
        return Ok(ResponsePart::FileData {
            uri: value.to_string(),
            mime_type: None,
        });
    }
    if value.starts_with("data:") {
        return Ok(ResponsePart::InlineData(parse_data_uri(value)?));
    }

    let bytes = BASE64
        .decode(value.trim().as_bytes())
        .map_err(ContractError::InlineData)?;
    Ok(ResponsePart::InlineData(BinaryImage::new(PNG_MEDIA_TYPE, bytes)))
}

fn either<'a>(value: &'a Value, camel: &str, snake: &str) -> Option<&'a Value> {
    value.get(camel).or_else(|| value.get(snake))
}

/// Built-in normalizers, most specific first.
pub fn default_normalizers() -> Vec<Box<dyn ShapeNormalizer>> {
    vec![Box::new(GeminiShape), Box::new(WebhookShape)]
}

/// Normalizes `raw` with the first matching built-in normalizer.
///
/// # Errors
/// Returns [`ContractError::UnrecognizedShape`] when no normalizer matches and
/// propagates payload decode failures.
pub fn normalize_response(raw: &Value) -> Result<NormalizedResponse, ContractError> {
    normalize_with(&default_normalizers(), raw)
}

/// Normalizes `raw` with an explicit normalizer list.
///
/// # Errors
/// Same as [`normalize_response`].
pub fn normalize_with(
    normalizers: &[Box<dyn ShapeNormalizer>],
    raw: &Value,
) -> Result<NormalizedResponse, ContractError> {
    let normalizer = normalizers
        .iter()
        .find(|normalizer| normalizer.matches(raw))
        .ok_or(ContractError::UnrecognizedShape)?;
    normalizer.normalize(raw)
}

/// One independent way of reading a result out of a normalized reply.
pub trait ExtractionRule: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Returns a result when this rule applies.
    fn apply(&self, response: &NormalizedResponse) -> Option<GenerationResult>;
}

/// First part carrying a remote reference or inline bytes becomes the image.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstImagePart;

impl ExtractionRule for FirstImagePart {
    fn name(&self) -> &'static str {
        "first_image_part"
    }

    fn apply(&self, response: &NormalizedResponse) -> Option<GenerationResult> {
        response.parts.iter().find_map(|part| match part {
            ResponsePart::FileData { uri, .. } => Some(GenerationResult::Image {
                locator: uri.clone(),
            }),
            ResponsePart::InlineData(image) => Some(GenerationResult::Image {
                locator: data_uri(image),
            }),
            ResponsePart::Text(_) => None,
        })
    }
}

/// Non-blank text parts, joined by newlines, become the explanation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextParts;

impl ExtractionRule for TextParts {
    fn name(&self) -> &'static str {
        "text_parts"
    }

    fn apply(&self, response: &NormalizedResponse) -> Option<GenerationResult> {
        let texts: Vec<&str> = response
            .parts
            .iter()
            .filter_map(|part| match part {
                ResponsePart::Text(text) if !text.trim().is_empty() => Some(text.trim()),
                _ => None,
            })
            .collect();

        (!texts.is_empty()).then(|| GenerationResult::Text {
            explanation: texts.join("\n"),
        })
    }
}

/// Rules for image-producing calls: image first, then prose.
pub fn image_rules() -> Vec<Box<dyn ExtractionRule>> {
    vec![Box::new(FirstImagePart), Box::new(TextParts)]
}

/// Rules for question-answering calls: prose only.
pub fn answer_rules() -> Vec<Box<dyn ExtractionRule>> {
    vec![Box::new(TextParts)]
}

/// Applies `rules` in order; no match yields a malformed-response error.
pub fn decode_with(
    rules: &[Box<dyn ExtractionRule>],
    response: &NormalizedResponse,
) -> GenerationResult {
    rules
        .iter()
        .find_map(|rule| rule.apply(response))
        .unwrap_or_else(|| {
            GenerationResult::error(
                ErrorKind::MalformedUpstreamResponse,
                format!("no extraction rule matched {} part(s)", response.parts.len()),
            )
        })
}

/// Normalizes and decodes an image-producing reply.
pub fn decode_response(raw: &Value) -> GenerationResult {
    decode_raw(&image_rules(), raw)
}

/// Normalizes and decodes a question-answering reply.
pub fn decode_answer(raw: &Value) -> GenerationResult {
    decode_raw(&answer_rules(), raw)
}

fn decode_raw(rules: &[Box<dyn ExtractionRule>], raw: &Value) -> GenerationResult {
    match normalize_response(raw) {
        Ok(normalized) => decode_with(rules, &normalized),
        Err(error) => {
            GenerationResult::error(ErrorKind::MalformedUpstreamResponse, error.to_string())
        }
    }
}

/// Builds `data:<mime>;base64,<payload>` for an inline image.
pub fn data_uri(image: &BinaryImage) -> String {
    format!("data:{};base64,{}", image.mime_type, BASE64.encode(&image.bytes))
}

/// Parses a base64 `data:` URI back into a typed image.
///
/// # Errors
/// Returns [`ContractError::InvalidDataUri`] for non-base64 or malformed URIs
/// and [`ContractError::InlineData`] for undecodable payloads.
pub fn parse_data_uri(locator: &str) -> Result<BinaryImage, ContractError> {
    let rest = locator
        .strip_prefix("data:")
        .ok_or_else(|| ContractError::InvalidDataUri("missing data: prefix".to_string()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| ContractError::InvalidDataUri("missing payload separator".to_string()))?;
    let mime_type = header
        .strip_suffix(";base64")
        .ok_or_else(|| {
            ContractError::InvalidDataUri("only base64 payloads are supported".to_string())
        })?;
    let mime_type = if mime_type.is_empty() {
        PNG_MEDIA_TYPE
    } else {
        mime_type
    };

    let bytes = BASE64
        .decode(payload.as_bytes())
        .map_err(ContractError::InlineData)?;
    Ok(BinaryImage::new(mime_type, bytes))
}

/// Successful image reply body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageReply {
    /// Remote or `data:` locator of the image.
    pub image_url: String,
}

/// Successful answer reply body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerReply {
    /// Answer text.
    pub answer: String,
}

/// Failure reply body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReply {
    /// User-facing message, shown verbatim by clients.
    pub message: String,
    /// Matched blocklist token, omitted in production.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_token: Option<String>,
    /// Model prose when it answered instead of producing an image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_response: Option<String>,
}

impl ErrorReply {
    /// Failure body with only a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            matched_token: None,
            ai_response: None,
        }
    }
}

/// Client-side view of one server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientReply {
    /// Image locator.
    Image(String),
    /// Answer text.
    Answer(String),
    /// Failure message to surface verbatim.
    Failure {
        /// HTTP status.
        status: u16,
        /// Server message, or a status-derived fallback.
        message: String,
    },
}

/// Parses a server reply as a client sees it.
///
/// Non-success statuses surface the server's `message`; bodies without one
/// fall back to a status-derived message.
pub fn parse_client_reply(status: u16, body: &str) -> ClientReply {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);

    if !(200..300).contains(&status) {
        let message = parsed
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Request failed with status {status}"));
        return ClientReply::Failure { status, message };
    }

    if let Ok(reply) = serde_json::from_value::<ImageReply>(parsed.clone()) {
        return ClientReply::Image(reply.image_url);
    }
    if let Ok(reply) = serde_json::from_value::<AnswerReply>(parsed) {
        return ClientReply::Answer(reply.answer);
    }

    ClientReply::Failure {
        status,
        message: "Server reply did not contain an image or an answer.".to_string(),
    }
}

/// Contract errors.
#[derive(Debug, Error)]
pub enum ContractError {
    /// No normalizer recognized the reply.
    #[error("unrecognized backend reply shape")]
    UnrecognizedShape,
    /// Inline payload was not valid base64.
    #[error("inline image payload is not valid base64: {0}")]
    InlineData(#[from] base64::DecodeError),
    /// `data:` URI could not be parsed.
    #[error("invalid data uri: {0}")]
    InvalidDataUri(String),
}
