//! Integration tests for log redaction.

use maskforge_app::redact_sensitive;

#[test]
fn log_redaction_tests_removes_obvious_secret_markers() {
    let raw = "authorization=Bearer abc123";
    let redacted = redact_sensitive(raw);

    assert!(redacted.contains("<redacted>"));
    assert!(!redacted.contains("abc123"));
}

#[test]
fn log_redaction_tests_hides_api_key_in_upstream_urls() {
    let raw = "error sending request for url (https://host/v1beta/models/m:generateContent?key=AIzaXYZ)";
    let redacted = redact_sensitive(raw);

    assert!(!redacted.contains("AIzaXYZ"));
    assert!(redacted.contains("generateContent"));
}
