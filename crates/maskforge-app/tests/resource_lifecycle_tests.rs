//! Integration tests for transient upload cleanup.

mod common;

use std::collections::HashSet;
use std::fs;
use std::sync::Arc;

use common::{
    CountingBackend, RecordingAudit, context, count_files, edit_mask_png, file, multipart, png,
};
use maskforge_app::{UploadScope, handle_combine, handle_edit, unique_upload_name};
use maskforge_backend::BackendError;
use maskforge_core::Rgba;

#[test]
fn resource_lifecycle_tests_files_removed_after_backend_failure() {
    let dir = tempfile::tempdir().expect("temp dir should be created");
    let backend =
        CountingBackend::new(|| Err(BackendError::Transport("connection reset".to_string())));
    backend.watch_dir(dir.path());
    let context = context(Arc::clone(&backend), Arc::new(RecordingAudit::default()), dir.path());
    let input = multipart(
        &[("prompt", "replace the sky")],
        vec![
            file("image", png(6, 4, Rgba::new(0, 0, 255, 255))),
            file("mask", edit_mask_png(6, 4)),
        ],
    );

    let response = handle_edit(&context, &[], &input);

    assert_eq!(response.status, 500);
    assert_eq!(backend.files_seen(), vec![2]);
    assert_eq!(count_files(dir.path()), 0);
}

#[test]
fn resource_lifecycle_tests_files_removed_after_validation_failure() {
    let dir = tempfile::tempdir().expect("temp dir should be created");
    let backend = CountingBackend::image();
    let context = context(Arc::clone(&backend), Arc::new(RecordingAudit::default()), dir.path());
    let input = multipart(
        &[("prompt", "replace the sky")],
        vec![
            file("image", png(6, 4, Rgba::OPAQUE_WHITE)),
            file("mask", edit_mask_png(5, 4)),
        ],
    );

    let response = handle_edit(&context, &[], &input);

    assert_eq!(response.status, 400);
    assert_eq!(backend.calls(), 0);
    assert_eq!(count_files(dir.path()), 0);
}

#[test]
fn resource_lifecycle_tests_files_removed_after_success() {
    let dir = tempfile::tempdir().expect("temp dir should be created");
    let backend = CountingBackend::image();
    backend.watch_dir(dir.path());
    let context = context(Arc::clone(&backend), Arc::new(RecordingAudit::default()), dir.path());
    let input = multipart(
        &[("prompt", "put them on one beach")],
        vec![
            file("image1", png(4, 4, Rgba::OPAQUE_WHITE)),
            file("image2", png(4, 4, Rgba::OPAQUE_BLACK)),
            file("image3", png(4, 4, Rgba::new(0, 255, 0, 255))),
        ],
    );

    let response = handle_combine(&context, &[], &input);

    assert_eq!(response.status, 200);
    assert_eq!(backend.files_seen(), vec![3]);
    assert_eq!(count_files(dir.path()), 0);
}

#[test]
fn resource_lifecycle_tests_release_is_idempotent_and_tolerates_missing_files() {
    let dir = tempfile::tempdir().expect("temp dir should be created");
    let mut scope = UploadScope::new(dir.path()).expect("scope should open");
    let path = scope
        .persist("photo.png", b"bytes")
        .expect("persist should succeed")
        .path()
        .to_path_buf();
    scope.persist("other.png", b"more").expect("persist should succeed");

    fs::remove_file(&path).expect("external delete should succeed");
    scope.release();
    scope.release();
    drop(scope);

    assert_eq!(count_files(dir.path()), 0);
}

#[test]
fn resource_lifecycle_tests_same_original_name_never_collides() {
    let names: HashSet<String> = (0..1_000).map(|_| unique_upload_name("image.png")).collect();
    assert_eq!(names.len(), 1_000);
}
