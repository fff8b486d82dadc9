//! Exposes the workspace `VERSION` file to the crate as `MASKFORGE_VERSION`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

fn main() {
    let manifest_dir =
        PathBuf::from(env::var_os("CARGO_MANIFEST_DIR").expect("cargo sets CARGO_MANIFEST_DIR"));
    let version_path =
        find_version_file(&manifest_dir).expect("a VERSION file above the crate directory");

    println!("cargo:rerun-if-changed={}", version_path.display());

    let raw = fs::read_to_string(&version_path).expect("VERSION should be readable");
    let version = raw.trim();
    assert!(
        !version.is_empty() && !version.contains(char::is_whitespace),
        "VERSION must hold a single non-empty token"
    );

    println!("cargo:rustc-env=MASKFORGE_VERSION={version}");
}

fn find_version_file(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join("VERSION"))
        .find(|candidate| candidate.is_file())
}
