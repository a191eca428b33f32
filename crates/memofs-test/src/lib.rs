//! Helpers for testing memofs.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`tempdir`], make sure that the handle to the temp directory is held for the
//!    entire lifetime of the test. When dropped too early, the directory is removed while the
//!    memoizer still writes into it. To avoid this, assign it to a variable in the test function
//!    (e.g. `let cache_dir = test::tempdir()`).

use std::fs;
use std::path::Path;

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `memofs` crate and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("memofs=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped, unless
/// [`into_path`](TempDir::into_path) is called. Use it as a guard to automatically clean up after
/// tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// Returns the names of all regular files directly inside `dir`, sorted.
///
/// A directory that does not exist has no files.
pub fn cache_files(dir: impl AsRef<Path>) -> Vec<String> {
    let entries = match fs::read_dir(dir.as_ref()) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => panic!("failed to list {}: {e}", dir.as_ref().display()),
    };

    let mut files: Vec<_> = entries
        .map(|entry| entry.unwrap())
        .filter(|entry| entry.file_type().unwrap().is_file())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    files.sort();
    files
}

/// Reads the single cache file inside `dir`.
///
/// # Panics
///
/// Panics unless `dir` contains exactly one file.
pub fn read_single_cache_file(dir: impl AsRef<Path>) -> String {
    let dir = dir.as_ref();
    let files = cache_files(dir);
    assert_eq!(files.len(), 1, "expected exactly one file in {}", dir.display());
    fs::read_to_string(dir.join(&files[0])).unwrap()
}
