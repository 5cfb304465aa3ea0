#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use tracing_subscriber::EnvFilter;

use rtsl::SimFormat;

/// Initialize tracing from `RUST_LOG` with the sim-clock formatter.
///
/// `try_init()` is idempotent: the first call in the process succeeds,
/// subsequent calls are silently ignored.
pub fn setup() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .event_format(SimFormat)
        .try_init();
}

/// A uniquely named scratch directory, removed on drop.
pub struct TempDir {
    path: PathBuf,
}

impl TempDir {
    pub fn new(tag: &str) -> Self {
        let path = std::env::temp_dir().join(format!("rtsl-test-{tag}-{}", std::process::id()));
        // A leftover from a crashed run would confuse the test.
        let _ = fs::remove_dir_all(&path);
        fs::create_dir_all(&path).unwrap();
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}
