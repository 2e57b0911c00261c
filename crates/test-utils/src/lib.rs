use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Duration;

use serde_json::json;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// Write an experiment definition file in the JSON shape the mock engine
/// parses. Returns the absolute path of the written file.
pub fn write_experiment(
    root: &Path,
    rel: &str,
    name: &str,
    parameters: &[&str],
    resources: &[&str],
) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("creating experiment directory");
    }
    let definition = json!({
        "name": name,
        "parameters": parameters,
        "resources": resources,
    });
    std::fs::write(&path, definition.to_string()).expect("writing experiment definition");
    path
}

/// Write a syntactically broken definition file.
pub fn write_broken_experiment(root: &Path, rel: &str) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("creating experiment directory");
    }
    std::fs::write(&path, "this is not a definition").expect("writing experiment definition");
    path
}

/// Poll `predicate` until it holds or the timeout elapses. Used by the
/// watcher tests, where OS notification latency is unpredictable.
pub async fn wait_until<F>(timeout: Duration, mut predicate: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
