//! `tracing` subscriber setup.
//!
//! Both entry points honor `RUST_LOG` when it is set and fall back to the
//! given level otherwise. Only the first call in a process installs a
//! subscriber; later calls are no-ops.

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install a compact stderr subscriber.
pub fn init_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_target(true)
        .with_writer(io::stderr)
        .compact();

    let _ = subscriber.try_init();
}

/// Install a subscriber writing to stderr and to the file at `path`.
///
/// The file is created or truncated.
pub fn init_subscriber_with_file(level: &str, path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)?,
        _ => {}
    }
    let file = Arc::new(File::create(path)?);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(io::stderr)
        .compact();
    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(file);

    let _ = tracing_subscriber::registry()
        .with(filter(level))
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    Ok(())
}
