use std::path::Path;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{AppError, Result};

pub fn init_tracing(log_level: &str, log_dir: &Path) -> Result<()> {
    let file_appender = tracing_appender::rolling::never(log_dir, "ide-session.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // RUST_LOG wins over the command line level
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let fmt_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| AppError::ConfigError(format!("Failed to initialize tracing: {}", e)))?;

    // The writer must outlive every span; logging lasts the whole program
    std::mem::forget(guard);

    Ok(())
}

/// Parent of a slash-separated workspace path, `None` for top-level entries.
pub fn parent_path(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some(("", _)) | None => None,
        Some((parent, _)) => Some(parent),
    }
}

/// Last segment of a slash-separated path.
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Whether `path` equals `ancestor` or lies underneath it.
pub fn is_same_or_descendant(path: &str, ancestor: &str) -> bool {
    path == ancestor
        || (path.starts_with(ancestor) && path.as_bytes().get(ancestor.len()) == Some(&b'/'))
}

/// Re-root `path` from `old_prefix` onto `new_prefix`.
///
/// Callers must check [`is_same_or_descendant`] first.
pub fn rebase_path(path: &str, old_prefix: &str, new_prefix: &str) -> String {
    format!("{}{}", new_prefix, &path[old_prefix.len()..])
}
