//! Structured logging setup: console plus a daily rolling file.

use anyhow::Context as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Rolling file prefix; files are named `qr-pos.YYYY-MM-DD`.
pub const LOG_FILE_PREFIX: &str = "qr-pos";

/// Number of log files kept after pruning.
pub const MAX_LOG_FILES: usize = 7;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info,pos_qr_checkout=debug";

/// Set to `1` to write the log file as JSON lines.
pub const ENV_LOG_JSON: &str = "POS_QR_LOG_JSON";

/// Platform data directory for logs.
pub fn default_log_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join("com.thesmall.pos").join("qr-checkout").join("logs")
}

/// Install the global subscriber. The returned guard flushes the file
/// writer when dropped, so the caller keeps it for the process lifetime.
pub fn init(log_dir: &Path) -> anyhow::Result<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;
    let removed = prune_old_logs(log_dir, MAX_LOG_FILES);

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let json = std::env::var(ENV_LOG_JSON).is_ok_and(|v| v.trim() == "1");
    let (json_layer, text_layer) = if json {
        (
            Some(fmt::layer().json().with_writer(non_blocking).with_target(true)),
            None,
        )
    } else {
        (
            None,
            Some(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_target(true),
            ),
        )
    };
    let console_layer = fmt::layer().with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .context("installing tracing subscriber")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        log_dir = %log_dir.display(),
        pruned = removed,
        "QR checkout logging initialised"
    );
    Ok(guard)
}

/// Delete all but the `keep` most recent `qr-pos.*` files in `dir`.
/// Returns how many files were removed.
pub fn prune_old_logs(dir: &Path, keep: usize) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            let name = path.file_name()?.to_str()?;
            if !path.is_file() || !name.starts_with(&format!("{LOG_FILE_PREFIX}.")) {
                return None;
            }
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(std::time::UNIX_EPOCH);
            Some((path, modified))
        })
        .collect();

    // Newest first; names carry the date, so they break mtime ties.
    log_files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));

    let mut removed = 0;
    for (path, _) in log_files.iter().skip(keep) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to prune log file {}: {e}", path.display()),
        }
    }
    removed
}
