//! logging.rs: `tracing` setup shared by the binary and the library.
//!
//! `init_logging` is idempotent. Console output goes to stderr, so
//! `ask --json` can pipe stdout cleanly. A copy lands in a daily file under
//! `<data dir>/invoice-insight/logs`. Pipeline stages log under the
//! `pipeline` target; settings and startup messages use `backend`.

use std::path::PathBuf;
use std::sync::{Once, OnceLock};

use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT_LOGGING: Once = Once::new();
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const LOG_LEVEL_ENV: &str = "INVOICE_INSIGHT_LOG_LEVEL";

pub fn resolve_log_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("invoice-insight")
        .join("logs")
}

fn build_file_appender() -> Option<(RollingFileAppender, PathBuf)> {
    let log_dir = resolve_log_dir();
    if let Err(err) = std::fs::create_dir_all(&log_dir) {
        eprintln!(
            "[backend][WARN] Failed to create log directory {}: {}",
            log_dir.display(),
            err
        );
        return None;
    }

    Some((RollingFileAppender::new(Rotation::DAILY, &log_dir, "pipeline.log"), log_dir))
}

fn build_filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".into())))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init_logging() {
    INIT_LOGGING.call_once(|| {
        let (file_layer, log_dir_description) = if let Some((appender, dir)) = build_file_appender() {
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(non_blocking);
            LOG_GUARD.set(guard).ok();
            (Some(layer), Some(dir))
        } else {
            (None, None)
        };

        // stderr keeps stdout clean for `ask --json` output.
        let console_layer = fmt::layer()
            .with_target(true)
            .with_ansi(true)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(std::io::stderr);

        let registry = tracing_subscriber::registry().with(build_filter()).with(console_layer);
        if let Some(file_layer) = file_layer {
            registry.with(file_layer).init();
        } else {
            registry.init();
        }

        if let Some(dir) = log_dir_description {
            backend_info(format!(
                "Structured logging initialized. Pipeline logs will be rotated daily under {}",
                dir.display()
            ));
        } else {
            backend_warn("Structured logging initialized without file sink (console only)");
        }
    });
}

pub fn backend_info(message: impl AsRef<str>) {
    info!(target: "backend", "{}", message.as_ref());
}

pub fn backend_warn(message: impl AsRef<str>) {
    warn!(target: "backend", "{}", message.as_ref());
}

pub fn backend_error(message: impl AsRef<str>) {
    error!(target: "backend", "{}", message.as_ref());
}
