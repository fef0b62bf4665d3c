//! Logging for a crossmix run: a readable console stream plus one JSON log
//! file per session, both filtered by the `[diagnostics]` config section.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use chrono::Utc;
use tracing::{Subscriber, info, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    EnvFilter, Layer, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt,
};
use uuid::Uuid;

use crate::config::DiagnosticsConfig;

pub const DEFAULT_LOG_FILTER: &str = "info,crossmix_core=trace";
pub const DEFAULT_FILE_PREFIX: &str = "crossmix";

/// One logging session. Dropping it flushes the pending JSON lines to disk.
pub struct LogSession {
    session_id: Uuid,
    log_file: PathBuf,
    _writer_guard: WorkerGuard,
}

impl LogSession {
    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    #[must_use]
    pub fn log_file(&self) -> &Path {
        &self.log_file
    }
}

/// Starts logging into `log_dir` with the configured filter and file prefix.
///
/// `RUST_LOG` wins over `settings.rust_log_filter`. When a global subscriber
/// is already installed it stays in place and the new session only gets a
/// file name.
pub fn start_logging(settings: &DiagnosticsConfig, log_dir: &Path) -> anyhow::Result<LogSession> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory: {}", log_dir.display()))?;

    let session_id = Uuid::new_v4();
    let file_name = session_file_name(&settings.trace_file_prefix, session_id);
    let log_file = log_dir.join(&file_name);
    let (writer, writer_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, &file_name));

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.rust_log_filter));
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer())
        .with(json_file_layer(writer))
        .try_init();

    match installed {
        Ok(()) => info!(%session_id, log_file = %log_file.display(), "logging started"),
        Err(error) => warn!(?error, %session_id, "tracing already installed, keeping it"),
    }

    Ok(LogSession {
        session_id,
        log_file,
        _writer_guard: writer_guard,
    })
}

fn session_file_name(prefix: &str, session_id: Uuid) -> String {
    let started = Utc::now().format("%Y%m%d-%H%M%S");
    let short_id = &session_id.simple().to_string()[..8];
    format!("{prefix}-{started}-{short_id}.log")
}

fn console_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    tracing_subscriber::fmt::layer()
        .compact()
        .with_thread_ids(true)
        .with_target(true)
}

fn json_file_layer<S>(writer: NonBlocking) -> impl Layer<S>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(writer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_session_gets_its_own_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let first = start_logging(&DiagnosticsConfig::default(), temp.path()).expect("first");

        let nested = temp.path().join("nested");
        let settings = DiagnosticsConfig {
            rust_log_filter: "warn".to_string(),
            trace_file_prefix: "batch".to_string(),
        };
        let second = start_logging(&settings, &nested).expect("second");

        assert_ne!(first.session_id(), second.session_id());
        assert!(nested.is_dir());
        assert_eq!(first.log_file().parent(), Some(temp.path()));
        assert_eq!(second.log_file().parent(), Some(nested.as_path()));

        let name = second
            .log_file()
            .file_name()
            .and_then(|name| name.to_str())
            .expect("utf-8 file name");
        assert!(name.starts_with("batch-"), "{name}");
        assert!(name.ends_with(".log"), "{name}");
    }
}
