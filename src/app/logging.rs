use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::ChronoLocal;

use crate::app::App;
use crate::app::constants::{
    LOG_DEFAULT_FILTER, LOG_MAX_ENTRIES, LOG_RETENTION_DAYS, LOG_TIMESTAMP_FORMAT,
    LOG_TIMESTAMP_LEN,
};

impl<W: Write> App<W> {
    pub(crate) fn set_status(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(status = %message);
        self.console.status(&message);
        self.status = message;
    }
}

/// Installs the file subscriber. The console owns stdout, so logs go to `log_path`.
pub(crate) fn init_tracing(log_path: &Path) -> Result<()> {
    prune_log_file(log_path);
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("open {}", log_path.display()))?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(LOG_DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false)
        .with_timer(ChronoLocal::new(LOG_TIMESTAMP_FORMAT.to_string()))
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|err| anyhow::anyhow!("install log subscriber: {err}"))
}

/// Drops entries older than the retention window and caps the file length.
/// Lines without a timestamp belong to the entry above them.
pub(crate) fn prune_log_file(path: &Path) {
    let Ok(content) = fs::read_to_string(path) else {
        return;
    };
    let cutoff = chrono::Local::now().naive_local() - chrono::Duration::days(LOG_RETENTION_DAYS);
    let mut kept = Vec::new();
    let mut keep_current = false;
    for line in content.lines() {
        if let Some(parsed) = parse_timestamp(line) {
            keep_current = parsed >= cutoff;
        }
        if keep_current {
            kept.push(line);
        }
    }
    if kept.len() > LOG_MAX_ENTRIES {
        kept = kept.split_off(kept.len() - LOG_MAX_ENTRIES);
    }
    if kept.is_empty() {
        let _ = fs::remove_file(path);
    } else {
        let _ = fs::write(path, kept.join("\n") + "\n");
    }
}

fn parse_timestamp(line: &str) -> Option<chrono::NaiveDateTime> {
    let prefix = line.get(..LOG_TIMESTAMP_LEN)?;
    chrono::NaiveDateTime::parse_from_str(prefix, LOG_TIMESTAMP_FORMAT).ok()
}
