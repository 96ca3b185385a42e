//! Tracing subscriber setup.
//!
//! The TUI owns the terminal, so in TUI mode logs go to a file. Headless runs log to
//! stderr unless a log file was requested.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

pub fn default_log_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("ricebph-panel")
        .join("panel.log")
}

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber. Returns the log file path when logging to a file.
pub fn init(log_file: Option<&Path>, tui: bool) -> Result<Option<PathBuf>> {
    if !tui && log_file.is_none() {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter("warn"))
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| anyhow!("init logging: {e}"))?;
        return Ok(None);
    }

    let path = log_file.map(Path::to_path_buf).unwrap_or_else(default_log_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create log directory {}", parent.display()))?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("open log file {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter("info"))
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(file))
        .try_init()
        .map_err(|e| anyhow!("init logging: {e}"))?;
    Ok(Some(path))
}
