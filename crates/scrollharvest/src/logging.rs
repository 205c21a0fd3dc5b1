use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::ValueEnum;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Sink for the per-run log file. Events are dropped until a file is attached.
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    file: Arc<Mutex<Option<File>>>,
}

impl RunLog {
    pub fn attach(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        if let Ok(mut slot) = self.file.lock() {
            *slot = Some(file);
        }
        Ok(())
    }
}

impl Write for RunLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.lock() {
            Ok(mut slot) => match slot.as_mut() {
                Some(file) => file.write(buf),
                None => Ok(buf.len()),
            },
            Err(_) => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.lock() {
            Ok(mut slot) => match slot.as_mut() {
                Some(file) => file.flush(),
                None => Ok(()),
            },
            Err(_) => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for RunLog {
    type Writer = RunLog;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Installs the global subscriber: stderr plus the run log. `RUST_LOG`, when
/// set, takes precedence over `level`.
pub fn init(level: LogLevel) -> Result<RunLog> {
    let run_log = RunLog::default();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| level.as_str().into());
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(run_log.clone()),
        )
        .try_init()
        .context("failed to install the log subscriber")?;
    Ok(run_log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn run_log_discards_until_attached() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("logs").join("run.log");
        let mut run_log = RunLog::default();
        run_log.write_all(b"before\n").expect("write detached");

        run_log.attach(&path).expect("attach");
        let mut writer = run_log.make_writer();
        writer.write_all(b"after\n").expect("write attached");
        writer.flush().expect("flush");

        assert_eq!(fs::read_to_string(&path).expect("read log"), "after\n");
    }

    #[test]
    fn log_level_names_match_filter_directives() {
        assert_eq!(LogLevel::Warn.as_str(), "warn");
        assert_eq!(
            LogLevel::from_str("debug", true).expect("parse"),
            LogLevel::Debug
        );
    }

    #[test]
    fn second_install_is_reported() {
        let _ = init(LogLevel::Warn);
        let error = init(LogLevel::Warn).expect_err("subscriber already installed");
        assert!(format!("{error:#}").contains("log subscriber"));
    }
}
