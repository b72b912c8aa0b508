//! Log sinks.
//!
//! # Responsibilities
//! - Durable append-only JSON-lines file (`FileSink`)
//! - Console fallback line (`TracingConsole`)
//! - In-memory doubles for tests (`MemorySink`, `MemoryConsole`)
//!
//! # Design Decisions
//! - Each sink is an independent capability; a failure in one never reaches
//!   another
//! - The file sink serializes writes under one mutex around the shared handle
//! - Every line is written with a single `write_all` on an `O_APPEND` handle;
//!   prior lines are never rewritten

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

use crate::observability::logging::LogLevel;

/// Errors raised by a sink. They never escape the logger.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("log file I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode log record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Durable destination for JSON log lines.
pub trait DurableSink: Send + Sync {
    /// Append one line. `line` carries no trailing newline.
    fn append(&self, line: &str) -> Result<(), SinkError>;

    /// Human-readable description for diagnostics.
    fn describe(&self) -> String;
}

/// Console destination for fallback lines.
pub trait ConsoleSink: Send + Sync {
    fn write_line(&self, level: LogLevel, line: &str);
}

/// Append-only log file.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileSink {
    /// Open (or create) `path` for appending.
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }
}

impl DurableSink for FileSink {
    fn append(&self, line: &str) -> Result<(), SinkError> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');

        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(&buf)?;
        file.flush()?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Console sink that goes through the process `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingConsole;

impl ConsoleSink for TracingConsole {
    fn write_line(&self, level: LogLevel, line: &str) {
        match level {
            LogLevel::Info => tracing::info!(target: "order_telemetry::console", "{}", line),
            LogLevel::Error => tracing::error!(target: "order_telemetry::console", "{}", line),
        }
    }
}

/// In-memory durable sink. Can be switched into a failing mode.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent appends fail with an I/O error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Every line parsed as JSON. Unparseable lines are skipped.
    pub fn records(&self) -> Vec<serde_json::Value> {
        self.lines()
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

impl DurableSink for MemorySink {
    fn append(&self, line: &str) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Io(io::Error::new(io::ErrorKind::Other, "disk full")));
        }
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// In-memory console sink.
#[derive(Debug, Default)]
pub struct MemoryConsole {
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl MemoryConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|(_, line)| line.contains(needle))
    }
}

impl ConsoleSink for MemoryConsole {
    fn write_line(&self, level: LogLevel, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((level, line.to_string()));
    }
}
