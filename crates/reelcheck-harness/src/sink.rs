//! Subprocess output capture.
//!
//! Each captured line goes to tracing under the subprocess target and,
//! when configured, to a persistent log file shared by every step of one
//! harness execution.

use reelcheck_core::{Result, Stage, SUBPROCESS_TARGET};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Lines of output kept per step for failure diagnostics.
pub const TAIL_LINES: usize = 20;

/// Destination for captured subprocess output.
#[derive(Debug, Default)]
pub struct LogSink {
    file: Option<File>,
    path: Option<PathBuf>,
}

impl LogSink {
    /// A sink that only forwards to tracing.
    pub fn tracing_only() -> Self {
        Self::default()
    }

    /// A sink that also writes to `path`, truncating it first.
    pub async fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = File::create(path).await?;
        Ok(Self {
            file: Some(file),
            path: Some(path.to_path_buf()),
        })
    }

    /// Persistent log file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Mark the start of a step.
    pub async fn begin(&mut self, stage: Stage, command_line: &str) -> Result<()> {
        debug!(target: SUBPROCESS_TARGET, stage = %stage, "$ {command_line}");
        if let Some(file) = &mut self.file {
            file.write_all(format!("==> [{stage}] {command_line}\n").as_bytes())
                .await?;
        }
        Ok(())
    }

    /// Record one line of subprocess output.
    pub async fn line(&mut self, stage: Stage, line: &str) -> Result<()> {
        debug!(target: SUBPROCESS_TARGET, stage = %stage, "{line}");
        if let Some(file) = &mut self.file {
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
        }
        Ok(())
    }

    /// Flush buffered file output.
    pub async fn flush(&mut self) -> Result<()> {
        if let Some(file) = &mut self.file {
            file.flush().await?;
        }
        Ok(())
    }
}

/// Bounded buffer of the most recent lines.
#[derive(Debug, Clone)]
pub struct Tail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl Tail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: String) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines.into()
    }
}

impl Default for Tail {
    fn default() -> Self {
        Self::new(TAIL_LINES)
    }
}
