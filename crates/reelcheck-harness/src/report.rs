//! Harness execution report.

use chrono::{DateTime, Utc};
use reelcheck_core::{Result, Stage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use uuid::Uuid;

const DIGEST_CHUNK_SIZE: usize = 1 << 20;

/// One executed step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepRecord {
    pub stage: Stage,

    /// `None` when the step never produced an exit code (spawn failure,
    /// timeout, or an in-process stage).
    pub exit_code: Option<i32>,

    pub duration_ms: u64,

    pub passed: bool,
}

/// Final pass/fail signal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail {
        /// Stage the sequence aborted in.
        stage: Stage,
        /// Human-readable failure.
        message: String,
        /// Last captured output lines of the failing step.
        log_tail: Vec<String>,
    },
}

/// Files produced by both runs, recorded on success.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Artifacts {
    pub edl1: PathBuf,
    pub edl2: PathBuf,
    pub vid1: PathBuf,
    pub vid2: PathBuf,

    /// SHA-256 of the first rendering, if it could be read.
    pub vid1_sha256: Option<String>,

    /// SHA-256 of the second rendering, if it could be read.
    pub vid2_sha256: Option<String>,
}

/// Summary of one harness execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessReport {
    pub run_id: Uuid,
    pub seed: u64,
    pub fast: bool,

    /// Configuration the pipeline was run with (the derived one in fast mode).
    pub config_path: Option<PathBuf>,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,

    pub steps: Vec<StepRecord>,
    pub verdict: Verdict,
    pub artifacts: Option<Artifacts>,

    /// Persistent subprocess log, if one was written.
    pub log_file: Option<PathBuf>,
}

impl HarnessReport {
    /// Whether every stage passed.
    pub fn passed(&self) -> bool {
        matches!(self.verdict, Verdict::Pass)
    }

    /// Stage the harness failed in, if any.
    pub fn failed_stage(&self) -> Option<Stage> {
        match &self.verdict {
            Verdict::Pass => None,
            Verdict::Fail { stage, .. } => Some(*stage),
        }
    }

    /// Process exit code: 0 on pass, 1 on any failure.
    pub fn exit_code(&self) -> i32 {
        if self.passed() {
            0
        } else {
            1
        }
    }

    /// Whether a step ran for `stage`.
    pub fn ran(&self, stage: Stage) -> bool {
        self.steps.iter().any(|s| s.stage == stage)
    }

    /// Write the report as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// SHA-256 hex digest of a file, read in 1 MiB chunks.
pub async fn digest_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; DIGEST_CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
