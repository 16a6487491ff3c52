//! Comparator invocation.
//!
//! The comparator is the determinism oracle. The harness forwards paths
//! and propagates the exit code; it never reads the decision logs itself.

use reelcheck_core::{Result, Stage};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

use crate::command::ToolCommand;
use crate::env::ExecContext;
use crate::runner::StepRunner;
use crate::sink::LogSink;

/// Paths handed to the comparator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComparisonRequest {
    pub config_path: PathBuf,
    pub edl1: PathBuf,
    pub edl2: PathBuf,
    pub vid1: PathBuf,
    pub vid2: PathBuf,
}

impl ComparisonRequest {
    /// Comparator arguments for this request.
    pub fn to_args(&self) -> Vec<String> {
        [
            ("--config", &self.config_path),
            ("--edl1", &self.edl1),
            ("--edl2", &self.edl2),
            ("--vid1", &self.vid1),
            ("--vid2", &self.vid2),
        ]
        .into_iter()
        .flat_map(|(flag, path)| [flag.to_string(), path.to_string_lossy().into_owned()])
        .collect()
    }
}

/// Pass/fail from the comparator plus its output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComparisonOutcome {
    /// Whether the runs were judged equivalent.
    pub passed: bool,

    /// Comparator exit code.
    pub exit_code: i32,

    /// Last lines of comparator output.
    pub detail: Vec<String>,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

/// Runs the external comparator command.
#[derive(Debug, Clone)]
pub struct OutputComparator {
    command: ToolCommand,
    ctx: ExecContext,
}

impl OutputComparator {
    pub fn new(command: ToolCommand, ctx: ExecContext) -> Self {
        Self { command, ctx }
    }

    /// Compare two runs. A divergence is a normal outcome, not an error.
    pub async fn compare(
        &self,
        request: &ComparisonRequest,
        sink: &mut LogSink,
    ) -> Result<ComparisonOutcome> {
        info!(
            edl1 = %request.edl1.display(),
            edl2 = %request.edl2.display(),
            "Comparing runs"
        );
        let step = StepRunner::execute(
            Stage::Validation,
            &self.command,
            &request.to_args(),
            &self.ctx,
            sink,
        )
        .await?;

        Ok(ComparisonOutcome {
            passed: step.passed(),
            exit_code: step.exit_code,
            detail: step.tail,
            duration_ms: step.duration_ms,
        })
    }
}
