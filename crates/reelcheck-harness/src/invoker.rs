//! Pipeline invocation.

use reelcheck_core::{resolve_output, Result, Stage};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

use crate::command::ToolCommand;
use crate::env::ExecContext;
use crate::runner::StepRunner;
use crate::sink::LogSink;

/// One pipeline invocation.
///
/// The two requests of a harness execution differ only in `output_stub`
/// and `edl_path`; the shared seed is what determinism is checked against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunRequest {
    /// Input sources (files, directories or globs; the pipeline expands them).
    pub inputs: Vec<String>,

    /// Configuration document handed to the pipeline.
    pub config_path: PathBuf,

    /// Output file stub; the pipeline appends the ratio suffix.
    pub output_stub: PathBuf,

    /// Deterministic seed.
    pub seed: u64,

    /// Where the pipeline should write its decision log.
    pub edl_path: Option<PathBuf>,
}

impl RunRequest {
    /// Pipeline arguments for this request.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["--inputs".to_string()];
        args.extend(self.inputs.iter().cloned());
        args.extend([
            "--config".to_string(),
            self.config_path.to_string_lossy().into_owned(),
            "--output".to_string(),
            self.output_stub.to_string_lossy().into_owned(),
            "--seed".to_string(),
            self.seed.to_string(),
            "--run".to_string(),
        ]);
        if let Some(edl) = &self.edl_path {
            args.push("--edl".to_string());
            args.push(edl.to_string_lossy().into_owned());
        }
        args
    }
}

/// Outcome of one pipeline invocation.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Pipeline exit code.
    pub exit_code: i32,

    /// Decision log path, if one was requested.
    pub edl_path: Option<PathBuf>,

    /// File the pipeline rendered for the primary deliverable.
    pub output_path: PathBuf,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Last lines of pipeline output.
    pub tail: Vec<String>,
}

impl RunResult {
    /// Whether the pipeline exited cleanly.
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs the external pipeline command.
#[derive(Debug, Clone)]
pub struct PipelineInvoker {
    command: ToolCommand,
    ctx: ExecContext,
    deliverable_suffix: String,
}

impl PipelineInvoker {
    /// `deliverable_suffix` names the primary deliverable in output files
    /// (e.g. `9x16`).
    pub fn new(
        command: ToolCommand,
        ctx: ExecContext,
        deliverable_suffix: impl Into<String>,
    ) -> Self {
        Self {
            command,
            ctx,
            deliverable_suffix: deliverable_suffix.into(),
        }
    }

    /// Run the pipeline once and wait for it to exit.
    pub async fn invoke(
        &self,
        stage: Stage,
        request: &RunRequest,
        sink: &mut LogSink,
    ) -> Result<RunResult> {
        info!(
            stage = %stage,
            seed = request.seed,
            output = %request.output_stub.display(),
            "Invoking pipeline"
        );
        let step =
            StepRunner::execute(stage, &self.command, &request.to_args(), &self.ctx, sink).await?;

        Ok(RunResult {
            exit_code: step.exit_code,
            edl_path: request.edl_path.clone(),
            output_path: resolve_output(&request.output_stub, &self.deliverable_suffix),
            duration_ms: step.duration_ms,
            tail: step.tail,
        })
    }
}
