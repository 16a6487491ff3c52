//! Dual-run harness sequencing.
//!
//! `Init -> Preflight -> [FastDerive] -> Run1 -> Run2 -> Validation`, strictly
//! sequential, aborting on the first failure. A derived fast configuration
//! is owned by the running session and removed whichever way the sequence
//! ends.

use chrono::Utc;
use reelcheck_core::{
    ratio_suffix, second_run_stub, write_fast_config, DerivedConfig, HarnessError,
    PipelineConfig, Result, Stage,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::command::ExternalTools;
use crate::comparator::{ComparisonRequest, OutputComparator};
use crate::env::{resolve_tools, ExecContext, ProcessEnv};
use crate::invoker::{PipelineInvoker, RunRequest, RunResult};
use crate::report::{digest_file, Artifacts, HarnessReport, StepRecord, Verdict};
use crate::runner::StepRunner;
use crate::sink::LogSink;

/// Seed used when none is given.
pub const DEFAULT_SEED: u64 = 42;

/// Per-step time budget used when none is given.
pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// Everything one harness execution needs.
#[derive(Debug, Clone)]
pub struct HarnessSettings {
    /// Input sources handed to the pipeline unchanged.
    pub inputs: Vec<String>,

    /// Pipeline configuration document.
    pub config_path: PathBuf,

    /// Output stub for the first run; the second run inserts `_r2`.
    pub output: PathBuf,

    /// Seed shared by both runs.
    pub seed: u64,

    /// Run against a derived fast configuration.
    pub fast: bool,

    /// Decision log written by the first run.
    pub edl1: PathBuf,

    /// Decision log written by the second run.
    pub edl2: PathBuf,

    /// Collaborator command lines.
    pub tools: ExternalTools,

    /// Virtualenv whose executables should win on `PATH`.
    pub venv: Option<PathBuf>,

    /// Extra variables for every subprocess.
    pub env: BTreeMap<String, String>,

    /// Persistent log of all subprocess output.
    pub log_file: Option<PathBuf>,

    /// Per-step time budget. `None` waits forever.
    pub timeout: Option<Duration>,

    /// Directory subprocesses run in; relative paths resolve against it.
    pub working_dir: Option<PathBuf>,
}

impl HarnessSettings {
    /// Settings with defaults for everything but the inputs, config and output.
    pub fn new(
        inputs: Vec<String>,
        config_path: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            inputs,
            config_path: config_path.into(),
            output: output.into(),
            seed: DEFAULT_SEED,
            fast: false,
            edl1: PathBuf::from("edl_run1.json"),
            edl2: PathBuf::from("edl_run2.json"),
            tools: ExternalTools::default(),
            venv: None,
            env: BTreeMap::new(),
            log_file: None,
            timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            working_dir: None,
        }
    }
}

/// How far the sequence goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    PreflightOnly,
    Full,
}

/// Output of Init: everything later stages run with.
struct Prepared {
    tools: ExternalTools,
    ctx: ExecContext,
    config_path: PathBuf,
    config: PipelineConfig,
}

/// Mutable state of one execution.
struct Session {
    run_id: Uuid,
    started: Instant,
    stage: Stage,
    steps: Vec<StepRecord>,
    tail: Vec<String>,
    sink: LogSink,
    derived: Option<DerivedConfig>,
    config_path: Option<PathBuf>,
    artifacts: Option<Artifacts>,
}

impl Session {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started: Instant::now(),
            stage: Stage::Init,
            steps: Vec::new(),
            tail: Vec::new(),
            sink: LogSink::tracing_only(),
            derived: None,
            config_path: None,
            artifacts: None,
        }
    }

    fn enter(&mut self, stage: Stage) {
        info!(run_id = %self.run_id, stage = %stage, "Entering stage");
        self.stage = stage;
        self.tail.clear();
    }

    fn record(
        &mut self,
        exit_code: Option<i32>,
        duration_ms: u64,
        passed: bool,
        tail: Vec<String>,
    ) {
        self.steps.push(StepRecord {
            stage: self.stage,
            exit_code,
            duration_ms,
            passed,
        });
        self.tail = tail;
    }
}

/// Deterministic dual-run validation harness.
pub struct Harness {
    settings: HarnessSettings,
}

impl Harness {
    pub fn new(settings: HarnessSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &HarnessSettings {
        &self.settings
    }

    /// Run the full sequence. Always returns a report; failures are in its
    /// verdict.
    pub async fn run(&self) -> HarnessReport {
        self.execute(Scope::Full).await
    }

    /// Run Init and Preflight only.
    pub async fn preflight(&self) -> HarnessReport {
        self.execute(Scope::PreflightOnly).await
    }

    async fn execute(&self, scope: Scope) -> HarnessReport {
        let started_at = Utc::now();
        let mut session = Session::new();
        info!(
            run_id = %session.run_id,
            seed = self.settings.seed,
            fast = self.settings.fast,
            "Starting harness"
        );

        let result = self.sequence(&mut session, scope).await;
        let failed_step_missing = !session.steps.iter().any(|s| s.stage == session.stage);

        // Cleanup runs on every path.
        drop(session.derived.take());

        let verdict = match result {
            Ok(()) => {
                info!(run_id = %session.run_id, "Harness passed");
                Verdict::Pass
            }
            Err(err) => {
                error!(
                    run_id = %session.run_id,
                    stage = %session.stage,
                    error = %err,
                    "Harness failed"
                );
                if failed_step_missing {
                    let tail = std::mem::take(&mut session.tail);
                    session.record(None, 0, false, tail);
                }
                Verdict::Fail {
                    stage: session.stage,
                    message: err.to_string(),
                    log_tail: std::mem::take(&mut session.tail),
                }
            }
        };

        HarnessReport {
            run_id: session.run_id,
            seed: self.settings.seed,
            fast: self.settings.fast,
            config_path: session.config_path,
            started_at,
            finished_at: Utc::now(),
            duration_ms: session.started.elapsed().as_millis() as u64,
            steps: session.steps,
            verdict,
            artifacts: session.artifacts,
            log_file: session.sink.path().map(Path::to_path_buf),
        }
    }

    async fn sequence(&self, session: &mut Session, scope: Scope) -> Result<()> {
        session.enter(Stage::Init);
        let init_start = Instant::now();
        let prepared = self.init(session).await?;
        session.record(None, elapsed_ms(init_start), true, Vec::new());

        session.enter(Stage::Preflight);
        self.run_preflight(session, &prepared).await?;
        if scope == Scope::PreflightOnly {
            return Ok(());
        }

        let (config_path, config) = if self.settings.fast {
            session.enter(Stage::FastDerive);
            let derive_start = Instant::now();
            let derived = write_fast_config(&prepared.config_path, &prepared.config)?;
            let selected = (derived.path().to_path_buf(), derived.config().clone());
            info!(path = %derived.path().display(), "Using fast config");
            session.derived = Some(derived);
            session.record(None, elapsed_ms(derive_start), true, Vec::new());
            selected
        } else {
            (prepared.config_path.clone(), prepared.config.clone())
        };
        session.config_path = Some(config_path.clone());

        let invoker = PipelineInvoker::new(
            prepared.tools.pipeline.clone(),
            prepared.ctx.clone(),
            ratio_suffix(config.primary_deliverable()),
        );
        let first = RunRequest {
            inputs: self.settings.inputs.clone(),
            config_path: config_path.clone(),
            output_stub: self.settings.output.clone(),
            seed: self.settings.seed,
            edl_path: Some(self.settings.edl1.clone()),
        };
        let second = RunRequest {
            output_stub: second_run_stub(&self.settings.output),
            edl_path: Some(self.settings.edl2.clone()),
            ..first.clone()
        };

        let run1 = self.run_pipeline(session, &invoker, Stage::Run1, &first).await?;
        let run2 = self.run_pipeline(session, &invoker, Stage::Run2, &second).await?;

        session.enter(Stage::Validation);
        let comparator =
            OutputComparator::new(prepared.tools.comparator.clone(), prepared.ctx.clone());
        let request = ComparisonRequest {
            config_path,
            edl1: self.settings.edl1.clone(),
            edl2: self.settings.edl2.clone(),
            vid1: run1.output_path,
            vid2: run2.output_path,
        };
        let outcome = comparator.compare(&request, &mut session.sink).await?;
        session.record(
            Some(outcome.exit_code),
            outcome.duration_ms,
            outcome.passed,
            outcome.detail,
        );
        if !outcome.passed {
            return Err(HarnessError::ValidationFailed {
                exit_code: outcome.exit_code,
            });
        }

        session.artifacts = Some(collect_artifacts(&prepared.ctx, request).await);
        Ok(())
    }

    async fn init(&self, session: &mut Session) -> Result<Prepared> {
        let mut env = ProcessEnv::inherit_path();
        if let Some(venv) = &self.settings.venv {
            env.activate_venv(venv)?;
        }
        for (key, value) in &self.settings.env {
            env.set(key.clone(), value.clone());
        }

        let ctx = ExecContext {
            env,
            working_dir: self.settings.working_dir.clone(),
            timeout: self.settings.timeout,
        };
        if let Some(dir) = &ctx.working_dir {
            if !dir.is_dir() {
                return Err(HarnessError::EnvironmentNotReady(format!(
                    "working directory {} does not exist",
                    dir.display()
                )));
            }
        }
        let tools = resolve_tools(&self.settings.tools, &ctx)?;

        let config_path = ctx.resolve(&self.settings.config_path)?;
        if !config_path.exists() {
            return Err(HarnessError::ConfigNotFound(config_path));
        }
        let config_path = config_path.canonicalize()?;
        let config = PipelineConfig::load(&config_path)?;
        info!(
            config = %config_path.display(),
            deliverables = ?config.deliverables,
            "Loaded config"
        );
        session.config_path = Some(config_path.clone());

        if let Some(log_file) = &self.settings.log_file {
            session.sink = LogSink::create(&ctx.resolve(log_file)?).await?;
        }

        Ok(Prepared {
            tools,
            ctx,
            config_path,
            config,
        })
    }

    async fn run_preflight(&self, session: &mut Session, prepared: &Prepared) -> Result<()> {
        let step = StepRunner::execute(
            Stage::Preflight,
            &prepared.tools.preflight,
            &[],
            &prepared.ctx,
            &mut session.sink,
        )
        .await?;
        let passed = step.passed();
        session.record(Some(step.exit_code), step.duration_ms, passed, step.tail);
        if !passed {
            return Err(HarnessError::PreflightFailed {
                exit_code: step.exit_code,
            });
        }
        Ok(())
    }

    async fn run_pipeline(
        &self,
        session: &mut Session,
        invoker: &PipelineInvoker,
        stage: Stage,
        request: &RunRequest,
    ) -> Result<RunResult> {
        session.enter(stage);
        let result = invoker.invoke(stage, request, &mut session.sink).await?;
        session.record(
            Some(result.exit_code),
            result.duration_ms,
            result.succeeded(),
            result.tail.clone(),
        );
        if !result.succeeded() {
            return Err(HarnessError::RunFailed {
                stage,
                exit_code: result.exit_code,
            });
        }
        Ok(result)
    }
}

async fn collect_artifacts(ctx: &ExecContext, request: ComparisonRequest) -> Artifacts {
    let vid1_sha256 = digest_or_warn(ctx, &request.vid1).await;
    let vid2_sha256 = digest_or_warn(ctx, &request.vid2).await;
    Artifacts {
        edl1: request.edl1,
        edl2: request.edl2,
        vid1: request.vid1,
        vid2: request.vid2,
        vid1_sha256,
        vid2_sha256,
    }
}

async fn digest_or_warn(ctx: &ExecContext, path: &Path) -> Option<String> {
    let resolved = ctx.resolve(path).ok()?;
    match digest_file(&resolved).await {
        Ok(digest) => Some(digest),
        Err(e) => {
            warn!(path = %resolved.display(), error = %e, "Could not digest rendered output");
            None
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
