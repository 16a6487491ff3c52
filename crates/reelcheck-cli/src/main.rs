//! reelcheck - deterministic dual-run validation for media pipelines
//!
//! Runs a pipeline twice with one seed and asks a comparator whether the
//! two runs made the same decisions.
//!
//! ## Commands
//!
//! - `validate`: preflight, two seeded runs, comparison
//! - `preflight`: environment and readiness check only
//! - `derive-fast`: write the fast iteration config beside a source config

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use reelcheck_core::{write_fast_config, PipelineConfig};
use reelcheck_harness::{
    parse_assignment, Harness, HarnessReport, HarnessSettings, ToolCommand, Verdict, DEFAULT_SEED,
    DEFAULT_TIMEOUT_SECS,
};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{info, warn, Level};

const DEFAULT_CONFIG: &str = "config_gpt_mini_amp.json";
const DEFAULT_INPUTS: &str = "input";
const DEFAULT_OUTPUT: &str = "recap.mp4";
const DEFAULT_FAST_OUTPUT: &str = "recap_fast.mp4";

#[derive(Parser)]
#[command(name = "reelcheck")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Deterministic dual-run validation for media pipelines", long_about = None)]
struct Cli {
    /// Enable verbose output (includes subprocess output)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline twice with one seed and compare the results
    Validate {
        #[command(flatten)]
        run: RunArgs,

        #[command(flatten)]
        setup: SetupArgs,

        /// Write the harness report as JSON
        #[arg(long, env = "REELCHECK_REPORT")]
        report: Option<PathBuf>,
    },

    /// Check the environment and run the preflight tool only
    Preflight {
        #[command(flatten)]
        setup: SetupArgs,

        /// Write the harness report as JSON
        #[arg(long, env = "REELCHECK_REPORT")]
        report: Option<PathBuf>,
    },

    /// Write the fast config beside a source config and print its path
    DeriveFast {
        /// Source pipeline configuration
        #[arg(short, long, default_value = DEFAULT_CONFIG, env = "REELCHECK_CONFIG")]
        config: PathBuf,
    },
}

/// What the two runs are asked to produce.
#[derive(Args)]
struct RunArgs {
    /// Input sources (files, directories or globs), passed to the pipeline as-is
    #[arg(short, long, num_args = 1.., default_value = DEFAULT_INPUTS)]
    inputs: Vec<String>,

    /// Output stub for the first run (default: recap.mp4, recap_fast.mp4 with --fast)
    #[arg(short, long, env = "REELCHECK_OUTPUT")]
    output: Option<PathBuf>,

    /// Seed shared by both runs
    #[arg(short, long, default_value_t = DEFAULT_SEED, env = "REELCHECK_SEED")]
    seed: u64,

    /// Run against a derived fast configuration
    #[arg(long, env = "REELCHECK_FAST")]
    fast: bool,

    /// Decision log written by the first run
    #[arg(long, default_value = "edl_run1.json")]
    edl1: PathBuf,

    /// Decision log written by the second run
    #[arg(long, default_value = "edl_run2.json")]
    edl2: PathBuf,
}

/// Where and how collaborators run.
#[derive(Args)]
struct SetupArgs {
    /// Pipeline configuration document
    #[arg(short, long, default_value = DEFAULT_CONFIG, env = "REELCHECK_CONFIG")]
    config: PathBuf,

    /// Virtualenv whose executables take precedence on PATH
    #[arg(long, env = "REELCHECK_VENV")]
    venv: Option<PathBuf>,

    /// Extra subprocess environment variable (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_assignment)]
    env_vars: Vec<(String, String)>,

    /// Preflight command line
    #[arg(long, value_name = "CMD", value_parser = parse_tool, env = "REELCHECK_PREFLIGHT_CMD")]
    preflight_cmd: Option<ToolCommand>,

    /// Pipeline command line
    #[arg(long, value_name = "CMD", value_parser = parse_tool, env = "REELCHECK_PIPELINE_CMD")]
    pipeline_cmd: Option<ToolCommand>,

    /// Comparator command line
    #[arg(long, value_name = "CMD", value_parser = parse_tool, env = "REELCHECK_COMPARATOR_CMD")]
    comparator_cmd: Option<ToolCommand>,

    /// Directory subprocesses run in (default: current directory)
    #[arg(long, env = "REELCHECK_WORKING_DIR")]
    working_dir: Option<PathBuf>,

    /// Persist all subprocess output to this file
    #[arg(long, env = "REELCHECK_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Per-step timeout in seconds (0 disables)
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, env = "REELCHECK_TIMEOUT_SECS")]
    timeout_secs: u64,
}

fn parse_tool(raw: &str) -> std::result::Result<ToolCommand, String> {
    ToolCommand::parse(raw).ok_or_else(|| "command line is empty".to_string())
}

impl SetupArgs {
    fn apply(self, settings: &mut HarnessSettings) {
        settings.venv = self.venv;
        settings.env.extend(self.env_vars);
        if let Some(cmd) = self.preflight_cmd {
            settings.tools.preflight = cmd;
        }
        if let Some(cmd) = self.pipeline_cmd {
            settings.tools.pipeline = cmd;
        }
        if let Some(cmd) = self.comparator_cmd {
            settings.tools.comparator = cmd;
        }
        settings.working_dir = self.working_dir;
        settings.log_file = self.log_file;
        settings.timeout = (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs));
    }
}

fn validate_settings(run: RunArgs, setup: SetupArgs) -> HarnessSettings {
    let output = run.output.unwrap_or_else(|| {
        PathBuf::from(if run.fast {
            DEFAULT_FAST_OUTPUT
        } else {
            DEFAULT_OUTPUT
        })
    });
    let mut settings = HarnessSettings::new(run.inputs, setup.config.clone(), output);
    settings.seed = run.seed;
    settings.fast = run.fast;
    settings.edl1 = run.edl1;
    settings.edl2 = run.edl2;
    setup.apply(&mut settings);
    settings
}

fn preflight_settings(setup: SetupArgs) -> HarnessSettings {
    let mut settings = HarnessSettings::new(Vec::new(), setup.config.clone(), DEFAULT_OUTPUT);
    setup.apply(&mut settings);
    settings
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    reelcheck_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Validate { run, setup, report } => {
            let harness = Harness::new(validate_settings(run, setup));
            match until_interrupted(harness.run(), ctrl_c()).await {
                Some(result) => finish(&result, report.as_deref(), "Both runs agree"),
                None => Ok(interrupted()),
            }
        }
        Commands::Preflight { setup, report } => {
            let harness = Harness::new(preflight_settings(setup));
            match until_interrupted(harness.preflight(), ctrl_c()).await {
                Some(result) => finish(&result, report.as_deref(), "Environment ready"),
                None => Ok(interrupted()),
            }
        }
        Commands::DeriveFast { config } => cmd_derive_fast(&config),
    }
}

/// Race a harness execution against `interrupt`. Losing the race drops
/// the execution, which kills the running step and removes any derived
/// config.
async fn until_interrupted<R, I>(run: R, interrupt: I) -> Option<HarnessReport>
where
    R: Future<Output = HarnessReport>,
    I: Future<Output = ()>,
{
    tokio::select! {
        report = run => Some(report),
        () = interrupt => None,
    }
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

fn interrupted() -> ExitCode {
    println!();
    println!("✗ Interrupted: running step stopped, transient config removed");
    ExitCode::FAILURE
}

fn finish(report: &HarnessReport, report_path: Option<&Path>, success: &str) -> Result<ExitCode> {
    print_summary(report, success);

    if let Some(path) = report_path {
        report
            .write_json(path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "Wrote report");
    }

    Ok(if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_summary(report: &HarnessReport, success: &str) {
    println!();
    println!("Run ID: {}", report.run_id);
    println!(
        "Seed: {}{}",
        report.seed,
        if report.fast { " (fast mode)" } else { "" }
    );
    if let Some(config) = &report.config_path {
        println!("Config: {}", config.display());
    }
    println!("Duration: {}ms", report.duration_ms);
    println!();

    for step in &report.steps {
        let status = if step.passed { "✓" } else { "✗" };
        match step.exit_code {
            Some(code) => println!(
                "  {} {} ({}ms, exit code: {})",
                status, step.stage, step.duration_ms, code
            ),
            None => println!("  {} {} ({}ms)", status, step.stage, step.duration_ms),
        }
    }
    println!();

    match &report.verdict {
        Verdict::Pass => {
            println!("✓ {success}");
            if let Some(artifacts) = &report.artifacts {
                println!("  {} / {}", artifacts.edl1.display(), artifacts.edl2.display());
                if let (Some(a), Some(b)) = (&artifacts.vid1_sha256, &artifacts.vid2_sha256) {
                    let same = if a == b { "identical" } else { "different" };
                    println!("  renderings: {same} bytes (sha256 {})", short_digest(a));
                }
            }
        }
        Verdict::Fail {
            stage,
            message,
            log_tail,
        } => {
            println!("✗ FAILED at {stage}: {message}");
            if !log_tail.is_empty() {
                println!();
                println!("Last output:");
                for line in log_tail {
                    println!("  | {line}");
                }
            }
            if let Some(log) = &report.log_file {
                println!();
                println!("Full log: {}", log.display());
            }
        }
    }
}

fn short_digest(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}

fn cmd_derive_fast(config: &Path) -> Result<ExitCode> {
    let source = PipelineConfig::load(config)
        .with_context(|| format!("Failed to load config {}", config.display()))?;
    let derived = write_fast_config(config, &source).context("Failed to write fast config")?;
    let path = derived.persist();
    info!(path = %path.display(), "Fast config written");
    println!("{}", path.display());
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_validate_defaults() {
        let cli = Cli::try_parse_from(["reelcheck", "validate"]).unwrap();
        let Commands::Validate { run, setup, report } = cli.command else {
            panic!("expected validate");
        };
        assert!(report.is_none());

        let settings = validate_settings(run, setup);
        assert_eq!(settings.inputs, vec!["input"]);
        assert_eq!(settings.config_path, PathBuf::from(DEFAULT_CONFIG));
        assert_eq!(settings.output, PathBuf::from("recap.mp4"));
        assert_eq!(settings.seed, 42);
        assert!(!settings.fast);
        assert_eq!(settings.timeout, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_fast_mode_changes_default_output() {
        let cli = Cli::try_parse_from(["reelcheck", "validate", "--fast"]).unwrap();
        let Commands::Validate { run, setup, .. } = cli.command else {
            panic!("expected validate");
        };
        let settings = validate_settings(run, setup);
        assert!(settings.fast);
        assert_eq!(settings.output, PathBuf::from("recap_fast.mp4"));
    }

    #[test]
    fn test_validate_overrides() {
        let cli = Cli::try_parse_from([
            "reelcheck",
            "validate",
            "--inputs",
            "a.mp4",
            "b.mov",
            "--seed",
            "7",
            "--env",
            "MINI_LOG=debug",
            "--pipeline-cmd",
            "mini pipeline --quiet",
            "--timeout-secs",
            "0",
        ])
        .unwrap();
        let Commands::Validate { run, setup, .. } = cli.command else {
            panic!("expected validate");
        };
        let settings = validate_settings(run, setup);

        assert_eq!(settings.inputs, vec!["a.mp4", "b.mov"]);
        assert_eq!(settings.seed, 7);
        assert_eq!(settings.env.get("MINI_LOG").map(String::as_str), Some("debug"));
        assert_eq!(settings.tools.pipeline.program, "mini");
        assert_eq!(settings.tools.pipeline.args, vec!["pipeline", "--quiet"]);
        assert_eq!(settings.timeout, None);
    }

    #[test]
    fn test_bad_env_assignment_rejected() {
        assert!(Cli::try_parse_from(["reelcheck", "validate", "--env", "NOEQUALS"]).is_err());
    }

    #[test]
    fn test_blank_tool_command_rejected() {
        assert!(Cli::try_parse_from(["reelcheck", "preflight", "--comparator-cmd", "  "]).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_interrupt_removes_fast_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), r#"{"deliverables": ["16:9"]}"#).unwrap();
        std::fs::write(dir.path().join("hang.sh"), "exec sleep 30\n").unwrap();

        let mut settings =
            HarnessSettings::new(vec!["clips".to_string()], "config.json", "recap.mp4");
        settings.fast = true;
        settings.working_dir = Some(dir.path().to_path_buf());
        settings.tools.preflight = ToolCommand::new("true", Vec::<String>::new());
        settings.tools.pipeline =
            ToolCommand::new("sh", [dir.path().join("hang.sh").to_string_lossy().into_owned()]);
        settings.tools.comparator = ToolCommand::new("true", Vec::<String>::new());
        let harness = Harness::new(settings);

        let derived = dir.path().join(reelcheck_core::FAST_CONFIG_FILE_NAME);
        let interrupt = async {
            while !derived.exists() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };

        let outcome = until_interrupted(harness.run(), interrupt).await;
        assert!(outcome.is_none());
        assert!(!derived.exists());
    }

    #[tokio::test]
    async fn test_completed_run_wins_the_race() {
        let harness = Harness::new(HarnessSettings::new(Vec::new(), "missing.json", "recap.mp4"));
        let outcome = until_interrupted(harness.preflight(), std::future::pending()).await;
        assert!(outcome.is_some_and(|report| !report.passed()));
    }

    #[test]
    fn test_short_digest() {
        assert_eq!(short_digest("abcdef0123456789"), "abcdef012345");
        assert_eq!(short_digest("abc"), "abc");
    }
}
