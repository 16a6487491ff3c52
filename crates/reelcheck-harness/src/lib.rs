//! reelcheck harness - deterministic dual-run validation
//!
//! Provides a harness that:
//! - Verifies the external tools it drives are resolvable
//! - Runs a preflight check, then the pipeline twice with one seed
//! - Hands both decision logs and renderings to a comparator
//! - Reports a single pass/fail verdict naming the failed stage

pub mod command;
pub mod comparator;
pub mod env;
pub mod harness;
pub mod invoker;
pub mod report;
pub mod runner;
pub mod sink;

// Re-export key types
pub use command::{Collaborator, ExternalTools, ToolCommand};
pub use comparator::{ComparisonOutcome, ComparisonRequest, OutputComparator};
pub use env::{parse_assignment, ExecContext, ProcessEnv};
pub use harness::{Harness, HarnessSettings, DEFAULT_SEED, DEFAULT_TIMEOUT_SECS};
pub use invoker::{PipelineInvoker, RunRequest, RunResult};
pub use report::{Artifacts, HarnessReport, StepRecord, Verdict};
pub use runner::{StepOutput, StepRunner};
pub use sink::LogSink;
