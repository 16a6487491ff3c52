//! reelcheck core - data model for the deterministic dual-run harness
//!
//! Provides the pieces of the harness that never touch a subprocess:
//! - Loading a pipeline configuration and normalizing its deliverables
//! - Deriving the transient "fast" configuration used for quick iteration
//! - Computing the output file names the pipeline is expected to produce
//! - The error taxonomy and stage names shared by every crate

pub mod config;
pub mod error;
pub mod fast;
pub mod paths;
pub mod stage;
pub mod telemetry;

pub use config::{ratio_suffix, PipelineConfig, RenderSettings, DEFAULT_DELIVERABLE};
pub use error::{HarnessError, Result};
pub use fast::{derive_fast_config, write_fast_config, DerivedConfig, FAST_CONFIG_FILE_NAME};
pub use paths::{resolve_output, second_run_stub, DEFAULT_MEDIA_EXTENSION};
pub use stage::Stage;
pub use telemetry::{init_tracing, SUBPROCESS_TARGET};
