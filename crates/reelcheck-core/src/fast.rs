//! Fast-mode configuration derivation.
//!
//! A fast configuration renders a single short vertical reel at the
//! fastest encoder preset. It is written next to the source configuration
//! under a fixed name and removed when its [`DerivedConfig`] guard drops.

use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::{PipelineConfig, RenderSettings, DEFAULT_DELIVERABLE};
use crate::error::{HarnessError, Result};

/// File name of the derived configuration, created beside the source.
pub const FAST_CONFIG_FILE_NAME: &str = "reelcheck.fast.json";

/// Duration ceiling (seconds) forced by fast mode.
pub const FAST_MAX_DURATION: f64 = 20.0;

/// Encoder preset forced by fast mode.
pub const FAST_PRESET: &str = "ultrafast";

/// Constant rate factor forced by fast mode.
pub const FAST_CRF: u32 = 28;

/// Build the fast variant of `source`. Pass-through fields are kept.
pub fn derive_fast_config(source: &PipelineConfig) -> PipelineConfig {
    let mut derived = source.clone();
    derived.deliverables = vec![DEFAULT_DELIVERABLE.to_string()];
    derived.max_duration = Some(Value::from(FAST_MAX_DURATION));

    let render = derived.render.get_or_insert_with(RenderSettings::default);
    render.preset = Some(Value::from(FAST_PRESET));
    render.crf = Some(Value::from(FAST_CRF));

    derived
}

/// Derive the fast configuration for the document at `source_path` and
/// write it beside the source. Overwrites any previous derivation.
///
/// Refuses a source that is itself named like a derived config, since the
/// write would replace it and the guard would then delete it.
pub fn write_fast_config(source_path: &Path, source: &PipelineConfig) -> Result<DerivedConfig> {
    let path = fast_config_path(source_path);
    if source_path.file_name() == path.file_name() {
        return Err(HarnessError::ConfigParse {
            path: source_path.to_path_buf(),
            message: format!("{FAST_CONFIG_FILE_NAME} is reserved for derived configs"),
        });
    }
    let derived = derive_fast_config(source);
    std::fs::write(&path, derived.to_json_pretty()?)?;
    debug!(path = %path.display(), "Wrote fast config");
    Ok(DerivedConfig {
        path,
        config: derived,
        remove_on_drop: true,
    })
}

/// Location of the derived configuration for a given source path.
pub fn fast_config_path(source_path: &Path) -> PathBuf {
    match source_path.parent() {
        Some(parent) => parent.join(FAST_CONFIG_FILE_NAME),
        None => PathBuf::from(FAST_CONFIG_FILE_NAME),
    }
}

/// Owner of a derived configuration file. The file is deleted on drop.
#[derive(Debug)]
pub struct DerivedConfig {
    path: PathBuf,
    config: PipelineConfig,
    remove_on_drop: bool,
}

impl DerivedConfig {
    /// Path of the derived document on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The derived configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Keep the file on disk and return its path.
    pub fn persist(mut self) -> PathBuf {
        self.remove_on_drop = false;
        self.path.clone()
    }
}

impl Drop for DerivedConfig {
    fn drop(&mut self) {
        if !self.remove_on_drop {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed fast config"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove fast config"),
        }
    }
}
