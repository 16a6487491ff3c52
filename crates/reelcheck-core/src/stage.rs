//! Harness stages.

use serde::{Deserialize, Serialize};

/// One step of the harness control sequence.
///
/// The sequence is linear: `Init -> Preflight -> [FastDerive] -> Run1 -> Run2 -> Validation`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Environment check and configuration loading.
    Init,

    /// External readiness check.
    Preflight,

    /// Fast-mode configuration derivation.
    FastDerive,

    /// First pipeline invocation.
    Run1,

    /// Second pipeline invocation, same seed and config.
    Run2,

    /// Comparator over both runs.
    Validation,
}

impl Stage {
    /// Get the stage name as printed in diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Init => "Init",
            Stage::Preflight => "Preflight",
            Stage::FastDerive => "Fast derive",
            Stage::Run1 => "Run 1",
            Stage::Run2 => "Run 2",
            Stage::Validation => "Validation",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
