//! Explicit subprocess environment and tool resolution.
//!
//! The harness never mutates its own environment. Everything a subprocess
//! should see beyond the inherited environment (virtualenv `PATH`,
//! encoding and verbosity variables) lives in a [`ProcessEnv`] that is
//! applied to each command individually.

use reelcheck_core::{HarnessError, Result};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::command::{Collaborator, ExternalTools, ToolCommand};

/// Variables every subprocess receives unless overridden.
pub const DEFAULT_VARS: [(&str, &str); 2] =
    [("PYTHONIOENCODING", "utf-8"), ("PYTHONUNBUFFERED", "1")];

/// Variables and search path applied to each subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEnv {
    vars: BTreeMap<String, String>,
    path: Option<OsString>,
}

impl Default for ProcessEnv {
    fn default() -> Self {
        Self {
            vars: DEFAULT_VARS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            path: None,
        }
    }
}

impl ProcessEnv {
    /// Default variables plus the `PATH` this process was started with.
    pub fn inherit_path() -> Self {
        Self {
            path: std::env::var_os("PATH"),
            ..Default::default()
        }
    }

    /// Set or override one variable.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Look up a variable set on this environment.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// The `PATH` handed to subprocesses and used for tool resolution.
    pub fn search_path(&self) -> Option<&OsString> {
        self.path.as_ref()
    }

    /// Activate a virtualenv for subprocesses: prepend its bin directory to
    /// `PATH` and set `VIRTUAL_ENV`.
    pub fn activate_venv(&mut self, venv: &Path) -> Result<()> {
        let bin = venv_bin_dir(venv)?;
        let mut dirs = vec![bin];
        if let Some(existing) = &self.path {
            dirs.extend(std::env::split_paths(existing));
        }
        let joined = std::env::join_paths(dirs).map_err(|e| {
            HarnessError::EnvironmentNotReady(format!("cannot build PATH for venv: {e}"))
        })?;
        self.path = Some(joined);
        self.set("VIRTUAL_ENV", venv.to_string_lossy());
        Ok(())
    }

    /// Apply variables and search path to a command.
    pub fn apply(&self, cmd: &mut Command) {
        cmd.envs(&self.vars);
        if let Some(path) = &self.path {
            cmd.env("PATH", path);
        }
    }
}

/// Parse a `KEY=VALUE` assignment.
pub fn parse_assignment(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}

/// Directory holding a virtualenv's executables.
pub fn venv_bin_dir(venv: &Path) -> Result<PathBuf> {
    if !venv.is_dir() {
        return Err(HarnessError::EnvironmentNotReady(format!(
            "virtualenv {} does not exist",
            venv.display()
        )));
    }
    let bin = if cfg!(windows) {
        venv.join("Scripts")
    } else {
        venv.join("bin")
    };
    if !bin.is_dir() {
        return Err(HarnessError::EnvironmentNotReady(format!(
            "virtualenv {} has no {} directory",
            venv.display(),
            bin.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
        )));
    }
    Ok(bin)
}

/// Everything a step needs besides its command line.
#[derive(Debug, Clone)]
pub struct ExecContext {
    /// Environment applied to the subprocess.
    pub env: ProcessEnv,

    /// Working directory; relative paths in arguments resolve against it.
    pub working_dir: Option<PathBuf>,

    /// Kill the subprocess after this long. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl ExecContext {
    /// Directory relative paths are resolved against.
    pub fn base_dir(&self) -> Result<PathBuf> {
        match &self.working_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }

    /// Resolve `path` against the working directory.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf> {
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            Ok(self.base_dir()?.join(path))
        }
    }
}

/// Resolve every collaborator's program against the explicit search path.
///
/// Returns a copy of `tools` whose programs are absolute paths.
pub fn resolve_tools(tools: &ExternalTools, ctx: &ExecContext) -> Result<ExternalTools> {
    let cwd = ctx.base_dir()?;
    let mut resolved = tools.clone();
    for (collaborator, command) in tools.iter() {
        let program = resolve_program(collaborator, command, ctx.env.search_path(), &cwd)?;
        debug!(collaborator = collaborator.name(), program = %program.display(), "Resolved tool");
        resolved.set(
            collaborator,
            ToolCommand {
                program: program.to_string_lossy().into_owned(),
                args: command.args.clone(),
            },
        );
    }
    Ok(resolved)
}

fn resolve_program(
    collaborator: Collaborator,
    command: &ToolCommand,
    search_path: Option<&OsString>,
    cwd: &Path,
) -> Result<PathBuf> {
    which::which_in(&command.program, search_path, cwd).map_err(|e| {
        HarnessError::EnvironmentNotReady(format!(
            "{} program `{}` is not available: {e}",
            collaborator.name(),
            command.program
        ))
    })
}
