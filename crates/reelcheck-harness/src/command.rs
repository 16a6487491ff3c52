//! External collaborator command lines.

use serde::{Deserialize, Serialize};

/// The three external tools the harness drives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Collaborator {
    /// Readiness check; exit-code-only contract.
    Preflight,

    /// The media pipeline under test.
    Pipeline,

    /// Determinism oracle over two runs.
    Comparator,
}

impl Collaborator {
    /// Get the collaborator name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Collaborator::Preflight => "preflight",
            Collaborator::Pipeline => "pipeline",
            Collaborator::Comparator => "comparator",
        }
    }
}

/// A program plus the fixed arguments that precede per-run arguments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCommand {
    /// Executable name or path.
    pub program: String,

    /// Leading arguments (e.g. `-m mini.cli pipeline`).
    pub args: Vec<String>,
}

impl ToolCommand {
    /// Create a command from a program and leading arguments.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Split a command line on whitespace. Returns `None` for a blank line.
    ///
    /// No quoting rules apply; paths containing spaces must be given via
    /// [`ToolCommand::new`].
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let program = words.next()?;
        Some(Self::new(program, words))
    }

    /// Full argument vector: leading arguments followed by `extra`.
    pub fn argv(&self, extra: &[String]) -> Vec<String> {
        self.args.iter().chain(extra).cloned().collect()
    }

    /// Human-readable command line.
    pub fn display(&self, extra: &[String]) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .chain(extra.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Command lines for every collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExternalTools {
    pub preflight: ToolCommand,
    pub pipeline: ToolCommand,
    pub comparator: ToolCommand,
}

impl Default for ExternalTools {
    fn default() -> Self {
        Self {
            preflight: ToolCommand::new("python", ["tools/preflight.py"]),
            pipeline: ToolCommand::new("python", ["-m", "mini.cli", "pipeline"]),
            comparator: ToolCommand::new("python", ["tools/validate_outputs.py"]),
        }
    }
}

impl ExternalTools {
    /// Iterate collaborators in the order the harness uses them.
    pub fn iter(&self) -> impl Iterator<Item = (Collaborator, &ToolCommand)> {
        [
            (Collaborator::Preflight, &self.preflight),
            (Collaborator::Pipeline, &self.pipeline),
            (Collaborator::Comparator, &self.comparator),
        ]
        .into_iter()
    }

    /// Replace the command for one collaborator.
    pub fn set(&mut self, collaborator: Collaborator, command: ToolCommand) {
        match collaborator {
            Collaborator::Preflight => self.preflight = command,
            Collaborator::Pipeline => self.pipeline = command,
            Collaborator::Comparator => self.comparator = command,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_line() {
        let cmd = ToolCommand::parse("python -m mini.cli  pipeline").unwrap();
        assert_eq!(cmd.program, "python");
        assert_eq!(cmd.args, vec!["-m", "mini.cli", "pipeline"]);
    }

    #[test]
    fn test_parse_blank_is_none() {
        assert!(ToolCommand::parse("   ").is_none());
    }

    #[test]
    fn test_argv_appends_extra() {
        let cmd = ToolCommand::new("sh", ["stub.sh"]);
        let argv = cmd.argv(&["--seed".to_string(), "42".to_string()]);
        assert_eq!(argv, vec!["stub.sh", "--seed", "42"]);
    }

    #[test]
    fn test_display() {
        let cmd = ToolCommand::new("python", ["tools/preflight.py"]);
        assert_eq!(cmd.display(&[]), "python tools/preflight.py");
    }

    #[test]
    fn test_default_tools() {
        let tools = ExternalTools::default();
        assert_eq!(tools.pipeline.args, vec!["-m", "mini.cli", "pipeline"]);
        let names: Vec<_> = tools.iter().map(|(c, _)| c.name()).collect();
        assert_eq!(names, vec!["preflight", "pipeline", "comparator"]);
    }

    #[test]
    fn test_set_replaces_one_collaborator() {
        let mut tools = ExternalTools::default();
        tools.set(Collaborator::Preflight, ToolCommand::new("true", Vec::<String>::new()));
        assert_eq!(tools.preflight.program, "true");
        assert_eq!(tools.pipeline.program, "python");
    }
}
