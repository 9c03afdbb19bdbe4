use std::path::PathBuf;
use std::time::Duration;

/// A redaction rule applied to files already copied into the workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSpec {
    /// Glob evaluated relative to the workspace root
    pub glob_pattern: String,
    /// Regular expression to search for
    pub match_pattern: String,
    /// Replacement text, `$1` / `${name}` refer to capture groups
    pub replacement: String,
}

/// A shell command whose merged output is stored in the archive.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub shell_command: String,
    /// Workspace-relative output path, `.log` is appended
    pub relative_output_path: PathBuf,
}

/// Everything a collection run needs, already validated.
///
/// Lists are applied in the order given.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionOptions {
    pub file_wildcards: Vec<String>,
    pub filters: Vec<FilterSpec>,
    pub commands: Vec<CommandSpec>,
    pub service_wildcards: Vec<String>,
    /// Journal lines per service, 0 disables the service phase
    pub service_log_line_count: u32,
    pub command_timeout: Duration,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            file_wildcards: Vec::new(),
            filters: Vec::new(),
            commands: Vec::new(),
            service_wildcards: Vec::new(),
            service_log_line_count: 0,
            command_timeout: Duration::from_secs(10),
        }
    }
}
