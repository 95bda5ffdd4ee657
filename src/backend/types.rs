//! Purpose: Typed arguments and results exchanged between tools and the command backend.
//! Exports: one `*Args` struct per tool input shape and one result struct per output shape.
//! Role: Serde boundary; tool arguments decode into these and results encode from them.
//! Invariants: Backend failures are expressed in the result (`success: false`, `error`),
//! never as protocol errors.

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Arguments for tools that take none. Unknown fields are ignored.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct NoArgs {}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProjectArgs {
    #[serde(default)]
    pub project: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct BuildArgs {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub config: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SwitchBuildConfigArgs {
    #[serde(default)]
    pub project: Option<String>,
    pub config: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FileArgs {
    pub path: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SetTextArgs {
    pub path: String,
    pub text: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FindFilesArgs {
    #[serde(default)]
    pub project: Option<String>,
    pub pattern: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PatternArgs {
    pub pattern: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SearchOptions {
    pub pattern: String,
    #[serde(default)]
    pub regex: bool,
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SearchInFileArgs {
    pub path: String,
    #[serde(flatten)]
    pub search: SearchOptions,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SearchInFilesArgs {
    pub paths: Vec<String>,
    #[serde(flatten)]
    pub search: SearchOptions,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SearchInDirectoryArgs {
    pub directory: String,
    #[serde(default)]
    pub file_pattern: Option<String>,
    #[serde(flatten)]
    pub search: SearchOptions,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ReplaceInFileArgs {
    pub path: String,
    pub replacement: String,
    #[serde(flatten)]
    pub search: SearchOptions,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ReplaceInFilesArgs {
    pub paths: Vec<String>,
    pub replacement: String,
    #[serde(flatten)]
    pub search: SearchOptions,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ReplaceInDirectoryArgs {
    pub directory: String,
    pub replacement: String,
    #[serde(default)]
    pub file_pattern: Option<String>,
    #[serde(flatten)]
    pub search: SearchOptions,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SessionArgs {
    pub name: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ExecuteCommandArgs {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_directory: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct OperationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProjectInfo {
    pub name: String,
    pub path: String,
    pub kind: String,
    pub active_build_config: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProjectList {
    pub projects: Vec<ProjectInfo>,
    pub current: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CurrentProject {
    pub project: Option<ProjectInfo>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DependencyList {
    pub success: bool,
    pub project: Option<String>,
    pub dependencies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BuildConfigInfo {
    pub name: String,
    pub command: String,
    pub active: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BuildConfigList {
    pub success: bool,
    pub project: Option<String>,
    pub configs: Vec<BuildConfigInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CurrentBuildConfig {
    pub project: Option<String>,
    pub config: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    #[default]
    Idle,
    Running,
    Succeeded,
    Failed,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BuildStatus {
    pub state: BuildState,
    pub project: Option<String>,
    pub config: Option<String>,
    pub exit_code: Option<i32>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub output_tail: Vec<String>,
    pub issue_count: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BuildResult {
    pub success: bool,
    pub status: BuildStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BuildResult {
    pub fn failed(status: BuildStatus, error: impl Into<String>) -> Self {
        Self {
            success: false,
            status,
            error: Some(error.into()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub file: String,
    pub line: u32,
    pub column: Option<u32>,
    pub severity: Severity,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IssueList {
    pub issues: Vec<Issue>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DebugResult {
    pub success: bool,
    pub running: bool,
    pub project: Option<String>,
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FileText {
    pub success: bool,
    pub path: String,
    pub text: Option<String>,
    pub open: bool,
    pub modified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FileList {
    pub success: bool,
    pub files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileList {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            files: Vec::new(),
            error: Some(error.into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SearchMatch {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub text: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    pub success: bool,
    pub matches: Vec<SearchMatch>,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SearchResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FileReplacement {
    pub file: String,
    pub count: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReplaceResult {
    pub success: bool,
    pub replacements: usize,
    pub files: Vec<FileReplacement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReplaceResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SessionList {
    pub sessions: Vec<String>,
    pub current: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CurrentSession {
    pub session: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandOutput {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}
