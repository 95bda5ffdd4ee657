//! Purpose: Filesystem-backed command backend over one workspace directory.
//! Exports: `WorkspaceBackend`.
//! Role: Concrete `CommandBackend`; owns projects, open documents, sessions, build and debug state.
//! Invariants: Only the command thread touches this value; build results cross threads via
//! a shared record.
//! Invariants: At most one build and one debug session run at a time.
//! Notes: Relative paths in tool arguments resolve against the workspace root.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info, warn};

use super::issues::parse_issues;
use super::search::{FileFilter, Matcher, walk_files};
use super::types::*;
use super::{CommandBackend, Reply};
use crate::core::error::{Error, ErrorKind};

const OVERRIDE_FILE: &str = ".codebridge.json";
const STATE_DIR: &str = ".codebridge";
const OUTPUT_TAIL_LINES: usize = 40;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ProjectKind {
    Cargo,
    CMake,
    Make,
    Npm,
    Custom,
}

impl ProjectKind {
    fn detect(dir: &Path) -> Option<Self> {
        let markers = [
            ("Cargo.toml", ProjectKind::Cargo),
            ("CMakeLists.txt", ProjectKind::CMake),
            ("Makefile", ProjectKind::Make),
            ("package.json", ProjectKind::Npm),
            (OVERRIDE_FILE, ProjectKind::Custom),
        ];
        markers
            .into_iter()
            .find(|(marker, _)| dir.join(marker).is_file())
            .map(|(_, kind)| kind)
    }

    fn as_str(self) -> &'static str {
        match self {
            ProjectKind::Cargo => "cargo",
            ProjectKind::CMake => "cmake",
            ProjectKind::Make => "make",
            ProjectKind::Npm => "npm",
            ProjectKind::Custom => "custom",
        }
    }

    fn default_configs(self) -> Vec<BuildConfig> {
        let configs: &[(&str, &str)] = match self {
            ProjectKind::Cargo => &[
                ("debug", "cargo build"),
                ("release", "cargo build --release"),
            ],
            ProjectKind::CMake => &[
                (
                    "Debug",
                    "cmake -S . -B build/Debug -DCMAKE_BUILD_TYPE=Debug && cmake --build build/Debug",
                ),
                (
                    "Release",
                    "cmake -S . -B build/Release -DCMAKE_BUILD_TYPE=Release && cmake --build build/Release",
                ),
            ],
            ProjectKind::Make => &[("default", "make")],
            ProjectKind::Npm => &[("default", "npm run build")],
            ProjectKind::Custom => &[],
        };
        configs
            .iter()
            .map(|(name, command)| BuildConfig {
                name: (*name).to_string(),
                command: (*command).to_string(),
            })
            .collect()
    }

    fn default_debug_command(self) -> Option<String> {
        match self {
            ProjectKind::Cargo => Some("cargo run".to_string()),
            ProjectKind::Npm => Some("npm start".to_string()),
            ProjectKind::CMake | ProjectKind::Make | ProjectKind::Custom => None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct BuildConfig {
    name: String,
    command: String,
}

/// Contents of an optional `.codebridge.json` in a project directory.
#[derive(Debug, Default, Deserialize)]
struct ProjectOverride {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    build_configs: Vec<BuildConfig>,
    #[serde(default)]
    debug_command: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
}

#[derive(Clone, Debug)]
struct Project {
    name: String,
    path: PathBuf,
    kind: ProjectKind,
    configs: Vec<BuildConfig>,
    active_config: Option<usize>,
    debug_command: Option<String>,
    dependencies: Vec<String>,
}

impl Project {
    fn load(dir: &Path) -> Option<Self> {
        let kind = ProjectKind::detect(dir)?;
        let overrides = read_override(dir);
        let name = overrides
            .name
            .or_else(|| {
                dir.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "workspace".to_string());
        let configs = if overrides.build_configs.is_empty() {
            kind.default_configs()
        } else {
            overrides.build_configs
        };
        Some(Self {
            name,
            path: dir.to_path_buf(),
            kind,
            active_config: if configs.is_empty() { None } else { Some(0) },
            configs,
            debug_command: overrides
                .debug_command
                .or_else(|| kind.default_debug_command()),
            dependencies: overrides.dependencies,
        })
    }

    fn active_config(&self) -> Option<&BuildConfig> {
        self.active_config.and_then(|idx| self.configs.get(idx))
    }

    fn info(&self) -> ProjectInfo {
        ProjectInfo {
            name: self.name.clone(),
            path: self.path.display().to_string(),
            kind: self.kind.as_str().to_string(),
            active_build_config: self.active_config().map(|config| config.name.clone()),
        }
    }
}

fn read_override(dir: &Path) -> ProjectOverride {
    let path = dir.join(OVERRIDE_FILE);
    let Ok(bytes) = fs::read(&path) else {
        return ProjectOverride::default();
    };
    match serde_json::from_slice(&bytes) {
        Ok(overrides) => overrides,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "ignoring malformed project override");
            ProjectOverride::default()
        }
    }
}

/// The root itself plus each immediate, non-hidden subdirectory that looks like a project.
fn discover_projects(root: &Path) -> Vec<Project> {
    let mut dirs = vec![root.to_path_buf()];
    if let Ok(entries) = fs::read_dir(root) {
        let mut children: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_dir()))
            .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
            .map(|entry| entry.path())
            .collect();
        children.sort();
        dirs.extend(children);
    }
    dirs.iter().filter_map(|dir| Project::load(dir)).collect()
}

#[derive(Debug, Default)]
struct BuildRecord {
    status: BuildStatus,
    issues: Vec<Issue>,
}

struct DebugSession {
    project: String,
    child: Child,
}

#[derive(Debug)]
struct Document {
    text: String,
    modified: bool,
}

#[derive(Debug, Deserialize, Serialize)]
struct SessionFile {
    name: String,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    open_files: Vec<String>,
    #[serde(default)]
    saved_at: Option<String>,
}

type QuitHook = Box<dyn Fn() + Send + 'static>;

pub struct WorkspaceBackend {
    root: PathBuf,
    projects: Vec<Project>,
    current_project: Option<usize>,
    documents: BTreeMap<PathBuf, Document>,
    current_session: Option<String>,
    build: Arc<Mutex<BuildRecord>>,
    debug: Option<DebugSession>,
    on_quit: Option<QuitHook>,
}

impl WorkspaceBackend {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, Error> {
        let root = root.as_ref();
        let root = fs::canonicalize(root).map_err(|err| {
            Error::new(ErrorKind::NotFound)
                .with_message("workspace directory not found")
                .with_path(root)
                .with_hint("Pass an existing directory with --workspace.")
                .with_source(err)
        })?;
        if !root.is_dir() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("workspace is not a directory")
                .with_path(&root)
                .with_hint("Pass a directory with --workspace."));
        }
        let projects = discover_projects(&root);
        info!(root = %root.display(), projects = projects.len(), "workspace opened");
        Ok(Self {
            current_project: if projects.is_empty() { None } else { Some(0) },
            root,
            projects,
            documents: BTreeMap::new(),
            current_session: None,
            build: Arc::new(Mutex::new(BuildRecord::default())),
            debug: None,
            on_quit: None,
        })
    }

    /// Install the action `quit` performs, typically a server shutdown trigger.
    pub fn with_quit_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        self.on_quit = Some(Box::new(hook));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn refresh_projects(&mut self) {
        let current = self.current_project_name();
        let mut fresh = discover_projects(&self.root);
        for project in &mut fresh {
            let previous = self
                .projects
                .iter()
                .find(|old| old.path == project.path)
                .and_then(|old| old.active_config().map(|config| config.name.clone()));
            if let Some(name) = previous {
                if let Some(idx) = project.configs.iter().position(|c| c.name == name) {
                    project.active_config = Some(idx);
                }
            }
        }
        self.projects = fresh;
        self.current_project = current
            .and_then(|name| self.projects.iter().position(|p| p.name == name))
            .or(if self.projects.is_empty() { None } else { Some(0) });
    }

    fn current_project_name(&self) -> Option<String> {
        self.current_project
            .and_then(|idx| self.projects.get(idx))
            .map(|project| project.name.clone())
    }

    fn project_index(&self, name: Option<&str>) -> Result<usize, String> {
        match name {
            Some(name) => self
                .projects
                .iter()
                .position(|project| project.name == name)
                .ok_or_else(|| format!("project not found: {name}")),
            None => self
                .current_project
                .ok_or_else(|| "no current project in workspace".to_string()),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let joined = self.root.join(path);
        fs::canonicalize(&joined).unwrap_or(joined)
    }

    fn display_path(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(relative) => relative.to_string_lossy().replace('\\', "/"),
            Err(_) => path.display().to_string(),
        }
    }

    /// Open buffer contents when the file is open, disk contents otherwise.
    fn read_text(&self, path: &Path) -> io::Result<String> {
        match self.documents.get(path) {
            Some(document) => Ok(document.text.clone()),
            None => fs::read_to_string(path),
        }
    }

    fn build_record(&self) -> MutexGuard<'_, BuildRecord> {
        lock(&self.build)
    }

    fn search_paths(&self, paths: &[PathBuf], matcher: &Matcher, strict: bool) -> SearchResult {
        let mut matches = Vec::new();
        for path in paths {
            match self.read_text(path) {
                Ok(text) => matcher.find_in_text(&self.display_path(path), &text, &mut matches),
                Err(err) if strict => {
                    return SearchResult::failed(format!(
                        "cannot read {}: {err}",
                        self.display_path(path)
                    ));
                }
                Err(err) => debug!(path = %path.display(), error = %err, "skipping unreadable file"),
            }
        }
        SearchResult {
            success: true,
            total: matches.len(),
            matches,
            error: None,
        }
    }

    fn replace_paths(
        &mut self,
        paths: &[PathBuf],
        matcher: &Matcher,
        replacement: &str,
        strict: bool,
    ) -> ReplaceResult {
        let mut files = Vec::new();
        for path in paths {
            let text = match self.read_text(path) {
                Ok(text) => text,
                Err(err) if strict => {
                    return ReplaceResult::failed(format!(
                        "cannot read {}: {err}",
                        self.display_path(path)
                    ));
                }
                Err(_) => continue,
            };
            let (replaced, count) = matcher.replace(&text, replacement);
            if count == 0 {
                continue;
            }
            let shown = self.display_path(path);
            match self.documents.get_mut(path) {
                Some(document) => {
                    document.text = replaced;
                    document.modified = true;
                }
                None => {
                    if let Err(err) = fs::write(path, replaced) {
                        return ReplaceResult::failed(format!("cannot write {shown}: {err}"));
                    }
                }
            }
            files.push(FileReplacement { file: shown, count });
        }
        ReplaceResult {
            success: true,
            replacements: files.iter().map(|file| file.count).sum(),
            files,
            error: None,
        }
    }

    fn directory_files(
        &self,
        directory: &str,
        file_pattern: Option<&str>,
    ) -> Result<Vec<PathBuf>, String> {
        let dir = self.resolve(directory);
        if !dir.is_dir() {
            return Err(format!("not a directory: {directory}"));
        }
        let filter = file_pattern.map(FileFilter::new).transpose()?;
        Ok(walk_files(&dir, filter.as_ref()))
    }

    fn sessions_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR).join("sessions")
    }

    fn session_path(&self, name: &str) -> Result<PathBuf, String> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(format!("invalid session name: {name:?}"));
        }
        Ok(self.sessions_dir().join(format!("{name}.json")))
    }

    fn reap_debug(&mut self) {
        let exited = match self.debug.as_mut() {
            Some(session) => !matches!(session.child.try_wait(), Ok(None)),
            None => false,
        };
        if exited {
            debug!("debug session exited");
            self.debug = None;
        }
    }

    fn debug_result(&self) -> DebugResult {
        match &self.debug {
            Some(session) => DebugResult {
                success: true,
                running: true,
                project: Some(session.project.clone()),
                pid: Some(session.child.id()),
                error: None,
            },
            None => DebugResult {
                success: true,
                ..DebugResult::default()
            },
        }
    }
}

impl Drop for WorkspaceBackend {
    fn drop(&mut self) {
        if let Some(mut session) = self.debug.take() {
            let _ = session.child.kill();
            let _ = session.child.wait();
        }
    }
}

impl CommandBackend for WorkspaceBackend {
    fn list_projects(&mut self) -> ProjectList {
        self.refresh_projects();
        ProjectList {
            projects: self.projects.iter().map(Project::info).collect(),
            current: self.current_project_name(),
        }
    }

    fn get_current_project(&mut self) -> CurrentProject {
        CurrentProject {
            project: self
                .current_project
                .and_then(|idx| self.projects.get(idx))
                .map(Project::info),
        }
    }

    fn list_project_dependencies(&mut self, args: ProjectArgs) -> DependencyList {
        match self.project_index(args.project.as_deref()) {
            Ok(idx) => {
                let project = &self.projects[idx];
                DependencyList {
                    success: true,
                    project: Some(project.name.clone()),
                    dependencies: project.dependencies.clone(),
                    error: None,
                }
            }
            Err(error) => DependencyList {
                error: Some(error),
                ..DependencyList::default()
            },
        }
    }

    fn list_build_configs(&mut self, args: ProjectArgs) -> BuildConfigList {
        match self.project_index(args.project.as_deref()) {
            Ok(idx) => {
                let project = &self.projects[idx];
                BuildConfigList {
                    success: true,
                    project: Some(project.name.clone()),
                    configs: project
                        .configs
                        .iter()
                        .enumerate()
                        .map(|(pos, config)| BuildConfigInfo {
                            name: config.name.clone(),
                            command: config.command.clone(),
                            active: project.active_config == Some(pos),
                        })
                        .collect(),
                    error: None,
                }
            }
            Err(error) => BuildConfigList {
                error: Some(error),
                ..BuildConfigList::default()
            },
        }
    }

    fn switch_build_config(&mut self, args: SwitchBuildConfigArgs) -> OperationResult {
        let idx = match self.project_index(args.project.as_deref()) {
            Ok(idx) => idx,
            Err(error) => return OperationResult::failed(error),
        };
        let project = &mut self.projects[idx];
        match project.configs.iter().position(|c| c.name == args.config) {
            Some(pos) => {
                project.active_config = Some(pos);
                info!(project = %project.name, config = %args.config, "build config switched");
                OperationResult::ok(format!(
                    "active build config for {} is now {}",
                    project.name, args.config
                ))
            }
            None => OperationResult::failed(format!(
                "build config not found for {}: {}",
                project.name, args.config
            )),
        }
    }

    fn get_current_build_config(&mut self) -> CurrentBuildConfig {
        let project = self.current_project.and_then(|idx| self.projects.get(idx));
        CurrentBuildConfig {
            project: project.map(|p| p.name.clone()),
            config: project
                .and_then(Project::active_config)
                .map(|config| config.name.clone()),
        }
    }

    fn build(&mut self, args: BuildArgs, reply: Reply<BuildResult>) {
        let idx = match self.project_index(args.project.as_deref()) {
            Ok(idx) => idx,
            Err(error) => return reply(BuildResult::failed(self.get_build_status(), error)),
        };
        let project = &self.projects[idx];
        let config = match args.config.as_deref() {
            Some(name) => project.configs.iter().find(|c| c.name == name),
            None => project.active_config(),
        };
        let Some(config) = config.cloned() else {
            let error = match args.config {
                Some(name) => format!("build config not found for {}: {name}", project.name),
                None => format!("project {} has no build configuration", project.name),
            };
            return reply(BuildResult::failed(self.get_build_status(), error));
        };

        {
            let mut record = self.build_record();
            if record.status.state == BuildState::Running {
                let status = record.status.clone();
                drop(record);
                return reply(BuildResult::failed(status, "a build is already running"));
            }
            record.issues.clear();
            record.status = BuildStatus {
                state: BuildState::Running,
                project: Some(project.name.clone()),
                config: Some(config.name.clone()),
                started_at: now_rfc3339(),
                ..BuildStatus::default()
            };
        }
        info!(project = %project.name, config = %config.name, "build started");

        let record = Arc::clone(&self.build);
        let dir = project.path.clone();
        let spawned = thread::Builder::new()
            .name("codebridge-build".to_string())
            .spawn(move || {
                let output = shell(&config.command).current_dir(&dir).output();
                reply(finish_build(&record, output));
            });
        if let Err(err) = spawned {
            warn!(error = %err, "failed to start build thread");
            let mut record = self.build_record();
            record.status.state = BuildState::Failed;
            record.status.finished_at = now_rfc3339();
        }
    }

    fn get_build_status(&mut self) -> BuildStatus {
        self.build_record().status.clone()
    }

    fn list_issues(&mut self) -> IssueList {
        IssueList {
            issues: self.build_record().issues.clone(),
        }
    }

    fn list_file_issues(&mut self, args: FileArgs) -> IssueList {
        let wanted = Path::new(&args.path);
        let issues = self
            .build_record()
            .issues
            .iter()
            .filter(|issue| {
                let file = Path::new(&issue.file);
                file.ends_with(wanted) || wanted.ends_with(file)
            })
            .cloned()
            .collect();
        IssueList { issues }
    }

    fn debug(&mut self, args: ProjectArgs, reply: Reply<DebugResult>) {
        self.reap_debug();
        if self.debug.is_some() {
            let mut result = self.debug_result();
            result.success = false;
            result.error = Some("a debug session is already running".to_string());
            return reply(result);
        }
        let idx = match self.project_index(args.project.as_deref()) {
            Ok(idx) => idx,
            Err(error) => {
                return reply(DebugResult {
                    error: Some(error),
                    ..DebugResult::default()
                });
            }
        };
        let project = &self.projects[idx];
        let Some(command) = project.debug_command.clone() else {
            return reply(DebugResult {
                project: Some(project.name.clone()),
                error: Some(format!("project {} has no debug command", project.name)),
                ..DebugResult::default()
            });
        };
        let spawned = shell(&command)
            .current_dir(&project.path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        match spawned {
            Ok(child) => {
                info!(project = %project.name, pid = child.id(), "debug session started");
                self.debug = Some(DebugSession {
                    project: project.name.clone(),
                    child,
                });
                reply(self.debug_result());
            }
            Err(err) => reply(DebugResult {
                project: Some(project.name.clone()),
                error: Some(format!("failed to start debug command: {err}")),
                ..DebugResult::default()
            }),
        }
    }

    fn stop_debug(&mut self) -> DebugResult {
        self.reap_debug();
        let Some(mut session) = self.debug.take() else {
            return DebugResult {
                error: Some("no debug session is running".to_string()),
                ..DebugResult::default()
            };
        };
        let _ = session.child.kill();
        let _ = session.child.wait();
        info!(project = %session.project, "debug session stopped");
        DebugResult {
            success: true,
            running: false,
            project: Some(session.project),
            pid: Some(session.child.id()),
            error: None,
        }
    }

    fn open_file(&mut self, args: FileArgs) -> OperationResult {
        let path = self.resolve(&args.path);
        if self.documents.contains_key(&path) {
            return OperationResult::ok(format!("already open: {}", self.display_path(&path)));
        }
        match fs::read_to_string(&path) {
            Ok(text) => {
                let shown = self.display_path(&path);
                self.documents.insert(
                    path,
                    Document {
                        text,
                        modified: false,
                    },
                );
                OperationResult::ok(format!("opened {shown}"))
            }
            Err(err) => OperationResult::failed(format!("cannot open {}: {err}", args.path)),
        }
    }

    fn close_file(&mut self, args: FileArgs) -> OperationResult {
        let path = self.resolve(&args.path);
        match self.documents.remove(&path) {
            Some(document) if document.modified => OperationResult::ok(format!(
                "closed {} (unsaved changes discarded)",
                self.display_path(&path)
            )),
            Some(_) => OperationResult::ok(format!("closed {}", self.display_path(&path))),
            None => OperationResult::failed(format!("file is not open: {}", args.path)),
        }
    }

    fn save_file(&mut self, args: FileArgs) -> OperationResult {
        let path = self.resolve(&args.path);
        let shown = self.display_path(&path);
        let Some(document) = self.documents.get_mut(&path) else {
            return OperationResult::failed(format!("file is not open: {}", args.path));
        };
        match fs::write(&path, &document.text) {
            Ok(()) => {
                document.modified = false;
                OperationResult::ok(format!("saved {shown}"))
            }
            Err(err) => OperationResult::failed(format!("cannot save {shown}: {err}")),
        }
    }

    fn get_file_plain_text(&mut self, args: FileArgs) -> FileText {
        let path = self.resolve(&args.path);
        let shown = self.display_path(&path);
        if let Some(document) = self.documents.get(&path) {
            return FileText {
                success: true,
                path: shown,
                text: Some(document.text.clone()),
                open: true,
                modified: document.modified,
                error: None,
            };
        }
        match fs::read_to_string(&path) {
            Ok(text) => FileText {
                success: true,
                path: shown,
                text: Some(text),
                ..FileText::default()
            },
            Err(err) => FileText {
                path: shown,
                error: Some(format!("cannot read {}: {err}", args.path)),
                ..FileText::default()
            },
        }
    }

    fn set_file_plain_text(&mut self, args: SetTextArgs) -> OperationResult {
        let path = self.resolve(&args.path);
        let shown = self.display_path(&path);
        let document = self.documents.entry(path).or_insert_with(|| Document {
            text: String::new(),
            modified: false,
        });
        document.text = args.text;
        document.modified = true;
        OperationResult::ok(format!("updated buffer for {shown}"))
    }

    fn find_files_in_project(&mut self, args: FindFilesArgs) -> FileList {
        let idx = match self.project_index(args.project.as_deref()) {
            Ok(idx) => idx,
            Err(error) => return FileList::failed(error),
        };
        let filter = match FileFilter::new(&args.pattern) {
            Ok(filter) => filter,
            Err(error) => return FileList::failed(error),
        };
        let files = walk_files(&self.projects[idx].path, Some(&filter))
            .iter()
            .map(|path| self.display_path(path))
            .collect();
        FileList {
            success: true,
            files,
            error: None,
        }
    }

    fn find_files_in_projects(&mut self, args: PatternArgs) -> FileList {
        let filter = match FileFilter::new(&args.pattern) {
            Ok(filter) => filter,
            Err(error) => return FileList::failed(error),
        };
        let files: BTreeSet<String> = self
            .projects
            .iter()
            .flat_map(|project| walk_files(&project.path, Some(&filter)))
            .map(|path| self.display_path(&path))
            .collect();
        FileList {
            success: true,
            files: files.into_iter().collect(),
            error: None,
        }
    }

    fn search_in_file(&mut self, args: SearchInFileArgs) -> SearchResult {
        let matcher = match Matcher::new(&args.search) {
            Ok(matcher) => matcher,
            Err(error) => return SearchResult::failed(error),
        };
        let path = self.resolve(&args.path);
        self.search_paths(&[path], &matcher, true)
    }

    fn search_in_files(&mut self, args: SearchInFilesArgs, reply: Reply<SearchResult>) {
        let matcher = match Matcher::new(&args.search) {
            Ok(matcher) => matcher,
            Err(error) => return reply(SearchResult::failed(error)),
        };
        let paths: Vec<PathBuf> = args.paths.iter().map(|path| self.resolve(path)).collect();
        reply(self.search_paths(&paths, &matcher, true));
    }

    fn search_in_directory(&mut self, args: SearchInDirectoryArgs, reply: Reply<SearchResult>) {
        let matcher = match Matcher::new(&args.search) {
            Ok(matcher) => matcher,
            Err(error) => return reply(SearchResult::failed(error)),
        };
        match self.directory_files(&args.directory, args.file_pattern.as_deref()) {
            Ok(paths) => reply(self.search_paths(&paths, &matcher, false)),
            Err(error) => reply(SearchResult::failed(error)),
        }
    }

    fn replace_in_file(&mut self, args: ReplaceInFileArgs) -> ReplaceResult {
        let matcher = match Matcher::new(&args.search) {
            Ok(matcher) => matcher,
            Err(error) => return ReplaceResult::failed(error),
        };
        let path = self.resolve(&args.path);
        self.replace_paths(&[path], &matcher, &args.replacement, true)
    }

    fn replace_in_files(&mut self, args: ReplaceInFilesArgs, reply: Reply<ReplaceResult>) {
        let matcher = match Matcher::new(&args.search) {
            Ok(matcher) => matcher,
            Err(error) => return reply(ReplaceResult::failed(error)),
        };
        let paths: Vec<PathBuf> = args.paths.iter().map(|path| self.resolve(path)).collect();
        reply(self.replace_paths(&paths, &matcher, &args.replacement, true));
    }

    fn replace_in_directory(&mut self, args: ReplaceInDirectoryArgs, reply: Reply<ReplaceResult>) {
        let matcher = match Matcher::new(&args.search) {
            Ok(matcher) => matcher,
            Err(error) => return reply(ReplaceResult::failed(error)),
        };
        match self.directory_files(&args.directory, args.file_pattern.as_deref()) {
            Ok(paths) => reply(self.replace_paths(&paths, &matcher, &args.replacement, false)),
            Err(error) => reply(ReplaceResult::failed(error)),
        }
    }

    fn list_sessions(&mut self) -> SessionList {
        let mut sessions: Vec<String> = fs::read_dir(self.sessions_dir())
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .map(|entry| entry.path())
                    .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
                    .filter_map(|path| {
                        path.file_stem()
                            .map(|stem| stem.to_string_lossy().into_owned())
                    })
                    .collect()
            })
            .unwrap_or_default();
        sessions.sort();
        SessionList {
            sessions,
            current: self.current_session.clone(),
        }
    }

    fn load_session(&mut self, args: SessionArgs) -> OperationResult {
        let path = match self.session_path(&args.name) {
            Ok(path) => path,
            Err(error) => return OperationResult::failed(error),
        };
        let session: SessionFile = match fs::read(&path)
            .map_err(|err| err.to_string())
            .and_then(|bytes| serde_json::from_slice(&bytes).map_err(|err| err.to_string()))
        {
            Ok(session) => session,
            Err(error) => {
                return OperationResult::failed(format!(
                    "cannot load session {}: {error}",
                    args.name
                ));
            }
        };

        if let Some(name) = session.project.as_deref() {
            if let Some(idx) = self.projects.iter().position(|p| p.name == name) {
                self.current_project = Some(idx);
            }
        }
        let mut opened = 0;
        for file in &session.open_files {
            let result = self.open_file(FileArgs { path: file.clone() });
            if result.success {
                opened += 1;
            } else {
                debug!(file = %file, "session file could not be reopened");
            }
        }
        self.current_session = Some(args.name.clone());
        info!(session = %args.name, opened, "session loaded");
        OperationResult::ok(format!(
            "loaded session {} ({opened} of {} files opened)",
            args.name,
            session.open_files.len()
        ))
    }

    fn save_session(&mut self, args: SessionArgs) -> OperationResult {
        let path = match self.session_path(&args.name) {
            Ok(path) => path,
            Err(error) => return OperationResult::failed(error),
        };
        let session = SessionFile {
            name: args.name.clone(),
            project: self.current_project_name(),
            open_files: self
                .documents
                .keys()
                .map(|path| self.display_path(path))
                .collect(),
            saved_at: now_rfc3339(),
        };
        let written = fs::create_dir_all(self.sessions_dir())
            .map_err(|err| err.to_string())
            .and_then(|()| serde_json::to_vec_pretty(&session).map_err(|err| err.to_string()))
            .and_then(|bytes| fs::write(&path, bytes).map_err(|err| err.to_string()));
        match written {
            Ok(()) => {
                self.current_session = Some(args.name.clone());
                OperationResult::ok(format!("saved session {}", args.name))
            }
            Err(error) => {
                OperationResult::failed(format!("cannot save session {}: {error}", args.name))
            }
        }
    }

    fn get_current_session(&mut self) -> CurrentSession {
        CurrentSession {
            session: self.current_session.clone(),
        }
    }

    fn execute_command(&mut self, args: ExecuteCommandArgs, reply: Reply<CommandOutput>) {
        let dir = match args.working_directory.as_deref() {
            Some(dir) => self.resolve(dir),
            None => self.root.clone(),
        };
        if !dir.is_dir() {
            return reply(CommandOutput::failed(format!(
                "working directory not found: {}",
                dir.display()
            )));
        }
        let spawned = thread::Builder::new()
            .name("codebridge-exec".to_string())
            .spawn(move || {
                let output = Command::new(&args.command)
                    .args(&args.args)
                    .current_dir(&dir)
                    .stdin(Stdio::null())
                    .output();
                reply(match output {
                    Ok(output) => CommandOutput {
                        success: output.status.success(),
                        exit_code: output.status.code(),
                        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                        error: None,
                    },
                    Err(err) => {
                        CommandOutput::failed(format!("failed to run {}: {err}", args.command))
                    }
                });
            });
        if let Err(err) = spawned {
            warn!(error = %err, "failed to start command thread for execute_command");
        }
    }

    fn quit(&mut self) -> OperationResult {
        info!("quit requested");
        match &self.on_quit {
            Some(hook) => {
                hook();
                OperationResult::ok("shutting down")
            }
            None => OperationResult::failed("quit is not supported by this server"),
        }
    }
}

fn lock(record: &Mutex<BuildRecord>) -> MutexGuard<'_, BuildRecord> {
    record.lock().unwrap_or_else(|poison| poison.into_inner())
}

fn shell(command: &str) -> Command {
    #[cfg(windows)]
    let mut cmd = {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    };
    #[cfg(not(windows))]
    let mut cmd = {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    };
    cmd.stdin(Stdio::null());
    cmd
}

fn finish_build(record: &Mutex<BuildRecord>, output: io::Result<Output>) -> BuildResult {
    let mut guard = lock(record);
    let record = &mut *guard;
    record.status.finished_at = now_rfc3339();
    let output = match output {
        Ok(output) => output,
        Err(err) => {
            record.status.state = BuildState::Failed;
            warn!(error = %err, "build command failed to start");
            return BuildResult::failed(
                record.status.clone(),
                format!("failed to run build command: {err}"),
            );
        }
    };

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    let lines: Vec<&str> = text.lines().collect();
    let tail_start = lines.len().saturating_sub(OUTPUT_TAIL_LINES);
    record.issues = parse_issues(&text);
    record.status.output_tail = lines[tail_start..].iter().map(|line| line.to_string()).collect();
    record.status.issue_count = record.issues.len();
    record.status.exit_code = output.status.code();
    let success = output.status.success();
    record.status.state = if success {
        BuildState::Succeeded
    } else {
        BuildState::Failed
    };
    info!(
        exit_code = ?record.status.exit_code,
        issues = record.status.issue_count,
        "build finished"
    );
    BuildResult {
        success,
        status: record.status.clone(),
        error: if success {
            None
        } else {
            Some("build failed".to_string())
        },
    }
}

fn now_rfc3339() -> Option<String> {
    OffsetDateTime::now_utc().format(&Rfc3339).ok()
}
