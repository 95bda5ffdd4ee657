//! Purpose: Command backend seam and the single thread that owns it.
//! Exports: `CommandBackend`, `CommandThread`, `Reply`, backend value types.
//! Role: Every tool runs here, serialized, so backend state needs no locking.
//! Invariants: Jobs run one at a time, in submission order, on the command thread.
//! Invariants: A panicking job is logged and skipped; the thread keeps serving.
//! Invariants: A panicking `call` job answers its caller with an `Internal` error holding the panic text.
//! Invariants: `call` from the command thread itself is refused instead of deadlocking.

pub mod issues;
pub mod search;
pub mod types;
pub mod workspace;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::thread;

use tracing::{debug, error, info};

use crate::core::error::{Error, ErrorKind};
use crate::mcp::dispatcher::panic_message;

pub use types::*;
pub use workspace::WorkspaceBackend;

/// Callback used by long-running operations to deliver their result later.
pub type Reply<T> = Box<dyn FnOnce(T) + Send + 'static>;

const THREAD_NAME: &str = "codebridge-command";

/// One method per tool. Methods taking a `Reply` may answer after returning.
pub trait CommandBackend: Send {
    fn list_projects(&mut self) -> ProjectList;
    fn get_current_project(&mut self) -> CurrentProject;
    fn list_project_dependencies(&mut self, args: ProjectArgs) -> DependencyList;
    fn list_build_configs(&mut self, args: ProjectArgs) -> BuildConfigList;
    fn switch_build_config(&mut self, args: SwitchBuildConfigArgs) -> OperationResult;
    fn get_current_build_config(&mut self) -> CurrentBuildConfig;

    fn build(&mut self, args: BuildArgs, reply: Reply<BuildResult>);
    fn get_build_status(&mut self) -> BuildStatus;
    fn list_issues(&mut self) -> IssueList;
    fn list_file_issues(&mut self, args: FileArgs) -> IssueList;

    fn debug(&mut self, args: ProjectArgs, reply: Reply<DebugResult>);
    fn stop_debug(&mut self) -> DebugResult;

    fn open_file(&mut self, args: FileArgs) -> OperationResult;
    fn close_file(&mut self, args: FileArgs) -> OperationResult;
    fn save_file(&mut self, args: FileArgs) -> OperationResult;
    fn get_file_plain_text(&mut self, args: FileArgs) -> FileText;
    fn set_file_plain_text(&mut self, args: SetTextArgs) -> OperationResult;

    fn find_files_in_project(&mut self, args: FindFilesArgs) -> FileList;
    fn find_files_in_projects(&mut self, args: PatternArgs) -> FileList;

    fn search_in_file(&mut self, args: SearchInFileArgs) -> SearchResult;
    fn search_in_files(&mut self, args: SearchInFilesArgs, reply: Reply<SearchResult>);
    fn search_in_directory(&mut self, args: SearchInDirectoryArgs, reply: Reply<SearchResult>);
    fn replace_in_file(&mut self, args: ReplaceInFileArgs) -> ReplaceResult;
    fn replace_in_files(&mut self, args: ReplaceInFilesArgs, reply: Reply<ReplaceResult>);
    fn replace_in_directory(&mut self, args: ReplaceInDirectoryArgs, reply: Reply<ReplaceResult>);

    fn list_sessions(&mut self) -> SessionList;
    fn load_session(&mut self, args: SessionArgs) -> OperationResult;
    fn save_session(&mut self, args: SessionArgs) -> OperationResult;
    fn get_current_session(&mut self) -> CurrentSession;

    fn execute_command(&mut self, args: ExecuteCommandArgs, reply: Reply<CommandOutput>);
    fn quit(&mut self) -> OperationResult;
}

type Job = Box<dyn FnOnce(&mut dyn CommandBackend) + Send + 'static>;

/// Cloneable handle that submits jobs to the command thread.
///
/// The thread exits once every handle is dropped.
#[derive(Clone)]
pub struct CommandThread {
    sender: mpsc::Sender<Job>,
}

impl CommandThread {
    pub fn spawn<B>(backend: B) -> Result<Self, Error>
    where
        B: CommandBackend + 'static,
    {
        let (sender, receiver) = mpsc::channel::<Job>();
        thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || run(Box::new(backend), receiver))
            .map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to start command thread")
                    .with_source(err)
            })?;
        Ok(Self { sender })
    }

    /// Queue `job` without waiting for it.
    pub fn post<F>(&self, job: F) -> Result<(), Error>
    where
        F: FnOnce(&mut dyn CommandBackend) + Send + 'static,
    {
        self.sender.send(Box::new(job)).map_err(|_| {
            Error::new(ErrorKind::Unavailable).with_message("command thread is not running")
        })
    }

    /// Run `job` on the command thread and block until it returns.
    pub fn call<R, F>(&self, job: F) -> Result<R, Error>
    where
        R: Send + 'static,
        F: FnOnce(&mut dyn CommandBackend) -> R + Send + 'static,
    {
        if is_command_thread() {
            return Err(Error::new(ErrorKind::Internal)
                .with_message("blocking call issued from the command thread"));
        }
        let (tx, rx) = mpsc::sync_channel(1);
        self.post(move |backend| {
            let outcome = catch_unwind(AssertUnwindSafe(|| job(backend)))
                .map_err(|payload| panic_message(payload.as_ref()));
            if let Err(message) = &outcome {
                error!(%message, "command call panicked");
            }
            let _ = tx.send(outcome);
        })?;
        match rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(Error::new(ErrorKind::Internal).with_message(message)),
            Err(_) => Err(Error::new(ErrorKind::Unavailable)
                .with_message("command thread dropped the request before answering")),
        }
    }
}

fn is_command_thread() -> bool {
    thread::current().name() == Some(THREAD_NAME)
}

fn run(mut backend: Box<dyn CommandBackend>, receiver: mpsc::Receiver<Job>) {
    info!("command thread started");
    while let Ok(job) = receiver.recv() {
        let outcome = catch_unwind(AssertUnwindSafe(|| job(backend.as_mut())));
        if let Err(payload) = outcome {
            let message = panic_message(payload.as_ref());
            error!(%message, "command job panicked");
        }
    }
    debug!("command thread stopped");
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Backend double that records calls and answers with canned values.
    #[derive(Default)]
    pub(crate) struct RecordingBackend {
        pub calls: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingBackend {
        fn record(&self, name: &str) {
            self.calls.lock().expect("calls").push(name.to_string());
        }
    }

    impl CommandBackend for RecordingBackend {
        fn list_projects(&mut self) -> ProjectList {
            self.record("list_projects");
            ProjectList {
                projects: vec![ProjectInfo {
                    name: "demo".to_string(),
                    path: "/tmp/demo".to_string(),
                    kind: "cargo".to_string(),
                    active_build_config: Some("debug".to_string()),
                }],
                current: Some("demo".to_string()),
            }
        }
        fn get_current_project(&mut self) -> CurrentProject {
            self.record("get_current_project");
            CurrentProject::default()
        }
        fn list_project_dependencies(&mut self, _args: ProjectArgs) -> DependencyList {
            self.record("list_project_dependencies");
            DependencyList::default()
        }
        fn list_build_configs(&mut self, _args: ProjectArgs) -> BuildConfigList {
            self.record("list_build_configs");
            BuildConfigList::default()
        }
        fn switch_build_config(&mut self, args: SwitchBuildConfigArgs) -> OperationResult {
            self.record("switch_build_config");
            OperationResult::ok(args.config)
        }
        fn get_current_build_config(&mut self) -> CurrentBuildConfig {
            self.record("get_current_build_config");
            CurrentBuildConfig::default()
        }
        fn build(&mut self, _args: BuildArgs, reply: Reply<BuildResult>) {
            self.record("build");
            thread::spawn(move || {
                reply(BuildResult {
                    success: true,
                    status: BuildStatus::default(),
                    error: None,
                })
            });
        }
        fn get_build_status(&mut self) -> BuildStatus {
            self.record("get_build_status");
            BuildStatus::default()
        }
        fn list_issues(&mut self) -> IssueList {
            self.record("list_issues");
            IssueList::default()
        }
        fn list_file_issues(&mut self, _args: FileArgs) -> IssueList {
            self.record("list_file_issues");
            IssueList::default()
        }
        fn debug(&mut self, _args: ProjectArgs, _reply: Reply<DebugResult>) {
            self.record("debug");
            panic!("debugger exploded");
        }
        fn stop_debug(&mut self) -> DebugResult {
            self.record("stop_debug");
            panic!("disk on fire");
        }
        fn open_file(&mut self, args: FileArgs) -> OperationResult {
            self.record("open_file");
            OperationResult::failed(format!("no such file: {}", args.path))
        }
        fn close_file(&mut self, _args: FileArgs) -> OperationResult {
            self.record("close_file");
            OperationResult::ok("closed")
        }
        fn save_file(&mut self, _args: FileArgs) -> OperationResult {
            self.record("save_file");
            OperationResult::ok("saved")
        }
        fn get_file_plain_text(&mut self, args: FileArgs) -> FileText {
            self.record("get_file_plain_text");
            FileText {
                success: true,
                path: args.path,
                text: Some("hello".to_string()),
                ..FileText::default()
            }
        }
        fn set_file_plain_text(&mut self, _args: SetTextArgs) -> OperationResult {
            self.record("set_file_plain_text");
            OperationResult::ok("set")
        }
        fn find_files_in_project(&mut self, _args: FindFilesArgs) -> FileList {
            self.record("find_files_in_project");
            FileList::default()
        }
        fn find_files_in_projects(&mut self, _args: PatternArgs) -> FileList {
            self.record("find_files_in_projects");
            FileList::default()
        }
        fn search_in_file(&mut self, _args: SearchInFileArgs) -> SearchResult {
            self.record("search_in_file");
            SearchResult::default()
        }
        fn search_in_files(&mut self, _args: SearchInFilesArgs, reply: Reply<SearchResult>) {
            self.record("search_in_files");
            reply(SearchResult::default());
        }
        fn search_in_directory(
            &mut self,
            _args: SearchInDirectoryArgs,
            reply: Reply<SearchResult>,
        ) {
            self.record("search_in_directory");
            drop(reply);
        }
        fn replace_in_file(&mut self, _args: ReplaceInFileArgs) -> ReplaceResult {
            self.record("replace_in_file");
            ReplaceResult::default()
        }
        fn replace_in_files(&mut self, _args: ReplaceInFilesArgs, reply: Reply<ReplaceResult>) {
            self.record("replace_in_files");
            reply(ReplaceResult::default());
        }
        fn replace_in_directory(
            &mut self,
            _args: ReplaceInDirectoryArgs,
            reply: Reply<ReplaceResult>,
        ) {
            self.record("replace_in_directory");
            reply(ReplaceResult::default());
        }
        fn list_sessions(&mut self) -> SessionList {
            self.record("list_sessions");
            SessionList::default()
        }
        fn load_session(&mut self, _args: SessionArgs) -> OperationResult {
            self.record("load_session");
            OperationResult::ok("loaded")
        }
        fn save_session(&mut self, _args: SessionArgs) -> OperationResult {
            self.record("save_session");
            OperationResult::ok("saved")
        }
        fn get_current_session(&mut self) -> CurrentSession {
            self.record("get_current_session");
            CurrentSession::default()
        }
        fn execute_command(&mut self, _args: ExecuteCommandArgs, reply: Reply<CommandOutput>) {
            self.record("execute_command");
            reply(CommandOutput::default());
        }
        fn quit(&mut self) -> OperationResult {
            self.record("quit");
            OperationResult::ok("quitting")
        }
    }

    #[test]
    fn call_runs_on_the_command_thread() {
        let thread = CommandThread::spawn(RecordingBackend::default()).expect("spawn");
        let name = thread
            .call(|_backend| thread::current().name().map(str::to_string))
            .expect("call");
        assert_eq!(name.as_deref(), Some(THREAD_NAME));
    }

    #[test]
    fn jobs_run_in_submission_order() {
        let backend = RecordingBackend::default();
        let calls = Arc::clone(&backend.calls);
        let thread = CommandThread::spawn(backend).expect("spawn");
        thread.post(|backend| { backend.list_projects(); }).expect("post");
        thread.post(|backend| { backend.list_sessions(); }).expect("post");
        thread.call(|backend| backend.quit()).expect("call");
        assert_eq!(
            *calls.lock().expect("calls"),
            vec!["list_projects", "list_sessions", "quit"]
        );
    }

    #[test]
    fn panicking_job_does_not_stop_the_thread() {
        let thread = CommandThread::spawn(RecordingBackend::default()).expect("spawn");
        let err = thread
            .call(|_backend| -> u32 { panic!("job failed") })
            .expect_err("panicked");
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.message(), Some("job failed"));
        let projects = thread.call(|backend| backend.list_projects()).expect("call");
        assert_eq!(projects.projects.len(), 1);
    }

    #[test]
    fn nested_call_is_refused() {
        let thread = CommandThread::spawn(RecordingBackend::default()).expect("spawn");
        let inner = thread.clone();
        let err = thread
            .call(move |_backend| inner.call(|backend| backend.quit()).map(|_| ()))
            .expect("outer call")
            .expect_err("nested call");
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
