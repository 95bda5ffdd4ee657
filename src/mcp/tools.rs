//! Purpose: The MCP tool catalog and its bindings onto the command thread.
//! Exports: `tool_descriptors`, `build_registry`.
//! Role: Turns `tools/call` arguments into typed backend calls and results into JSON.
//! Invariants: Catalog order is stable and is the order `tools/list` reports.
//! Invariants: Argument decode failures are -32602; backend failures stay inside the result.

use std::panic::{AssertUnwindSafe, catch_unwind};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::{error, warn};

use super::completion::MethodResult;
use super::dispatcher::{ToolHandler, ToolRegistry, panic_message, tool_handler};
use super::protocol::{JsonRpcError, ToolAnnotations, ToolDescriptor};
use crate::backend::{
    BuildArgs, CommandBackend, CommandThread, ExecuteCommandArgs, FileArgs, FindFilesArgs,
    NoArgs, PatternArgs, ProjectArgs, ReplaceInDirectoryArgs, ReplaceInFileArgs,
    ReplaceInFilesArgs, Reply, SearchInDirectoryArgs, SearchInFileArgs, SearchInFilesArgs,
    SessionArgs, SetTextArgs, SwitchBuildConfigArgs,
};

#[derive(Clone, Copy)]
enum Access {
    ReadOnly,
    Mutating,
    Destructive,
}

fn descriptor(
    name: &str,
    title: &str,
    description: &str,
    access: Access,
    input_schema: Value,
    output_schema: Value,
) -> ToolDescriptor {
    ToolDescriptor {
        name: name.to_string(),
        title: title.to_string(),
        description: description.to_string(),
        input_schema,
        output_schema,
        annotations: ToolAnnotations {
            read_only_hint: matches!(access, Access::ReadOnly),
            destructive_hint: matches!(access, Access::Destructive),
            open_world_hint: name == "execute_command",
        },
    }
}

fn input(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn no_input() -> Value {
    input(json!({}), &[])
}

fn output(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn text(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

fn nullable_text() -> Value {
    json!({ "type": ["string", "null"] })
}

fn flag(description: &str, default: bool) -> Value {
    json!({ "type": "boolean", "description": description, "default": default })
}

fn project_arg() -> Value {
    text("Project name; defaults to the current project")
}

fn search_properties(mut extra: Map<String, Value>, replace: bool) -> Value {
    extra.insert("pattern".into(), text("Text or regular expression to find"));
    extra.insert(
        "regex".into(),
        flag("Treat `pattern` as a regular expression", false),
    );
    extra.insert(
        "case_sensitive".into(),
        flag("Match case exactly", true),
    );
    if replace {
        extra.insert(
            "replacement".into(),
            text("Replacement text; `$1`-style groups expand only in regex mode"),
        );
    }
    Value::Object(extra)
}

fn path_property(description: &str) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("path".into(), text(description));
    map
}

fn paths_property() -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(
        "paths".into(),
        json!({ "type": "array", "items": { "type": "string" }, "description": "Files to process" }),
    );
    map
}

fn directory_properties() -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("directory".into(), text("Directory to walk recursively"));
    map.insert(
        "file_pattern".into(),
        text("Optional glob on file names, e.g. `*.rs`"),
    );
    map
}

fn operation_output() -> Value {
    output(
        json!({
            "success": { "type": "boolean" },
            "message": { "type": "string" },
            "error": { "type": "string" },
        }),
        &["success"],
    )
}

fn project_info_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": { "type": "string" },
            "path": { "type": "string" },
            "kind": { "type": "string" },
            "active_build_config": { "type": ["string", "null"] },
        },
        "required": ["name", "path", "kind"],
    })
}

fn build_status_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "state": { "type": "string", "enum": ["idle", "running", "succeeded", "failed"] },
            "project": { "type": ["string", "null"] },
            "config": { "type": ["string", "null"] },
            "exit_code": { "type": ["integer", "null"] },
            "started_at": { "type": ["string", "null"] },
            "finished_at": { "type": ["string", "null"] },
            "output_tail": { "type": "array", "items": { "type": "string" } },
            "issue_count": { "type": "integer" },
        },
        "required": ["state", "issue_count"],
    })
}

fn issue_list_output() -> Value {
    output(
        json!({
            "issues": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "file": { "type": "string" },
                        "line": { "type": "integer" },
                        "column": { "type": ["integer", "null"] },
                        "severity": { "type": "string", "enum": ["error", "warning"] },
                        "message": { "type": "string" },
                    },
                    "required": ["file", "line", "severity", "message"],
                },
            },
        }),
        &["issues"],
    )
}

fn debug_output() -> Value {
    output(
        json!({
            "success": { "type": "boolean" },
            "running": { "type": "boolean" },
            "project": nullable_text(),
            "pid": { "type": ["integer", "null"] },
            "error": { "type": "string" },
        }),
        &["success", "running"],
    )
}

fn file_list_output() -> Value {
    output(
        json!({
            "success": { "type": "boolean" },
            "files": { "type": "array", "items": { "type": "string" } },
            "error": { "type": "string" },
        }),
        &["success", "files"],
    )
}

fn search_output() -> Value {
    output(
        json!({
            "success": { "type": "boolean" },
            "total": { "type": "integer" },
            "matches": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "file": { "type": "string" },
                        "line": { "type": "integer" },
                        "column": { "type": "integer" },
                        "text": { "type": "string" },
                    },
                    "required": ["file", "line", "column", "text"],
                },
            },
            "error": { "type": "string" },
        }),
        &["success", "total", "matches"],
    )
}

fn replace_output() -> Value {
    output(
        json!({
            "success": { "type": "boolean" },
            "replacements": { "type": "integer" },
            "files": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "file": { "type": "string" },
                        "count": { "type": "integer" },
                    },
                    "required": ["file", "count"],
                },
            },
            "error": { "type": "string" },
        }),
        &["success", "replacements", "files"],
    )
}

/// Every tool the server exposes, in `tools/list` order.
pub fn tool_descriptors() -> Vec<ToolDescriptor> {
    vec![
        descriptor(
            "build",
            "Build project",
            "Run the active (or named) build configuration of a project and report the outcome once the build finishes.",
            Access::Mutating,
            input(
                json!({
                    "project": project_arg(),
                    "config": text("Build configuration name; defaults to the active one"),
                }),
                &[],
            ),
            output(
                json!({
                    "success": { "type": "boolean" },
                    "status": build_status_schema(),
                    "error": { "type": "string" },
                }),
                &["success", "status"],
            ),
        ),
        descriptor(
            "debug",
            "Start debugging",
            "Start the project's debug command as a background session.",
            Access::Mutating,
            input(json!({ "project": project_arg() }), &[]),
            debug_output(),
        ),
        descriptor(
            "stop_debug",
            "Stop debugging",
            "Terminate the running debug session.",
            Access::Mutating,
            no_input(),
            debug_output(),
        ),
        descriptor(
            "open_file",
            "Open file",
            "Open a file into an editable buffer.",
            Access::Mutating,
            input(json!({ "path": text("File path, absolute or workspace-relative") }), &["path"]),
            operation_output(),
        ),
        descriptor(
            "close_file",
            "Close file",
            "Close an open buffer, discarding unsaved changes.",
            Access::Mutating,
            input(json!({ "path": text("File path of the open buffer") }), &["path"]),
            operation_output(),
        ),
        descriptor(
            "save_file",
            "Save file",
            "Write an open buffer back to disk.",
            Access::Mutating,
            input(json!({ "path": text("File path of the open buffer") }), &["path"]),
            operation_output(),
        ),
        descriptor(
            "get_file_plain_text",
            "Read file text",
            "Return the text of a file, preferring its open buffer over the disk contents.",
            Access::ReadOnly,
            input(json!({ "path": text("File path, absolute or workspace-relative") }), &["path"]),
            output(
                json!({
                    "success": { "type": "boolean" },
                    "path": { "type": "string" },
                    "text": nullable_text(),
                    "open": { "type": "boolean" },
                    "modified": { "type": "boolean" },
                    "error": { "type": "string" },
                }),
                &["success", "path"],
            ),
        ),
        descriptor(
            "set_file_plain_text",
            "Replace file text",
            "Replace the buffer text of a file, opening it if needed. Use save_file to persist.",
            Access::Mutating,
            input(
                json!({
                    "path": text("File path, absolute or workspace-relative"),
                    "text": text("New buffer contents"),
                }),
                &["path", "text"],
            ),
            operation_output(),
        ),
        descriptor(
            "find_files_in_project",
            "Find files in project",
            "Find files in one project whose names match a glob.",
            Access::ReadOnly,
            input(
                json!({
                    "project": project_arg(),
                    "pattern": text("Glob on file names, e.g. `*.toml`"),
                }),
                &["pattern"],
            ),
            file_list_output(),
        ),
        descriptor(
            "find_files_in_projects",
            "Find files in all projects",
            "Find files across every project whose names match a glob.",
            Access::ReadOnly,
            input(json!({ "pattern": text("Glob on file names") }), &["pattern"]),
            file_list_output(),
        ),
        descriptor(
            "search_in_file",
            "Search in file",
            "Search one file for a literal or regular expression pattern.",
            Access::ReadOnly,
            input(
                search_properties(path_property("File to search"), false),
                &["path", "pattern"],
            ),
            search_output(),
        ),
        descriptor(
            "search_in_files",
            "Search in files",
            "Search a list of files for a literal or regular expression pattern.",
            Access::ReadOnly,
            input(
                search_properties(paths_property(), false),
                &["paths", "pattern"],
            ),
            search_output(),
        ),
        descriptor(
            "search_in_directory",
            "Search in directory",
            "Search every file under a directory, optionally filtered by a file-name glob.",
            Access::ReadOnly,
            input(
                search_properties(directory_properties(), false),
                &["directory", "pattern"],
            ),
            search_output(),
        ),
        descriptor(
            "replace_in_file",
            "Replace in file",
            "Replace every match in one file. Open buffers are edited in place; other files are rewritten on disk.",
            Access::Destructive,
            input(
                search_properties(path_property("File to edit"), true),
                &["path", "pattern", "replacement"],
            ),
            replace_output(),
        ),
        descriptor(
            "replace_in_files",
            "Replace in files",
            "Replace every match in a list of files.",
            Access::Destructive,
            input(
                search_properties(paths_property(), true),
                &["paths", "pattern", "replacement"],
            ),
            replace_output(),
        ),
        descriptor(
            "replace_in_directory",
            "Replace in directory",
            "Replace every match in the files under a directory, optionally filtered by a file-name glob.",
            Access::Destructive,
            input(
                search_properties(directory_properties(), true),
                &["directory", "pattern", "replacement"],
            ),
            replace_output(),
        ),
        descriptor(
            "list_build_configs",
            "List build configurations",
            "List a project's build configurations and mark the active one.",
            Access::ReadOnly,
            input(json!({ "project": project_arg() }), &[]),
            output(
                json!({
                    "success": { "type": "boolean" },
                    "project": nullable_text(),
                    "configs": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "name": { "type": "string" },
                                "command": { "type": "string" },
                                "active": { "type": "boolean" },
                            },
                            "required": ["name", "command", "active"],
                        },
                    },
                    "error": { "type": "string" },
                }),
                &["success", "configs"],
            ),
        ),
        descriptor(
            "switch_build_config",
            "Switch build configuration",
            "Make a build configuration the active one for a project.",
            Access::Mutating,
            input(
                json!({
                    "project": project_arg(),
                    "config": text("Build configuration name"),
                }),
                &["config"],
            ),
            operation_output(),
        ),
        descriptor(
            "list_projects",
            "List projects",
            "List the projects found in the workspace and the current one.",
            Access::ReadOnly,
            no_input(),
            output(
                json!({
                    "projects": { "type": "array", "items": project_info_schema() },
                    "current": nullable_text(),
                }),
                &["projects"],
            ),
        ),
        descriptor(
            "list_project_dependencies",
            "List project dependencies",
            "List the projects a project depends on.",
            Access::ReadOnly,
            input(json!({ "project": project_arg() }), &[]),
            output(
                json!({
                    "success": { "type": "boolean" },
                    "project": nullable_text(),
                    "dependencies": { "type": "array", "items": { "type": "string" } },
                    "error": { "type": "string" },
                }),
                &["success", "dependencies"],
            ),
        ),
        descriptor(
            "list_sessions",
            "List sessions",
            "List saved sessions and the current one.",
            Access::ReadOnly,
            no_input(),
            output(
                json!({
                    "sessions": { "type": "array", "items": { "type": "string" } },
                    "current": nullable_text(),
                }),
                &["sessions"],
            ),
        ),
        descriptor(
            "load_session",
            "Load session",
            "Restore a saved session: current project and open files.",
            Access::Mutating,
            input(json!({ "name": text("Session name") }), &["name"]),
            operation_output(),
        ),
        descriptor(
            "save_session",
            "Save session",
            "Save the current project and open files under a session name.",
            Access::Mutating,
            input(json!({ "name": text("Session name") }), &["name"]),
            operation_output(),
        ),
        descriptor(
            "list_issues",
            "List issues",
            "List the errors and warnings reported by the last build.",
            Access::ReadOnly,
            no_input(),
            issue_list_output(),
        ),
        descriptor(
            "list_file_issues",
            "List file issues",
            "List the last build's errors and warnings for one file.",
            Access::ReadOnly,
            input(json!({ "path": text("File path as reported by the build") }), &["path"]),
            issue_list_output(),
        ),
        descriptor(
            "quit",
            "Quit",
            "Shut the server down after this response is delivered.",
            Access::Destructive,
            no_input(),
            operation_output(),
        ),
        descriptor(
            "get_current_project",
            "Get current project",
            "Return the current project, if any.",
            Access::ReadOnly,
            no_input(),
            output(
                json!({
                    "project": {
                        "anyOf": [project_info_schema(), { "type": "null" }],
                    },
                }),
                &["project"],
            ),
        ),
        descriptor(
            "get_current_build_config",
            "Get current build configuration",
            "Return the current project and its active build configuration.",
            Access::ReadOnly,
            no_input(),
            output(
                json!({
                    "project": nullable_text(),
                    "config": nullable_text(),
                }),
                &[],
            ),
        ),
        descriptor(
            "get_current_session",
            "Get current session",
            "Return the name of the most recently loaded or saved session.",
            Access::ReadOnly,
            no_input(),
            output(json!({ "session": nullable_text() }), &[]),
        ),
        descriptor(
            "get_build_status",
            "Get build status",
            "Return the state of the current or most recent build.",
            Access::ReadOnly,
            no_input(),
            build_status_schema(),
        ),
        descriptor(
            "execute_command",
            "Execute command",
            "Run a program with arguments and return its exit code and captured output.",
            Access::Destructive,
            input(
                json!({
                    "command": text("Program to run"),
                    "args": { "type": "array", "items": { "type": "string" }, "description": "Program arguments" },
                    "working_directory": text("Working directory; defaults to the workspace root"),
                }),
                &["command"],
            ),
            output(
                json!({
                    "success": { "type": "boolean" },
                    "exit_code": { "type": ["integer", "null"] },
                    "stdout": { "type": "string" },
                    "stderr": { "type": "string" },
                    "error": { "type": "string" },
                }),
                &["success", "stdout", "stderr"],
            ),
        ),
    ]
}

/// Pair every catalog entry with a handler that runs on `thread`.
pub fn build_registry(thread: &CommandThread) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for descriptor in tool_descriptors() {
        match handler_for(&descriptor.name, thread) {
            Some(handler) => registry.register(descriptor, handler),
            None => warn!(tool = %descriptor.name, "tool has no handler; not registered"),
        }
    }
    registry
}

fn handler_for(name: &str, thread: &CommandThread) -> Option<ToolHandler> {
    let handler = match name {
        "build" => async_tool(thread, |backend, args: BuildArgs, reply| {
            backend.build(args, reply)
        }),
        "debug" => async_tool(thread, |backend, args: ProjectArgs, reply| {
            backend.debug(args, reply)
        }),
        "stop_debug" => sync_tool(thread, |backend, _: NoArgs| backend.stop_debug()),
        "open_file" => sync_tool(thread, |backend, args: FileArgs| backend.open_file(args)),
        "close_file" => sync_tool(thread, |backend, args: FileArgs| backend.close_file(args)),
        "save_file" => sync_tool(thread, |backend, args: FileArgs| backend.save_file(args)),
        "get_file_plain_text" => sync_tool(thread, |backend, args: FileArgs| {
            backend.get_file_plain_text(args)
        }),
        "set_file_plain_text" => sync_tool(thread, |backend, args: SetTextArgs| {
            backend.set_file_plain_text(args)
        }),
        "find_files_in_project" => sync_tool(thread, |backend, args: FindFilesArgs| {
            backend.find_files_in_project(args)
        }),
        "find_files_in_projects" => sync_tool(thread, |backend, args: PatternArgs| {
            backend.find_files_in_projects(args)
        }),
        "search_in_file" => sync_tool(thread, |backend, args: SearchInFileArgs| {
            backend.search_in_file(args)
        }),
        "search_in_files" => async_tool(thread, |backend, args: SearchInFilesArgs, reply| {
            backend.search_in_files(args, reply)
        }),
        "search_in_directory" => {
            async_tool(thread, |backend, args: SearchInDirectoryArgs, reply| {
                backend.search_in_directory(args, reply)
            })
        }
        "replace_in_file" => sync_tool(thread, |backend, args: ReplaceInFileArgs| {
            backend.replace_in_file(args)
        }),
        "replace_in_files" => async_tool(thread, |backend, args: ReplaceInFilesArgs, reply| {
            backend.replace_in_files(args, reply)
        }),
        "replace_in_directory" => {
            async_tool(thread, |backend, args: ReplaceInDirectoryArgs, reply| {
                backend.replace_in_directory(args, reply)
            })
        }
        "list_build_configs" => sync_tool(thread, |backend, args: ProjectArgs| {
            backend.list_build_configs(args)
        }),
        "switch_build_config" => sync_tool(thread, |backend, args: SwitchBuildConfigArgs| {
            backend.switch_build_config(args)
        }),
        "list_projects" => sync_tool(thread, |backend, _: NoArgs| backend.list_projects()),
        "list_project_dependencies" => sync_tool(thread, |backend, args: ProjectArgs| {
            backend.list_project_dependencies(args)
        }),
        "list_sessions" => sync_tool(thread, |backend, _: NoArgs| backend.list_sessions()),
        "load_session" => sync_tool(thread, |backend, args: SessionArgs| {
            backend.load_session(args)
        }),
        "save_session" => sync_tool(thread, |backend, args: SessionArgs| {
            backend.save_session(args)
        }),
        "list_issues" => sync_tool(thread, |backend, _: NoArgs| backend.list_issues()),
        "list_file_issues" => sync_tool(thread, |backend, args: FileArgs| {
            backend.list_file_issues(args)
        }),
        "quit" => sync_tool(thread, |backend, _: NoArgs| backend.quit()),
        "get_current_project" => {
            sync_tool(thread, |backend, _: NoArgs| backend.get_current_project())
        }
        "get_current_build_config" => {
            sync_tool(thread, |backend, _: NoArgs| backend.get_current_build_config())
        }
        "get_current_session" => {
            sync_tool(thread, |backend, _: NoArgs| backend.get_current_session())
        }
        "get_build_status" => sync_tool(thread, |backend, _: NoArgs| backend.get_build_status()),
        "execute_command" => async_tool(thread, |backend, args: ExecuteCommandArgs, reply| {
            backend.execute_command(args, reply)
        }),
        _ => return None,
    };
    Some(handler)
}

/// A tool that runs to completion on the command thread while the caller waits.
fn sync_tool<A, R, F>(thread: &CommandThread, op: F) -> ToolHandler
where
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(&mut dyn CommandBackend, A) -> R + Copy + Send + Sync + 'static,
{
    let thread = thread.clone();
    tool_handler(move |arguments, completion| {
        let args = match decode_arguments::<A>(arguments) {
            Ok(args) => args,
            Err(error) => return completion.fail(error),
        };
        let result = thread
            .call(move |backend| op(backend, args))
            .map_err(|err| {
                let detail = err.message().map_or_else(|| err.to_string(), str::to_string);
                JsonRpcError::internal_error(format!("Internal error: {detail}"))
            })
            .and_then(encode_result);
        completion.complete(result);
    })
}

/// A tool started on the command thread that answers later through a `Reply`.
fn async_tool<A, R, F>(thread: &CommandThread, op: F) -> ToolHandler
where
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(&mut dyn CommandBackend, A, Reply<R>) + Copy + Send + Sync + 'static,
{
    let thread = thread.clone();
    tool_handler(move |arguments, completion| {
        let args = match decode_arguments::<A>(arguments) {
            Ok(args) => args,
            Err(error) => return completion.fail(error),
        };
        let posted = thread.post(move |backend| {
            let guard = completion.guard();
            let reply: Reply<R> =
                Box::new(move |result| completion.complete(encode_result(result)));
            let outcome = catch_unwind(AssertUnwindSafe(|| op(backend, args, reply)));
            if let Err(payload) = outcome {
                let message = panic_message(payload.as_ref());
                error!(%message, "tool panicked on the command thread");
                guard.complete_if_pending(Err(JsonRpcError::internal_error(message)));
            }
        });
        // A job that could not be queued is dropped with its completion, which answers -32603.
        if let Err(err) = posted {
            warn!(error = %err, "tool job was not queued");
        }
    })
}

fn decode_arguments<A: DeserializeOwned>(arguments: Map<String, Value>) -> Result<A, JsonRpcError> {
    serde_json::from_value(Value::Object(arguments))
        .map_err(|err| JsonRpcError::invalid_params(format!("Invalid arguments: {err}")))
}

fn encode_result<R: Serialize>(result: R) -> MethodResult {
    serde_json::to_value(result).map_err(|err| {
        JsonRpcError::internal_error(format!("Internal error: failed to encode result: {err}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tests::RecordingBackend;
    use crate::mcp::dispatcher::ProtocolDispatcher;
    use crate::mcp::protocol::{
        INTERNAL_ERROR_CODE, INVALID_PARAMS_CODE, JsonRpcId, JsonRpcResponse,
    };
    use std::collections::HashSet;
    use std::sync::mpsc;
    use std::time::Duration;

    fn dispatcher() -> ProtocolDispatcher {
        let thread = CommandThread::spawn(RecordingBackend::default()).expect("spawn");
        ProtocolDispatcher::new(build_registry(&thread))
    }

    fn call(dispatcher: &ProtocolDispatcher, name: &str, arguments: Value) -> JsonRpcResponse {
        let (tx, rx) = mpsc::channel();
        dispatcher.dispatch(
            "tools/call",
            Some(json!({ "name": name, "arguments": arguments })),
            JsonRpcId::String("t".to_string()),
            move |response| {
                let _ = tx.send(response);
            },
        );
        let response = rx.recv_timeout(Duration::from_secs(10)).expect("response");
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        response
    }

    #[test]
    fn catalog_names_are_unique_and_complete() {
        let descriptors = tool_descriptors();
        assert_eq!(descriptors.len(), 31);
        let names: HashSet<&str> = descriptors.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names.len(), descriptors.len());
        for name in ["build", "list_projects", "quit", "execute_command"] {
            assert!(names.contains(name), "missing {name}");
        }
        for descriptor in &descriptors {
            assert_eq!(descriptor.input_schema["type"], json!("object"));
            assert!(!descriptor.title.is_empty());
        }
    }

    #[test]
    fn every_tool_gets_a_handler() {
        let thread = CommandThread::spawn(RecordingBackend::default()).expect("spawn");
        let registry = build_registry(&thread);
        assert_eq!(registry.len(), tool_descriptors().len());
    }

    #[test]
    fn sync_tool_wraps_backend_result() {
        let dispatcher = dispatcher();
        let response = call(&dispatcher, "list_projects", json!({}));
        let result = response.result.expect("result");
        assert_eq!(result["isError"], json!(false));
        assert_eq!(result["structuredContent"]["projects"][0]["name"], json!("demo"));
        assert_eq!(response.id, JsonRpcId::String("t".to_string()));
    }

    #[test]
    fn async_tool_completes_from_another_thread() {
        let dispatcher = dispatcher();
        let response = call(&dispatcher, "build", json!({ "project": "demo" }));
        let result = response.result.expect("result");
        assert_eq!(result["structuredContent"]["success"], json!(true));
    }

    #[test]
    fn bad_arguments_are_invalid_params() {
        let dispatcher = dispatcher();
        let response = call(&dispatcher, "open_file", json!({ "path": 7 }));
        assert_eq!(response.error.expect("error").code, INVALID_PARAMS_CODE);
        let response = call(&dispatcher, "search_in_file", json!({ "path": "a.rs" }));
        assert_eq!(response.error.expect("error").code, INVALID_PARAMS_CODE);
    }

    #[test]
    fn backend_failure_stays_in_result() {
        let dispatcher = dispatcher();
        let response = call(&dispatcher, "open_file", json!({ "path": "nope.txt" }));
        let result = response.result.expect("result");
        assert_eq!(result["structuredContent"]["success"], json!(false));
        assert!(response.error.is_none());
    }

    #[test]
    fn panicking_async_tool_reports_internal_error() {
        let dispatcher = dispatcher();
        let response = call(&dispatcher, "debug", json!({}));
        let error = response.error.expect("error");
        assert_eq!(error.code, INTERNAL_ERROR_CODE);
        assert!(error.message.contains("debugger exploded"));
    }

    #[test]
    fn panicking_sync_tool_reports_internal_error() {
        let dispatcher = dispatcher();
        let response = call(&dispatcher, "stop_debug", json!({}));
        let error = response.error.expect("error");
        assert_eq!(error.code, INTERNAL_ERROR_CODE);
        assert!(error.message.contains("disk on fire"), "{}", error.message);
        let response = call(&dispatcher, "list_projects", json!({}));
        assert!(response.result.is_some());
    }

    #[test]
    fn dropped_reply_reports_internal_error() {
        let dispatcher = dispatcher();
        let response = call(
            &dispatcher,
            "search_in_directory",
            json!({ "directory": ".", "pattern": "x" }),
        );
        assert_eq!(response.error.expect("error").code, INTERNAL_ERROR_CODE);
    }
}
