//! Purpose: Hold top-level CLI command dispatch for `codebridge`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Output envelopes and exit code semantics are decided in `main.rs` helpers.

use super::*;

pub(super) fn dispatch_command(command: Command, color_mode: ColorMode) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "codebridge", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Version => {
            emit_version_output(color_mode);
            Ok(RunOutcome::ok())
        }
        Command::Tools => {
            emit_tools(color_mode);
            Ok(RunOutcome::ok())
        }
        Command::Serve {
            bind,
            port,
            port_attempts,
            workspace,
            allow_non_loopback,
        } => {
            let config = serve_config(bind, port, port_attempts, workspace, allow_non_loopback)?;
            server::validate_config(&config)?;
            run_server(config)?;
            Ok(RunOutcome::ok())
        }
    }
}
