//! Execution handler: the shell tool as seen by the orchestration loop.
//!
//! Combines a [`CommandSession`] with the command policy. `handle` is total:
//! client errors, timeouts, and session faults all come back as
//! [`ToolResponse`] values and nothing escapes to the caller's turn loop.

use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, instrument, warn};

use crate::core::policy::{self, Verdict};
use crate::core::types::{CommandRequest, ExecutionResult, ToolResponse, exit_message};
use crate::io::config::ShellConfig;
use crate::io::session::{CommandSession, ShellSession};

/// Characters of the command recorded in the audit log.
const AUDIT_COMMAND_CHARS: usize = 100;

pub struct ExecutionHandler<S: CommandSession = ShellSession> {
    session: S,
    timeout: Duration,
    max_output_lines: usize,
}

impl ExecutionHandler<ShellSession> {
    /// Start a shell session configured by `config` and wrap it.
    pub fn from_config(config: &ShellConfig) -> Result<Self> {
        let session = ShellSession::start(config)?;
        Ok(Self::new(session, config.timeout(), config.max_output_lines))
    }
}

impl<S: CommandSession> ExecutionHandler<S> {
    pub fn new(session: S, timeout: Duration, max_output_lines: usize) -> Self {
        Self {
            session,
            timeout,
            max_output_lines,
        }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    #[instrument(skip_all, fields(restart = request.restart))]
    pub fn handle(&mut self, request: &CommandRequest) -> ToolResponse {
        if request.restart {
            return match self.session.restart() {
                Ok(()) => ToolResponse::restarted(),
                Err(err) => {
                    error!(err = %format!("{err:#}"), "session restart failed");
                    ToolResponse::fault(format!("Error restarting session: {err:#}"))
                }
            };
        }

        let command = request.command.as_str();
        if command.trim().is_empty() {
            return ToolResponse::rejected("No command provided");
        }

        if let Verdict::Blocked { reason } = policy::validate(command) {
            warn!(command = %audit_prefix(command), reason = %reason, "blocked dangerous command");
            return ToolResponse::rejected(reason);
        }

        let timeout = self.timeout;
        let session = &mut self.session;
        match panic::catch_unwind(AssertUnwindSafe(|| session.execute(command, timeout))) {
            Ok(result) => self.finish(command, result),
            Err(payload) => {
                let description = panic_description(payload.as_ref());
                error!(description = %description, "command execution panicked");
                if let Err(err) = self.session.restart() {
                    error!(err = %format!("{err:#}"), "session restart after panic failed");
                }
                ToolResponse::fault(format!("Error executing command: {description}"))
            }
        }
    }

    /// Sanitize, truncate, audit, and compose the response for an executed command.
    fn finish(&self, command: &str, result: ExecutionResult) -> ToolResponse {
        let output = self.clean(&result.output);
        let mut error = result
            .error
            .as_deref()
            .filter(|text| !text.is_empty())
            .map(|text| self.clean(text));
        if error.is_none() && result.exit_code != 0 {
            error = Some(exit_message(result.exit_code));
        }

        info!(
            target: "harness::audit",
            command = %audit_prefix(command),
            output_len = output.len(),
            error_len = error.as_ref().map_or(0, String::len),
            exit_code = result.exit_code,
            "command executed"
        );

        ToolResponse {
            output,
            error,
            exit_code: result.exit_code,
            message: Some(exit_message(result.exit_code)),
        }
    }

    fn clean(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }
        policy::truncate(&policy::sanitize(text), self.max_output_lines)
    }

    pub fn close(&mut self) {
        self.session.close();
    }
}

fn audit_prefix(command: &str) -> String {
    command.chars().take(AUDIT_COMMAND_CHARS).collect()
}

fn panic_description(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "internal panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FAULT_EXIT_CODE;
    use crate::test_support::{ScriptedSession, scripted_handler};

    #[test]
    fn empty_command_is_rejected_without_execution() {
        let mut handler = scripted_handler(Vec::new());
        let response = handler.handle(&CommandRequest::command("   "));
        assert_eq!(response, ToolResponse::rejected("No command provided"));
        assert_eq!(handler.session().calls(), 0);
    }

    #[test]
    fn denylisted_command_never_reaches_session() {
        let mut handler = scripted_handler(Vec::new());
        let response = handler.handle(&CommandRequest::command("rm -rf /"));
        assert_eq!(response.exit_code, 1);
        assert_eq!(response.output, "");
        assert!(
            response
                .error
                .as_deref()
                .is_some_and(|err| err.starts_with("Blocked dangerous command pattern"))
        );
        assert_eq!(handler.session().calls(), 0);
    }

    #[test]
    fn restart_ignores_command_text() {
        let mut handler = scripted_handler(Vec::new());
        let request = CommandRequest {
            command: "echo ignored".to_string(),
            restart: true,
        };
        let response = handler.handle(&request);
        assert_eq!(response, ToolResponse::restarted());
        assert_eq!(handler.session().restarts(), 1);
        assert_eq!(handler.session().calls(), 0);
    }

    #[test]
    fn success_carries_output_and_message() {
        let mut handler = scripted_handler(vec![ExecutionResult::completed(
            "hello\n".to_string(),
            0,
        )]);
        let response = handler.handle(&CommandRequest::command("echo hello"));
        assert_eq!(
            response,
            ToolResponse {
                output: "hello\n".to_string(),
                error: None,
                exit_code: 0,
                message: Some("Command executed successfully".to_string()),
            }
        );
        assert_eq!(handler.session().calls(), 1);
    }

    #[test]
    fn nonzero_exit_is_reported_not_faulted() {
        let mut handler = scripted_handler(vec![ExecutionResult::completed(
            "grep: nothing\n".to_string(),
            2,
        )]);
        let response = handler.handle(&CommandRequest::command("grep x missing"));
        assert_eq!(response.exit_code, 2);
        assert_eq!(response.output, "grep: nothing\n");
        assert_eq!(response.error.as_deref(), Some("Command exited with code 2"));
        assert_eq!(response.message.as_deref(), Some("Command exited with code 2"));
    }

    #[test]
    fn output_and_error_are_sanitized_and_truncated() {
        let output = "api_key=abcdef1234567890abcdef\nline 2\nline 3\nline 4\n".to_string();
        let mut handler = ExecutionHandler::new(
            ScriptedSession::new(vec![ExecutionResult {
                output,
                error: Some("PASSWORD=letmein".to_string()),
                exit_code: 0,
            }]),
            Duration::from_secs(1),
            2,
        );
        let response = handler.handle(&CommandRequest::command("cat creds"));
        assert_eq!(
            response.output,
            "api_key=[REDACTED]\nline 2\n\n[Output truncated: 4 total lines, showing first 2]"
        );
        assert_eq!(response.error.as_deref(), Some("password=[REDACTED]"));
    }

    #[test]
    fn session_timeout_passes_through() {
        let mut handler =
            scripted_handler(vec![ExecutionResult::timed_out(Duration::from_secs(1))]);
        let response = handler.handle(&CommandRequest::command("sleep 5"));
        assert_eq!(response.exit_code, FAULT_EXIT_CODE);
        assert_eq!(
            response.error.as_deref(),
            Some("Command timed out after 1 seconds")
        );
    }

    #[test]
    fn panic_in_session_becomes_fault_response() {
        let mut handler = scripted_handler(Vec::new());
        handler.session_mut().panic_next();
        let response = handler.handle(&CommandRequest::command("echo boom"));
        assert_eq!(response.exit_code, FAULT_EXIT_CODE);
        assert!(
            response
                .error
                .as_deref()
                .is_some_and(|err| err.contains("scripted session panic"))
        );
        assert_eq!(handler.session().restarts(), 1);
    }

    #[test]
    fn audit_prefix_caps_length() {
        let long = "x".repeat(250);
        assert_eq!(audit_prefix(&long).len(), AUDIT_COMMAND_CHARS);
        assert_eq!(audit_prefix("ls"), "ls");
    }
}
