//! Request/response types exchanged between the orchestration loop and the
//! execution handler.
//!
//! These are plain values: a request is consumed once, a result is produced
//! once per request. Serialized field names match the tool wire contract.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exit code reserved for internal failures (timeouts, session faults).
///
/// Never a real process exit status.
pub const FAULT_EXIT_CODE: i32 = -1;

/// Exit code reported for client-side validation errors.
pub const CLIENT_ERROR_EXIT_CODE: i32 = 1;

/// A single shell tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandRequest {
    /// Shell command text. Empty is a validation error unless `restart` is set.
    pub command: String,
    /// Discard the current session and start a fresh one; `command` is ignored.
    pub restart: bool,
}

impl CommandRequest {
    pub fn command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            restart: false,
        }
    }

    pub fn restart() -> Self {
        Self {
            command: String::new(),
            restart: true,
        }
    }
}

/// Raw outcome of one command sent to a session, before policy post-processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub output: String,
    pub error: Option<String>,
    pub exit_code: i32,
}

impl ExecutionResult {
    /// The command ran to completion; `exit_code` is the real process status.
    pub fn completed(output: String, exit_code: i32) -> Self {
        Self {
            output,
            error: None,
            exit_code,
        }
    }

    /// The command exceeded its budget and the session was replaced.
    pub fn timed_out(budget: Duration) -> Self {
        Self {
            output: String::new(),
            error: Some(format!(
                "Command timed out after {} seconds",
                format_budget(budget)
            )),
            exit_code: FAULT_EXIT_CODE,
        }
    }

    /// The session failed internally and was replaced.
    pub fn session_error(detail: &str) -> Self {
        Self {
            output: String::new(),
            error: Some(format!("Session error: {detail}")),
            exit_code: FAULT_EXIT_CODE,
        }
    }

    pub fn is_fault(&self) -> bool {
        self.exit_code == FAULT_EXIT_CODE
    }
}

/// Response handed back to the orchestration loop.
///
/// `output` and `exit_code` are always present; `error` and `message` are
/// omitted from the JSON form when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ToolResponse {
    /// Client-side rejection: nothing was executed.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            output: String::new(),
            error: Some(reason.into()),
            exit_code: CLIENT_ERROR_EXIT_CODE,
            message: None,
        }
    }

    /// Internal fault converted at the handler boundary.
    pub fn fault(description: impl Into<String>) -> Self {
        Self {
            output: String::new(),
            error: Some(description.into()),
            exit_code: FAULT_EXIT_CODE,
            message: None,
        }
    }

    pub fn restarted() -> Self {
        Self {
            output: String::new(),
            error: None,
            exit_code: 0,
            message: Some("New session started".to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0 && self.error.is_none()
    }
}

/// Human-readable summary appended to executed commands.
pub fn exit_message(exit_code: i32) -> String {
    if exit_code == 0 {
        "Command executed successfully".to_string()
    } else {
        format!("Command exited with code {exit_code}")
    }
}

/// Render a budget as whole seconds when possible (`30`), otherwise with one
/// decimal (`0.5`).
fn format_budget(budget: Duration) -> String {
    if budget.subsec_millis() == 0 {
        budget.as_secs().to_string()
    } else {
        format!("{:.1}", budget.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_missing_fields() {
        let request: CommandRequest = serde_json::from_str(r#"{"command":"ls"}"#).expect("parse");
        assert_eq!(request, CommandRequest::command("ls"));

        let request: CommandRequest = serde_json::from_str(r#"{"restart":true}"#).expect("parse");
        assert_eq!(request, CommandRequest::restart());
    }

    #[test]
    fn response_omits_absent_fields() {
        let json = serde_json::to_value(ToolResponse::restarted()).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({
                "output": "",
                "exit_code": 0,
                "message": "New session started",
            })
        );
    }

    #[test]
    fn timeout_message_states_budget() {
        let result = ExecutionResult::timed_out(Duration::from_secs(30));
        assert_eq!(
            result.error.as_deref(),
            Some("Command timed out after 30 seconds")
        );
        assert!(result.is_fault());

        let result = ExecutionResult::timed_out(Duration::from_millis(500));
        assert_eq!(
            result.error.as_deref(),
            Some("Command timed out after 0.5 seconds")
        );
    }

    #[test]
    fn exit_message_by_code() {
        assert_eq!(exit_message(0), "Command executed successfully");
        assert_eq!(exit_message(2), "Command exited with code 2");
        assert_eq!(exit_message(-1), "Command exited with code -1");
    }
}
