//! Test-only helpers: scripted sessions and shell-backed fixtures.

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;

use crate::core::types::ExecutionResult;
use crate::io::config::ShellConfig;
use crate::io::handler::ExecutionHandler;
use crate::io::session::CommandSession;

/// Session that replays queued results without spawning a process.
///
/// Returns a successful empty result once the queue is exhausted.
#[derive(Debug, Default)]
pub struct ScriptedSession {
    results: VecDeque<ExecutionResult>,
    commands: Vec<String>,
    restarts: u32,
    closed: bool,
    panic_next: bool,
}

impl ScriptedSession {
    pub fn new(results: Vec<ExecutionResult>) -> Self {
        Self {
            results: results.into(),
            ..Self::default()
        }
    }

    /// Number of commands that reached the session.
    pub fn calls(&self) -> usize {
        self.commands.len()
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Make the next `execute` call panic.
    pub fn panic_next(&mut self) {
        self.panic_next = true;
    }
}

impl CommandSession for ScriptedSession {
    fn execute(&mut self, command: &str, _timeout: Duration) -> ExecutionResult {
        self.commands.push(command.to_string());
        if std::mem::take(&mut self.panic_next) {
            panic!("scripted session panic");
        }
        self.results
            .pop_front()
            .unwrap_or_else(|| ExecutionResult::completed(String::new(), 0))
    }

    fn restart(&mut self) -> Result<()> {
        self.restarts += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Handler over a [`ScriptedSession`] with a generous output ceiling.
pub fn scripted_handler(results: Vec<ExecutionResult>) -> ExecutionHandler<ScriptedSession> {
    ExecutionHandler::new(
        ScriptedSession::new(results),
        Duration::from_secs(5),
        1000,
    )
}

/// Shell config rooted at `dir` with a short timeout.
pub fn test_shell_config(dir: &Path, timeout: Duration) -> ShellConfig {
    ShellConfig {
        working_dir: Some(dir.to_path_buf()),
        timeout_secs: timeout.as_secs().max(1),
        ..ShellConfig::default()
    }
}

/// Real shell handler rooted at `dir` with an exact (sub-second capable) timeout.
pub fn shell_handler(
    dir: &Path,
    timeout: Duration,
    max_output_lines: usize,
) -> Result<ExecutionHandler> {
    let config = ShellConfig {
        max_output_lines,
        ..test_shell_config(dir, timeout)
    };
    let session = crate::io::session::ShellSession::start(&config)?;
    Ok(ExecutionHandler::new(session, timeout, max_output_lines))
}
