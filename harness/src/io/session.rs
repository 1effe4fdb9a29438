//! Persistent shell session with sentinel-framed command execution.
//!
//! One interpreter process serves many commands, so environment variables and
//! `cd` persist between them. Completion is detected by echoing a fresh
//! sentinel after each command (see [`crate::core::framing`]). Timeouts and
//! faults kill the process and spawn a replacement before returning, so the
//! session is usable again on the next call.
//!
//! Output is captured within `max_output_lines` (plus a few trailing lines for
//! the exit-status line); anything beyond is counted and dropped while the
//! sentinel is still looked for, and the result carries the truncation summary.
//!
//! Commands must be issued one at a time; callers sharing a session across
//! threads need their own lock around it.
//!
//! Known limitation: writing the command to the shell's stdin is not covered by
//! the timeout. A command larger than the pipe buffer, sent while the shell is
//! blocked on an earlier part of it, can stall the write past the budget.

use std::fmt;
use std::io::Write;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, info, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::framing::{Sentinel, frame_command};
use crate::core::state::{SessionEvent, SessionState};
use crate::core::types::ExecutionResult;
use crate::io::config::ShellConfig;
use crate::io::reader::{Capture, OutputReader, ReadOutcome};

/// How long to wait for a killed interpreter to be reaped.
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// Abstraction over a command-executing session.
///
/// The execution handler talks to sessions only through this trait; tests use
/// scripted sessions that never spawn processes.
pub trait CommandSession {
    /// Run one command. Never fails: faults are reported as results with
    /// exit code `-1` after the session has recovered.
    fn execute(&mut self, command: &str, timeout: Duration) -> ExecutionResult;

    /// Discard the current process and start a fresh one.
    fn restart(&mut self) -> Result<()>;

    /// Terminate the process. Idempotent.
    fn close(&mut self);
}

/// Typed session faults, distinguished from plain I/O errors at recovery time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFault {
    /// The sentinel did not arrive within the command's budget.
    TimedOut(Duration),
    /// The interpreter's output stream closed mid-command (e.g. `exit`).
    StreamClosed,
    /// The sentinel arrived but the exit-status line did not.
    MissingExitStatus,
}

impl fmt::Display for SessionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionFault::TimedOut(budget) => write!(f, "command timed out after {budget:?}"),
            SessionFault::StreamClosed => f.write_str("shell output stream closed"),
            SessionFault::MissingExitStatus => f.write_str("exit status line missing from output"),
        }
    }
}

impl std::error::Error for SessionFault {}

struct ShellProcess {
    child: Child,
    stdin: ChildStdin,
    reader: OutputReader,
}

impl ShellProcess {
    fn has_exited(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => false,
            Ok(Some(status)) => {
                debug!(exit_code = ?status.code(), "shell process exited");
                true
            }
            Err(err) => {
                warn!(err = %err, "failed to poll shell process");
                true
            }
        }
    }

    fn terminate(self) {
        let ShellProcess {
            mut child,
            stdin,
            reader,
        } = self;
        drop(stdin);
        terminate_child(&mut child);
        drop(reader);
    }
}

/// Long-lived shell process driven over stdin with output drained by an
/// [`OutputReader`].
pub struct ShellSession {
    config: ShellConfig,
    process: Option<ShellProcess>,
    state: SessionState,
    executions: u64,
}

impl ShellSession {
    /// Spawn the interpreter described by `config`.
    pub fn start(config: &ShellConfig) -> Result<Self> {
        let mut session = Self {
            config: config.clone(),
            process: None,
            state: SessionState::Dead,
            executions: 0,
        };
        session.spawn()?;
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of commands sent to this session (restarts excluded).
    pub fn executions(&self) -> u64 {
        self.executions
    }

    /// Whether the session is idle with a running interpreter.
    pub fn is_alive(&mut self) -> bool {
        self.state == SessionState::Alive
            && self
                .process
                .as_mut()
                .is_some_and(|process| !process.has_exited())
    }

    fn advance(&mut self, event: SessionEvent) -> Result<()> {
        let next = self.state.next(event)?;
        debug!(from = %self.state, to = %next, ?event, "session transition");
        self.state = next;
        Ok(())
    }

    #[instrument(skip_all, fields(program = %self.config.program))]
    fn spawn(&mut self) -> Result<()> {
        self.advance(SessionEvent::Spawn)?;
        match self.launch() {
            Ok(process) => {
                debug!(pid = process.child.id(), "shell process started");
                self.process = Some(process);
                self.advance(SessionEvent::Ready)
            }
            Err(err) => {
                error!(err = %format!("{err:#}"), "failed to start shell");
                self.advance(SessionEvent::Kill)?;
                Err(err)
            }
        }
    }

    fn launch(&self) -> Result<ShellProcess> {
        let mut cmd = Command::new(&self.config.program);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group so a timeout can kill the command's children too.
            cmd.process_group(0);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawn {}", self.config.program))?;

        match attach_pipes(&mut child, self.config.queue_capacity) {
            Ok((stdin, reader)) => Ok(ShellProcess {
                child,
                stdin,
                reader,
            }),
            Err(err) => {
                terminate_child(&mut child);
                Err(err)
            }
        }
    }

    fn kill(&mut self) {
        if let Some(process) = self.process.take() {
            process.terminate();
        }
        self.state = SessionState::Dead;
    }

    /// Respawn if the process died since the last command (self-healing).
    fn ensure_alive(&mut self) -> Result<()> {
        if self.is_alive() {
            return Ok(());
        }
        info!(state = %self.state, "shell session not alive, respawning");
        self.kill();
        self.spawn()
    }

    fn run_framed(&mut self, command: &str, timeout: Duration) -> Result<ExecutionResult> {
        self.ensure_alive()?;
        let sentinel = Sentinel::generate();
        self.advance(SessionEvent::Begin)?;

        let process = self
            .process
            .as_mut()
            .ok_or_else(|| anyhow!("no shell process"))?;
        process
            .stdin
            .write_all(frame_command(command, &sentinel).as_bytes())
            .context("write command to shell")?;
        process.stdin.flush().context("flush shell stdin")?;

        let mut capture = Capture::new(self.config.max_output_lines);
        match process
            .reader
            .read_until(sentinel.as_str(), timeout, &mut capture)
        {
            ReadOutcome::Marker => {}
            ReadOutcome::TimedOut => {
                debug!(collected = capture.total(), "discarding partial output");
                return Err(SessionFault::TimedOut(timeout).into());
            }
            ReadOutcome::Closed => {
                debug!(collected = capture.total(), "stream closed before sentinel");
                return Err(SessionFault::StreamClosed.into());
            }
        }

        if capture.dropped() > 0 {
            debug!(
                total = capture.total(),
                dropped = capture.dropped(),
                "output exceeded capture limit"
            );
        }
        let framed = capture.into_framed();
        let exit_code = framed.exit_code.ok_or(SessionFault::MissingExitStatus)?;
        self.advance(SessionEvent::Finish)?;
        Ok(ExecutionResult::completed(framed.output, exit_code))
    }

    fn recover(&mut self) {
        self.kill();
        if let Err(err) = self.spawn() {
            // Left dead; the next command retries the spawn.
            error!(err = %format!("{err:#}"), "failed to respawn shell session");
        }
    }
}

impl CommandSession for ShellSession {
    #[instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64, execution = self.executions + 1))]
    fn execute(&mut self, command: &str, timeout: Duration) -> ExecutionResult {
        self.executions += 1;
        match self.run_framed(command, timeout) {
            Ok(result) => {
                debug!(exit_code = result.exit_code, "command finished");
                result
            }
            Err(err) => {
                let result = match err.downcast_ref::<SessionFault>() {
                    Some(SessionFault::TimedOut(budget)) => {
                        warn!(
                            timeout_ms = budget.as_millis() as u64,
                            "command timed out, restarting session"
                        );
                        ExecutionResult::timed_out(*budget)
                    }
                    _ => {
                        warn!(err = %format!("{err:#}"), "session fault, restarting session");
                        ExecutionResult::session_error(&format!("{err:#}"))
                    }
                };
                self.recover();
                result
            }
        }
    }

    fn restart(&mut self) -> Result<()> {
        info!("restarting shell session");
        self.kill();
        self.spawn()
    }

    fn close(&mut self) {
        if self.process.is_some() {
            debug!("closing shell session");
        }
        self.kill();
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn attach_pipes(child: &mut Child, queue_capacity: usize) -> Result<(ChildStdin, OutputReader)> {
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("stdin was not piped"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let reader = OutputReader::spawn(stdout, queue_capacity)?;

    // Route the interpreter's stderr into the drained stream so both arrive
    // interleaved in one ordered sequence.
    stdin
        .write_all(b"exec 2>&1\n")
        .and_then(|()| stdin.flush())
        .context("redirect shell stderr")?;
    Ok((stdin, reader))
}

fn terminate_child(child: &mut Child) {
    #[cfg(unix)]
    kill_process_group(child.id());

    if let Err(err) = child.kill() {
        debug!(err = %err, "kill shell process");
    }
    match child.wait_timeout(REAP_TIMEOUT) {
        Ok(Some(_)) => {}
        Ok(None) => warn!(pid = child.id(), "shell process not reaped after kill"),
        Err(err) => warn!(err = %err, "wait for shell process"),
    }
}

/// Kill every process in the session's group (the shell and its children).
#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    let status = Command::new("kill")
        .arg("-KILL")
        .arg("--")
        .arg(format!("-{pgid}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(err) = status {
        debug!(err = %err, pgid, "kill process group");
    }
}
