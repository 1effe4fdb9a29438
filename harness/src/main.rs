//! Persistent shell and file tools for agent loops.
//!
//! `harness serve` speaks a line-delimited JSON protocol on stdin/stdout so an
//! orchestration loop in any language can drive the tools; `exec` and `check`
//! are one-shot conveniences.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;

use harness::core::policy::{self, Verdict};
use harness::core::types::CommandRequest;
use harness::exit_codes;
use harness::io::config::load_config;
use harness::io::handler::ExecutionHandler;
use harness::tools::{ToolCall, ToolDispatcher};

#[derive(Parser)]
#[command(
    name = "harness",
    version,
    about = "Persistent shell and file tools for agent loops"
)]
struct Cli {
    /// Path to the TOML config (defaults apply when the file is missing).
    #[arg(long, global = true, default_value = "harness.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read `{"tool": ..., "input": {...}}` lines from stdin, answer one JSON line each.
    Serve,
    /// Run one command through the shell tool and print its JSON response.
    Exec {
        /// Shell command text.
        command: String,
    },
    /// Report whether the command policy would block a command.
    Check {
        /// Shell command text.
        command: String,
    },
}

fn main() {
    harness::logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve => cmd_serve(&cli.config),
        Command::Exec { command } => cmd_exec(&cli.config, command),
        Command::Check { command } => Ok(cmd_check(&command)),
    }
}

fn cmd_serve(config_path: &Path) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let mut tools = ToolDispatcher::from_config(&cfg)?;
    info!("serving tool calls on stdin");

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout().lock();
    for line in stdin.lock().lines() {
        let line = line.context("read stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<ToolCall>(&line) {
            Ok(call) => tools.dispatch_call(&call),
            Err(err) => json!({ "error": format!("Invalid tool call: {err}") }),
        };
        serde_json::to_writer(&mut stdout, &response).context("write response")?;
        stdout.write_all(b"\n").context("write response")?;
        stdout.flush().context("flush stdout")?;
    }

    tools.close();
    Ok(exit_codes::OK)
}

fn cmd_exec(config_path: &Path, command: String) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let mut handler = ExecutionHandler::from_config(&cfg.shell)?;
    let response = handler.handle(&CommandRequest::command(command));
    handler.close();

    let rendered = serde_json::to_string_pretty(&response).context("serialize response")?;
    println!("{rendered}");
    Ok(if response.is_success() {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

fn cmd_check(command: &str) -> i32 {
    match policy::validate(command) {
        Verdict::Allowed => {
            println!("allowed");
            exit_codes::OK
        }
        Verdict::Blocked { reason } => {
            println!("{reason}");
            exit_codes::BLOCKED
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_serve_with_default_config() {
        let cli = Cli::parse_from(["harness", "serve"]);
        assert!(matches!(cli.command, Command::Serve));
        assert_eq!(cli.config, PathBuf::from("harness.toml"));
    }

    #[test]
    fn parse_exec_with_config() {
        let cli = Cli::parse_from(["harness", "exec", "--config", "cfg.toml", "ls -la"]);
        assert_eq!(cli.config, PathBuf::from("cfg.toml"));
        assert!(matches!(cli.command, Command::Exec { ref command } if command == "ls -la"));
    }

    #[test]
    fn check_reports_blocked_commands() {
        assert_eq!(cmd_check("rm -rf /"), exit_codes::BLOCKED);
        assert_eq!(cmd_check("ls"), exit_codes::OK);
    }
}
