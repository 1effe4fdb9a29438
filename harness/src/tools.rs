//! Tool dispatch: routes a named tool invocation from the model to its handler.
//!
//! This is the surface an orchestration loop drives. Inputs and outputs are
//! JSON values; every failure comes back as an `{"error": ...}` object.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::core::types::CommandRequest;
use crate::io::config::HarnessConfig;
use crate::io::editor::{EditRequest, Editor};
use crate::io::handler::ExecutionHandler;
use crate::io::memory::{MemoryRequest, MemoryStore};
use crate::io::session::{CommandSession, ShellSession};

/// Tool name for the persistent shell.
pub const BASH_TOOL: &str = "bash";
/// Tool name for the file editor.
pub const EDITOR_TOOL: &str = "str_replace_based_edit_tool";
/// Tool name for the note store.
pub const MEMORY_TOOL: &str = "memory";

/// One line of the `serve` protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub input: Value,
}

pub struct ToolDispatcher<S: CommandSession = ShellSession> {
    shell: ExecutionHandler<S>,
    editor: Editor,
    memory: MemoryStore,
}

impl ToolDispatcher<ShellSession> {
    pub fn from_config(config: &HarnessConfig) -> Result<Self> {
        let shell = ExecutionHandler::from_config(&config.shell)?;
        let editor = Editor::new(config.editor.base_path.clone());
        let memory = MemoryStore::open(&config.memory.base_path)?;
        Ok(Self::new(shell, editor, memory))
    }
}

impl<S: CommandSession> ToolDispatcher<S> {
    pub fn new(shell: ExecutionHandler<S>, editor: Editor, memory: MemoryStore) -> Self {
        Self {
            shell,
            editor,
            memory,
        }
    }

    pub fn shell(&self) -> &ExecutionHandler<S> {
        &self.shell
    }

    pub fn dispatch_call(&mut self, call: &ToolCall) -> Value {
        self.dispatch(&call.tool, &call.input)
    }

    pub fn dispatch(&mut self, name: &str, input: &Value) -> Value {
        debug!(tool = name, "dispatching tool call");
        match name {
            BASH_TOOL => match CommandRequest::deserialize(input) {
                Ok(request) => to_json(&self.shell.handle(&request)),
                Err(err) => invalid_input(name, &err),
            },
            EDITOR_TOOL => match EditRequest::deserialize(input) {
                Ok(request) => to_json(&self.editor.handle(&request)),
                Err(err) => invalid_input(name, &err),
            },
            MEMORY_TOOL => match MemoryRequest::deserialize(input) {
                Ok(request) => to_json(&self.memory.handle(&request)),
                Err(err) => invalid_input(name, &err),
            },
            other => {
                warn!(tool = other, "no handler registered");
                json!({ "error": format!("No handler registered for tool: {other}") })
            }
        }
    }

    pub fn close(&mut self) {
        self.shell.close();
    }
}

fn invalid_input(tool: &str, err: &serde_json::Error) -> Value {
    warn!(tool, err = %err, "invalid tool input");
    json!({ "error": format!("Invalid input for {tool}: {err}") })
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value)
        .unwrap_or_else(|err| json!({ "error": format!("Failed to encode response: {err}") }))
}
