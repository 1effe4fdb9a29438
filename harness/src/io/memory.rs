//! Memory tool: a small file store the model uses to keep notes across turns.
//!
//! Paths arrive under a virtual root (`/memories/...`, or `/scratchpad/...`)
//! that maps onto the configured directory. Every path is confined to that
//! directory the same way editor paths are.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::io::editor::{EditResponse, ViewKind};
use crate::io::paths::{self, read_text};

/// Prefixes the model uses for the store's root.
const VIRTUAL_ROOTS: [&str; 2] = ["/memories", "/scratchpad"];

fn first_line() -> usize {
    1
}

/// One memory invocation, tagged by `command`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum MemoryRequest {
    View {
        #[serde(default)]
        path: String,
        #[serde(default)]
        start_line: Option<usize>,
        #[serde(default)]
        end_line: Option<usize>,
    },
    Create {
        path: String,
        #[serde(default)]
        file_text: String,
    },
    StrReplace {
        path: String,
        #[serde(default)]
        old_str: String,
        #[serde(default)]
        new_str: String,
    },
    Insert {
        path: String,
        /// 1-based line the text is inserted before.
        #[serde(default = "first_line", alias = "insert_line")]
        line_number: usize,
        #[serde(default, alias = "insert_text")]
        text: String,
    },
    Delete {
        path: String,
    },
    Rename {
        #[serde(alias = "old_path")]
        path: String,
        new_path: String,
    },
}

impl MemoryRequest {
    pub fn path(&self) -> &str {
        match self {
            MemoryRequest::View { path, .. }
            | MemoryRequest::Create { path, .. }
            | MemoryRequest::StrReplace { path, .. }
            | MemoryRequest::Insert { path, .. }
            | MemoryRequest::Delete { path }
            | MemoryRequest::Rename { path, .. } => path,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MemoryRequest::View { .. } => "view",
            MemoryRequest::Create { .. } => "create",
            MemoryRequest::StrReplace { .. } => "str_replace",
            MemoryRequest::Insert { .. } => "insert",
            MemoryRequest::Delete { .. } => "delete",
            MemoryRequest::Rename { .. } => "rename",
        }
    }
}

#[derive(Debug)]
pub struct MemoryStore {
    root: PathBuf,
}

impl MemoryStore {
    /// Open the store at `root`, creating the directory if needed.
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)
            .with_context(|| format!("create memory directory {}", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    #[instrument(skip_all, fields(command = request.name(), path = request.path()))]
    pub fn handle(&mut self, request: &MemoryRequest) -> EditResponse {
        match self.apply(request) {
            Ok(response) => response,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "memory command failed");
                EditResponse::error(format!("Error executing {}: {err:#}", request.name()))
            }
        }
    }

    fn apply(&self, request: &MemoryRequest) -> Result<EditResponse> {
        let path = request.path();
        let full_path = self.resolve(path)?;
        match request {
            MemoryRequest::View {
                start_line,
                end_line,
                ..
            } => view(&full_path, path, *start_line, *end_line),
            MemoryRequest::Create { file_text, .. } => {
                if let Some(parent) = full_path.parent() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("create directory {}", parent.display()))?;
                }
                fs::write(&full_path, file_text).with_context(|| format!("write {path}"))?;
                Ok(EditResponse::message(format!("Created file: {path}")))
            }
            MemoryRequest::StrReplace {
                old_str, new_str, ..
            } => str_replace(&full_path, path, old_str, new_str),
            MemoryRequest::Insert {
                line_number, text, ..
            } => insert(&full_path, path, *line_number, text),
            MemoryRequest::Delete { .. } => self.delete(&full_path, path),
            MemoryRequest::Rename { new_path, .. } => {
                let target = self.resolve(new_path)?;
                if fs::symlink_metadata(&full_path).is_err() {
                    bail!("Path does not exist: {path}");
                }
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("create directory {}", parent.display()))?;
                }
                fs::rename(&full_path, &target)
                    .with_context(|| format!("rename {path} to {new_path}"))?;
                info!(from = path, to = %new_path, "renamed memory entry");
                Ok(EditResponse::message(format!("Renamed {path} to {new_path}")))
            }
        }
    }

    /// Strip the virtual root and confine what remains to the store.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = strip_virtual_root(path);
        if relative.is_empty() {
            return Ok(self.root.clone());
        }
        paths::confine(&self.root, Path::new(relative), path)
    }

    fn is_root(&self, full_path: &Path) -> bool {
        full_path == self.root
            || matches!(
                (fs::canonicalize(full_path), fs::canonicalize(&self.root)),
                (Ok(a), Ok(b)) if a == b
            )
    }

    fn delete(&self, full_path: &Path, path: &str) -> Result<EditResponse> {
        if self.is_root(full_path) {
            bail!("Cannot delete the memory root");
        }
        let metadata = fs::symlink_metadata(full_path)
            .map_err(|_| anyhow!("Path does not exist: {path}"))?;
        if metadata.is_dir() {
            fs::remove_dir_all(full_path).with_context(|| format!("delete {path}"))?;
            info!(path, "deleted memory directory");
            Ok(EditResponse::message(format!("Deleted directory: {path}")))
        } else {
            fs::remove_file(full_path).with_context(|| format!("delete {path}"))?;
            info!(path, "deleted memory file");
            Ok(EditResponse::message(format!("Deleted file: {path}")))
        }
    }
}

/// `/memories/notes.txt` -> `notes.txt`; `/memories` -> ``.
fn strip_virtual_root(path: &str) -> &str {
    let stripped = VIRTUAL_ROOTS
        .iter()
        .find_map(|root| {
            path.strip_prefix(*root)
                .filter(|rest| rest.is_empty() || rest.starts_with('/'))
        })
        .unwrap_or(path);
    stripped.trim_start_matches('/')
}

fn view(
    full_path: &Path,
    path: &str,
    start_line: Option<usize>,
    end_line: Option<usize>,
) -> Result<EditResponse> {
    if full_path.is_dir() {
        let shown = if path.is_empty() { "/" } else { path };
        return Ok(EditResponse {
            kind: Some(ViewKind::Directory),
            contents: Some(paths::list_dir(full_path, path)?),
            message: Some(format!("Directory listing for {shown}")),
            ..EditResponse::default()
        });
    }
    if !full_path.is_file() {
        bail!("Path does not exist: {path}");
    }

    let mut content = read_text(full_path, path)?;
    if start_line.is_some() || end_line.is_some() {
        let lines: Vec<&str> = content.split('\n').collect();
        let from = start_line.map_or(0, |n| n.saturating_sub(1)).min(lines.len());
        let to = end_line.unwrap_or(lines.len()).min(lines.len()).max(from);
        content = lines[from..to].join("\n");
    }
    Ok(EditResponse {
        kind: Some(ViewKind::File),
        content: Some(content),
        message: Some(format!("File contents: {path}")),
        ..EditResponse::default()
    })
}

fn str_replace(full_path: &Path, path: &str, old_str: &str, new_str: &str) -> Result<EditResponse> {
    if !full_path.is_file() {
        bail!("File does not exist: {path}");
    }
    if old_str.is_empty() {
        bail!("old_str parameter is required");
    }
    let content = read_text(full_path, path)?;
    if !content.contains(old_str) {
        bail!("String not found in file: {old_str}");
    }
    fs::write(full_path, content.replacen(old_str, new_str, 1))
        .with_context(|| format!("write {path}"))?;
    Ok(EditResponse::message(format!("Replaced text in file: {path}")))
}

fn insert(full_path: &Path, path: &str, line_number: usize, text: &str) -> Result<EditResponse> {
    if !full_path.is_file() {
        bail!("File does not exist: {path}");
    }
    let content = read_text(full_path, path)?;
    let mut lines: Vec<String> = content.split_inclusive('\n').map(str::to_string).collect();
    let index = line_number.saturating_sub(1).min(lines.len());
    if index > 0 && !lines[index - 1].ends_with('\n') {
        lines[index - 1].push('\n');
    }
    lines.insert(index, format!("{text}\n"));
    fs::write(full_path, lines.concat()).with_context(|| format!("write {path}"))?;
    Ok(EditResponse::message(format!(
        "Inserted text at line {line_number} in: {path}"
    )))
}
