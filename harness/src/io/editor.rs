//! File view/create/edit tool with per-path undo.
//!
//! Every mutating command pushes the file's previous contents onto a stack kept
//! for that path; `undo_edit` pops exactly one level per call. Backups live in
//! memory for the lifetime of the editor.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::io::paths::{self, read_text};

/// One editor invocation, tagged by `command`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum EditRequest {
    View {
        path: String,
        #[serde(default)]
        view_range: Option<[i64; 2]>,
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
        insert_line: Option<usize>,
        #[serde(default)]
        new_str: String,
    },
    UndoEdit {
        path: String,
    },
}

impl EditRequest {
    pub fn path(&self) -> &str {
        match self {
            EditRequest::View { path, .. }
            | EditRequest::Create { path, .. }
            | EditRequest::StrReplace { path, .. }
            | EditRequest::Insert { path, .. }
            | EditRequest::UndoEdit { path } => path,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EditRequest::View { .. } => "view",
            EditRequest::Create { .. } => "create",
            EditRequest::StrReplace { .. } => "str_replace",
            EditRequest::Insert { .. } => "insert",
            EditRequest::UndoEdit { .. } => "undo_edit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewKind {
    File,
    Directory,
}

/// Editor response. Failures carry only `error`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditResponse {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ViewKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EditResponse {
    pub(crate) fn message(message: String) -> Self {
        Self {
            message: Some(message),
            ..Self::default()
        }
    }

    pub(crate) fn error(error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
pub struct Editor {
    base_path: Option<PathBuf>,
    backups: HashMap<PathBuf, Vec<String>>,
}

impl Editor {
    pub fn new(base_path: Option<PathBuf>) -> Self {
        Self {
            base_path,
            backups: HashMap::new(),
        }
    }

    /// Backups remaining for `path`, after path resolution.
    pub fn backup_depth(&self, path: &str) -> usize {
        self.resolve(path)
            .ok()
            .and_then(|full| self.backups.get(&full).map(Vec::len))
            .unwrap_or(0)
    }

    #[instrument(skip_all, fields(command = request.name(), path = request.path()))]
    pub fn handle(&mut self, request: &EditRequest) -> EditResponse {
        match self.apply(request) {
            Ok(response) => response,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "editor command failed");
                EditResponse::error(format!("Error executing {}: {err:#}", request.name()))
            }
        }
    }

    fn apply(&mut self, request: &EditRequest) -> Result<EditResponse> {
        let full_path = self.resolve(request.path())?;
        let path = request.path();
        match request {
            EditRequest::View { view_range, .. } => view(&full_path, path, *view_range),
            EditRequest::Create { file_text, .. } => self.create(&full_path, path, file_text),
            EditRequest::StrReplace {
                old_str, new_str, ..
            } => self.str_replace(&full_path, path, old_str, new_str),
            EditRequest::Insert {
                insert_line,
                new_str,
                ..
            } => {
                let line = insert_line.ok_or_else(|| anyhow!("insert_line parameter is required"))?;
                self.insert(&full_path, path, line, new_str)
            }
            EditRequest::UndoEdit { .. } => self.undo(&full_path, path),
        }
    }

    /// Resolve `path`, confining it to `base_path` when one is set.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        if path.is_empty() {
            bail!("path parameter is required");
        }
        match &self.base_path {
            Some(base) => paths::confine(base, Path::new(path), path),
            None => paths::absolute(path),
        }
    }

    fn push_backup(&mut self, full_path: &Path, contents: String) {
        let stack = self.backups.entry(full_path.to_path_buf()).or_default();
        stack.push(contents);
        debug!(depth = stack.len(), "pushed backup");
    }

    fn create(&mut self, full_path: &Path, path: &str, file_text: &str) -> Result<EditResponse> {
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let message = if full_path.is_file() {
            let previous = read_text(full_path, path)?;
            self.push_backup(full_path, previous);
            format!("Overwrote file: {path}")
        } else {
            format!("Created file: {path}")
        };
        fs::write(full_path, file_text).with_context(|| format!("write {path}"))?;
        Ok(EditResponse::message(message))
    }

    fn str_replace(
        &mut self,
        full_path: &Path,
        path: &str,
        old_str: &str,
        new_str: &str,
    ) -> Result<EditResponse> {
        if !full_path.is_file() {
            bail!("File does not exist: {path}");
        }
        if old_str.is_empty() {
            bail!("old_str parameter is required");
        }
        let content = read_text(full_path, path)?;
        let occurrences = content.matches(old_str).count();
        if occurrences == 0 {
            let preview: String = old_str.chars().take(100).collect();
            bail!("String not found in file: {preview}");
        }
        if occurrences > 1 {
            warn!(occurrences, "multiple occurrences found, replacing first");
        }

        let updated = content.replacen(old_str, new_str, 1);
        self.push_backup(full_path, content);
        fs::write(full_path, updated).with_context(|| format!("write {path}"))?;
        Ok(EditResponse::message(format!("Replaced text in file: {path}")))
    }

    fn insert(
        &mut self,
        full_path: &Path,
        path: &str,
        insert_line: usize,
        new_str: &str,
    ) -> Result<EditResponse> {
        if !full_path.is_file() {
            bail!("File does not exist: {path}");
        }
        let content = read_text(full_path, path)?;
        let mut lines: Vec<String> = content
            .split_inclusive('\n')
            .map(str::to_string)
            .collect();
        let index = insert_line.min(lines.len());

        // The new text must start on its own line.
        if index > 0 && !lines[index - 1].ends_with('\n') {
            lines[index - 1].push('\n');
        }
        let mut inserted = new_str.to_string();
        if !inserted.ends_with('\n') {
            inserted.push('\n');
        }
        lines.insert(index, inserted);

        let updated = lines.concat();
        self.push_backup(full_path, content);
        fs::write(full_path, updated).with_context(|| format!("write {path}"))?;
        Ok(EditResponse::message(format!(
            "Inserted text at line {insert_line} in: {path}"
        )))
    }

    fn undo(&mut self, full_path: &Path, path: &str) -> Result<EditResponse> {
        let previous = self
            .backups
            .get_mut(full_path)
            .and_then(Vec::pop)
            .ok_or_else(|| anyhow!("No backup available for: {path}"))?;
        fs::write(full_path, previous).with_context(|| format!("restore {path}"))?;
        info!(path, "restored previous contents");
        Ok(EditResponse::message(format!("Reverted last edit to: {path}")))
    }
}

fn view(full_path: &Path, path: &str, view_range: Option<[i64; 2]>) -> Result<EditResponse> {
    if full_path.is_dir() {
        return Ok(EditResponse {
            kind: Some(ViewKind::Directory),
            contents: Some(paths::list_dir(full_path, path)?),
            message: Some(format!("Directory listing for {path}")),
            ..EditResponse::default()
        });
    }
    if !full_path.is_file() {
        bail!("Path does not exist: {path}");
    }

    let content = read_text(full_path, path)?;
    let (content, message) = match view_range {
        Some([start, end]) => {
            let lines: Vec<&str> = content.split('\n').collect();
            // 1-based, inclusive.
            let from = usize::try_from(start.saturating_sub(1)).unwrap_or(0).min(lines.len());
            let to = usize::try_from(end).unwrap_or(0).min(lines.len()).max(from);
            (
                lines[from..to].join("\n"),
                format!("Lines {start}-{end} of {path}"),
            )
        }
        None => (content, format!("File contents: {path}")),
    };
    Ok(EditResponse {
        kind: Some(ViewKind::File),
        content: Some(content),
        message: Some(message),
        ..EditResponse::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn editor_in(dir: &Path) -> Editor {
        Editor::new(Some(dir.to_path_buf()))
    }

    fn create(path: &str, text: &str) -> EditRequest {
        EditRequest::Create {
            path: path.to_string(),
            file_text: text.to_string(),
        }
    }

    fn undo(path: &str) -> EditRequest {
        EditRequest::UndoEdit {
            path: path.to_string(),
        }
    }

    #[test]
    fn parses_tagged_requests() {
        let request: EditRequest = serde_json::from_str(
            r#"{"command":"view","path":"src/lib.rs","view_range":[2,4]}"#,
        )
        .expect("parse");
        assert_eq!(
            request,
            EditRequest::View {
                path: "src/lib.rs".to_string(),
                view_range: Some([2, 4]),
            }
        );
    }

    #[test]
    fn create_then_view() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut editor = editor_in(temp.path());

        let response = editor.handle(&create("notes/a.txt", "one\ntwo\nthree\n"));
        assert_eq!(response.message.as_deref(), Some("Created file: notes/a.txt"));
        assert_eq!(editor.backup_depth("notes/a.txt"), 0);

        let response = editor.handle(&EditRequest::View {
            path: "notes/a.txt".to_string(),
            view_range: Some([2, 3]),
        });
        assert_eq!(response.kind, Some(ViewKind::File));
        assert_eq!(response.content.as_deref(), Some("two\nthree"));

        let response = editor.handle(&EditRequest::View {
            path: "notes".to_string(),
            view_range: None,
        });
        assert_eq!(response.kind, Some(ViewKind::Directory));
        assert_eq!(response.contents, Some(vec!["a.txt".to_string()]));
    }

    #[test]
    fn str_replace_replaces_first_occurrence() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut editor = editor_in(temp.path());
        editor.handle(&create("a.txt", "x = 1\nx = 1\n"));

        let response = editor.handle(&EditRequest::StrReplace {
            path: "a.txt".to_string(),
            old_str: "x = 1".to_string(),
            new_str: "x = 2".to_string(),
        });
        assert!(response.error.is_none(), "{response:?}");
        let content = fs::read_to_string(temp.path().join("a.txt")).expect("read");
        assert_eq!(content, "x = 2\nx = 1\n");
    }

    #[test]
    fn str_replace_reports_missing_text() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut editor = editor_in(temp.path());
        editor.handle(&create("a.txt", "hello\n"));

        let response = editor.handle(&EditRequest::StrReplace {
            path: "a.txt".to_string(),
            old_str: "absent".to_string(),
            new_str: "x".to_string(),
        });
        assert!(
            response
                .error
                .as_deref()
                .is_some_and(|err| err.contains("String not found in file: absent"))
        );
        assert_eq!(editor.backup_depth("a.txt"), 0);
    }

    #[test]
    fn insert_after_line() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut editor = editor_in(temp.path());
        editor.handle(&create("a.txt", "first\nthird"));

        editor.handle(&EditRequest::Insert {
            path: "a.txt".to_string(),
            insert_line: Some(1),
            new_str: "second".to_string(),
        });
        editor.handle(&EditRequest::Insert {
            path: "a.txt".to_string(),
            insert_line: Some(99),
            new_str: "fourth".to_string(),
        });
        let content = fs::read_to_string(temp.path().join("a.txt")).expect("read");
        assert_eq!(content, "first\nsecond\nthird\nfourth\n");
    }

    #[test]
    fn insert_requires_line() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut editor = editor_in(temp.path());
        editor.handle(&create("a.txt", "x\n"));

        let response = editor.handle(&EditRequest::Insert {
            path: "a.txt".to_string(),
            insert_line: None,
            new_str: "y".to_string(),
        });
        assert!(
            response
                .error
                .as_deref()
                .is_some_and(|err| err.contains("insert_line parameter is required"))
        );
    }

    #[test]
    fn undo_pops_backups_in_stack_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut editor = editor_in(temp.path());
        let file = temp.path().join("a.txt");

        editor.handle(&create("a.txt", "v1"));
        editor.handle(&create("a.txt", "v2"));
        editor.handle(&EditRequest::StrReplace {
            path: "a.txt".to_string(),
            old_str: "v2".to_string(),
            new_str: "v3".to_string(),
        });
        assert_eq!(editor.backup_depth("a.txt"), 2);

        editor.handle(&undo("a.txt"));
        assert_eq!(fs::read_to_string(&file).expect("read"), "v2");
        editor.handle(&undo("a.txt"));
        assert_eq!(fs::read_to_string(&file).expect("read"), "v1");

        let response = editor.handle(&undo("a.txt"));
        assert!(
            response
                .error
                .as_deref()
                .is_some_and(|err| err.contains("No backup available for: a.txt"))
        );
    }

    #[test]
    fn backups_are_tracked_per_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut editor = editor_in(temp.path());
        editor.handle(&create("a.txt", "a1"));
        editor.handle(&create("b.txt", "b1"));
        editor.handle(&create("a.txt", "a2"));

        assert_eq!(editor.backup_depth("a.txt"), 1);
        assert_eq!(editor.backup_depth("./b.txt"), 0);
        assert!(editor.handle(&undo("b.txt")).error.is_some());
    }

    #[test]
    fn rejects_paths_escaping_base() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut editor = editor_in(temp.path());

        let response = editor.handle(&create("../escape.txt", "nope"));
        assert!(
            response
                .error
                .as_deref()
                .is_some_and(|err| err.contains("Path traversal detected"))
        );

        let response = editor.handle(&EditRequest::View {
            path: "/etc/hostname".to_string(),
            view_range: None,
        });
        assert!(
            response
                .error
                .as_deref()
                .is_some_and(|err| err.contains("Path outside base directory"))
        );
    }

    #[test]
    fn accepts_absolute_paths_inside_base() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut editor = editor_in(temp.path());
        let absolute = temp.path().join("inside.txt");

        let response = editor.handle(&create(&absolute.to_string_lossy(), "ok"));
        assert!(response.error.is_none(), "{response:?}");
        assert_eq!(fs::read_to_string(absolute).expect("read"), "ok");
    }

    #[cfg(unix)]
    #[test]
    fn symlink_out_of_base_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let outside = tempfile::tempdir().expect("tempdir");
        fs::write(outside.path().join("secret.txt"), "top secret").expect("write");
        std::os::unix::fs::symlink(outside.path(), temp.path().join("link")).expect("symlink");
        let mut editor = editor_in(temp.path());

        let response = editor.handle(&EditRequest::View {
            path: "link/secret.txt".to_string(),
            view_range: None,
        });
        assert_eq!(response.content, None);
        assert!(
            response
                .error
                .as_deref()
                .is_some_and(|err| err.contains("Path outside base directory"))
        );

        let response = editor.handle(&create("link/planted.txt", "x"));
        assert!(response.error.is_some());
        assert!(!outside.path().join("planted.txt").exists());
    }

    #[test]
    fn view_missing_path_is_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut editor = editor_in(temp.path());
        let response = editor.handle(&EditRequest::View {
            path: "missing.txt".to_string(),
            view_range: None,
        });
        assert!(
            response
                .error
                .as_deref()
                .is_some_and(|err| err.contains("Path does not exist: missing.txt"))
        );
    }
}
