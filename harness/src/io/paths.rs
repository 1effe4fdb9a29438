//! Path confinement shared by the file tools.
//!
//! A request path is first checked lexically (no `..` above the base, no
//! foreign absolute roots) and then against the filesystem: the deepest part
//! of it that exists must canonicalize to somewhere under the canonical base,
//! so a symlink inside the base cannot lead out of it.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};

/// Resolve `requested` under `base`, rejecting anything that escapes it.
///
/// Absolute paths are accepted when they already point inside `base`. `path`
/// is the caller's spelling, used in error messages.
pub fn confine(base: &Path, requested: &Path, path: &str) -> Result<PathBuf> {
    let relative = if requested.is_absolute() {
        requested
            .strip_prefix(base)
            .map_err(|_| anyhow!("Path outside base directory: {path}"))?
    } else {
        requested
    };

    let mut depth = 0usize;
    for component in relative.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::ParentDir => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| anyhow!("Path traversal detected: {path}"))?;
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => {
                bail!("Path outside base directory: {path}")
            }
        }
    }

    let full = normalize(&base.join(relative));
    ensure_within(base, &full, path)?;
    Ok(full)
}

/// Make `path` absolute and lexically normalized, without confinement.
pub fn absolute(path: &str) -> Result<PathBuf> {
    std::path::absolute(Path::new(path))
        .map(|full| normalize(&full))
        .with_context(|| format!("resolve {path}"))
}

/// Reject `full` when an existing part of it resolves outside `base`.
fn ensure_within(base: &Path, full: &Path, path: &str) -> Result<()> {
    let Ok(real_base) = fs::canonicalize(base) else {
        // Nothing below a missing base can be a link.
        return Ok(());
    };

    for ancestor in full.ancestors() {
        if fs::symlink_metadata(ancestor).is_err() {
            continue;
        }
        // Dangling links land here too: their target cannot be checked.
        let real = fs::canonicalize(ancestor)
            .map_err(|_| anyhow!("Path outside base directory: {path}"))?;
        if real.starts_with(&real_base) {
            return Ok(());
        }
        bail!("Path outside base directory: {path}");
    }
    Ok(())
}

pub fn read_text(full_path: &Path, path: &str) -> Result<String> {
    let bytes = fs::read(full_path).with_context(|| format!("read {path}"))?;
    String::from_utf8(bytes)
        .map_err(|_| anyhow!("Cannot read file (binary or encoding issue): {path}"))
}

/// Sorted entry names of a directory.
pub fn list_dir(full_path: &Path, path: &str) -> Result<Vec<String>> {
    let mut contents = Vec::new();
    for entry in fs::read_dir(full_path).with_context(|| format!("list {path}"))? {
        let entry = entry.with_context(|| format!("list {path}"))?;
        contents.push(entry.file_name().to_string_lossy().into_owned());
    }
    contents.sort();
    Ok(contents)
}

/// Collapse `.` and `..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
