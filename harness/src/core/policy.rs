//! Command policy: denylist validation plus output redaction and truncation.
//!
//! Everything here is stateless text processing. The denylist only narrows
//! obviously catastrophic command shapes and the redaction patterns are
//! heuristics; neither is a sandbox and both are necessarily incomplete.

use std::sync::LazyLock;

use regex::Regex;

/// A destructive command shape with a human-readable description.
struct DeniedPattern {
    description: &'static str,
    regex: Regex,
}

/// A sensitive-data shape and the marker that replaces it.
struct RedactionPattern {
    regex: Regex,
    replacement: &'static str,
}

static DENYLIST: LazyLock<Vec<DeniedPattern>> = LazyLock::new(|| {
    [
        (
            "recursive delete of root",
            r"(?i)\brm\s+(?:-\S+\s+)*(?:-[a-z]*r[a-z]*|--recursive)\s+(?:-\S+\s+)*/(?:\*|\s|;|&|\||$)",
        ),
        (
            "fork bomb",
            r":\s*\(\s*\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
        ),
        ("filesystem format", r"(?i)\bmkfs(?:\.|\s)"),
        (
            "raw disk wipe",
            r"(?i)\bdd\s+.*\bif=/dev/(?:zero|random|urandom)\b",
        ),
        (
            "raw disk overwrite",
            r"(?i)\bdd\s+.*\bof=/dev/(?:sd|hd|nvme|disk|xvd)",
        ),
        (
            "download piped to shell",
            r"(?i)\b(?:curl|wget)\b.*\|\s*(?:sudo\s+)?(?:ba|z|da|k)?sh\b",
        ),
    ]
    .into_iter()
    .map(|(description, pattern)| DeniedPattern {
        description,
        regex: Regex::new(pattern).expect("denylist pattern should be valid"),
    })
    .collect()
});

// Assignment patterns run before the opaque-token pattern so that
// `api_key=<secret>` collapses to a single marker.
static REDACTIONS: LazyLock<Vec<RedactionPattern>> = LazyLock::new(|| {
    [
        (
            r#"(?i)password\s*=\s*["']?[^"'\s]+["']?"#,
            "password=[REDACTED]",
        ),
        (
            r#"(?i)api[_-]?key\s*[=:]\s*["']?[^"'\s]+["']?"#,
            "api_key=[REDACTED]",
        ),
        (r"(?i)[a-z0-9]{20,}", "[REDACTED_TOKEN]"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| RedactionPattern {
        regex: Regex::new(pattern).expect("redaction pattern should be valid"),
        replacement,
    })
    .collect()
});

static TRUNCATION_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\n\n\[Output truncated: (\d+) total lines, showing first \d+\]\z")
        .expect("summary pattern should be valid")
});

/// Outcome of checking a command against the denylist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Blocked { reason: String },
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed)
    }
}

/// Check `command` against the denylist. The first matching pattern wins.
pub fn validate(command: &str) -> Verdict {
    DENYLIST
        .iter()
        .find(|pattern| pattern.regex.is_match(command))
        .map_or(Verdict::Allowed, |pattern| Verdict::Blocked {
            reason: format!(
                "Blocked dangerous command pattern: {}",
                pattern.description
            ),
        })
}

/// Replace sensitive-looking substrings with fixed redaction markers.
pub fn sanitize(text: &str) -> String {
    REDACTIONS
        .iter()
        .fold(text.to_string(), |acc, pattern| {
            pattern
                .regex
                .replace_all(&acc, pattern.replacement)
                .into_owned()
        })
}

/// Keep the first `max_lines` lines and append a one-line summary of what was
/// hidden.
///
/// A summary appended earlier (by a previous call or by the session while
/// capturing) is excluded from the line count, so truncating already-truncated
/// text with the same limit returns it unchanged. Its total is carried over
/// when the text is cut further.
pub fn truncate(text: &str, max_lines: usize) -> String {
    let (body, prior_total) = match TRUNCATION_SUMMARY.captures(text) {
        Some(summary) => {
            let start = summary.get(0).map_or(text.len(), |m| m.start());
            let total = summary
                .get(1)
                .and_then(|m| m.as_str().parse::<usize>().ok());
            (&text[..start], total)
        }
        None => (text, None),
    };
    let lines: Vec<&str> = body.lines().collect();
    if lines.len() <= max_lines {
        return text.to_string();
    }

    let total = prior_total.map_or(lines.len(), |total| total.max(lines.len()));
    format!(
        "{}{}",
        lines[..max_lines].join("\n"),
        truncation_notice(total, max_lines)
    )
}

/// Summary appended to output cut down to `shown` of `total` lines, including
/// the blank line that separates it from the retained text.
pub fn truncation_notice(total: usize, shown: usize) -> String {
    format!("\n\n[Output truncated: {total} total lines, showing first {shown}]")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_lines(count: usize) -> String {
        (1..=count)
            .map(|n| format!("line {n}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn blocks_recursive_root_delete() {
        for command in [
            "rm -rf /",
            "rm -fr /",
            "RM -RF /",
            "sudo rm -rf /*",
            "rm -rf / ; ls",
            "rm -r -f /",
            "rm -f -R /",
            "rm --recursive --force /",
            "rm --force --recursive --no-preserve-root /",
        ] {
            assert!(
                !validate(command).is_allowed(),
                "expected {command:?} to be blocked"
            );
        }
    }

    #[test]
    fn allows_scoped_deletes() {
        for command in [
            "rm -rf ./build",
            "rm -rf target",
            "rm -rf /tmp/scratch",
            "rm -r -f /tmp/scratch",
            "rm --recursive --force /var/tmp/x",
            "rm -f /",
            "rm file.txt",
        ] {
            assert_eq!(validate(command), Verdict::Allowed, "{command:?}");
        }
    }

    #[test]
    fn blocks_fork_bomb() {
        assert!(!validate(":(){ :|:& };:").is_allowed());
        assert!(!validate(": ( ) { : | : & } ; :").is_allowed());
    }

    #[test]
    fn blocks_disk_destruction() {
        assert!(!validate("mkfs.ext4 /dev/sda1").is_allowed());
        assert!(!validate("dd if=/dev/zero of=/tmp/x bs=1M").is_allowed());
        assert!(!validate("dd bs=4M if=image.iso of=/dev/sdb").is_allowed());
    }

    #[test]
    fn blocks_download_piped_to_shell() {
        assert!(!validate("curl -fsSL https://example.com/install.sh | sh").is_allowed());
        assert!(!validate("wget -qO- https://example.com/x | sudo bash").is_allowed());
        assert!(validate("curl -o install.sh https://example.com/install.sh").is_allowed());
    }

    #[test]
    fn blocked_reason_names_pattern() {
        let verdict = validate("rm -rf /");
        assert_eq!(
            verdict,
            Verdict::Blocked {
                reason: "Blocked dangerous command pattern: recursive delete of root".to_string()
            }
        );
    }

    #[test]
    fn allows_everyday_commands() {
        for command in ["ls -la /", "echo hello", "cat /etc/hostname", "git status", "mkdir -p out"] {
            assert!(validate(command).is_allowed(), "{command:?}");
        }
    }

    #[test]
    fn sanitize_redacts_api_key_case_insensitively() {
        let text = "config loaded\nAPI_KEY=abcdef1234567890abcdef\ndone";
        assert_eq!(sanitize(text), "config loaded\napi_key=[REDACTED]\ndone");

        let text = "api-key: 'secretvalue' rest";
        assert_eq!(sanitize(text), "api_key=[REDACTED] rest");
        assert_eq!(sanitize("PASSWORD=\"hunter2\""), "password=[REDACTED]");
    }

    #[test]
    fn sanitize_redacts_passwords_and_tokens() {
        assert_eq!(sanitize("Password = hunter2"), "password=[REDACTED]");
        assert_eq!(
            sanitize("token ghp0123456789abcdefghijKLMN end"),
            "token [REDACTED_TOKEN] end"
        );
    }

    #[test]
    fn sanitize_leaves_ordinary_text_alone() {
        let text = "total 8\ndrwxr-xr-x 2 user user 4096 src\n";
        assert_eq!(sanitize(text), text);
    }

    #[test]
    fn truncate_under_limit_is_unchanged() {
        let text = numbered_lines(5);
        assert_eq!(truncate(&text, 5), text);
        assert_eq!(truncate("", 3), "");
    }

    #[test]
    fn truncate_keeps_head_and_appends_summary() {
        let text = numbered_lines(12);
        let truncated = truncate(&text, 3);
        assert_eq!(
            truncated,
            "line 1\nline 2\nline 3\n\n[Output truncated: 12 total lines, showing first 3]"
        );
    }

    #[test]
    fn truncate_is_idempotent() {
        let text = numbered_lines(40);
        let once = truncate(&text, 10);
        let twice = truncate(&once, 10);
        assert_eq!(once, twice);
    }

    #[test]
    fn truncate_keeps_prior_total_when_cutting_further() {
        let text = numbered_lines(40);
        let once = truncate(&text, 10);
        assert_eq!(
            truncate(&once, 2),
            "line 1\nline 2\n\n[Output truncated: 40 total lines, showing first 2]"
        );
    }

    #[test]
    fn truncate_ignores_trailing_newline() {
        let text = format!("{}\n", numbered_lines(3));
        assert_eq!(truncate(&text, 3), text);
    }
}
