//! Sentinel framing for a persistent shell's unstructured output stream.
//!
//! Each command is written as three lines: the command itself, an exit-status
//! echo tagged with [`EXIT_STATUS_PREFIX`], and an `echo` of a fresh
//! [`Sentinel`]. The reader collects everything up to the sentinel line; the
//! status line is then split back out of the collected output.
//!
//! A command that prints the sentinel verbatim would end its frame early. The
//! sentinel carries 128 bits of randomness so accidental collision is
//! negligible, but nothing stops a command from deliberately mimicking it.

use rand::Rng;

use crate::core::policy::truncation_notice;

/// Tag placed in front of the exit status echoed after every command.
pub const EXIT_STATUS_PREFIX: &str = "__HARNESS_EXIT_STATUS__:";

/// Unique end-of-output token. Generated per command, never reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinel(String);

impl Sentinel {
    pub fn generate() -> Self {
        let token: u128 = rand::thread_rng().r#gen();
        Self(format!("__HARNESS_DONE_{token:032x}__"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Build the text written to the shell's stdin for one command.
pub fn frame_command(command: &str, sentinel: &Sentinel) -> String {
    format!(
        "{}\necho \"{EXIT_STATUS_PREFIX}$?\"\necho '{}'\n",
        command.trim_end_matches(['\n', '\r']),
        sentinel.as_str()
    )
}

/// Collected output with the exit-status line removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedOutput {
    pub output: String,
    /// `None` when no status line was found in the frame.
    pub exit_code: Option<i32>,
}

/// Split the exit-status line out of the lines collected before the sentinel.
///
/// The status line is the last line containing [`EXIT_STATUS_PREFIX`]. When the
/// command's output did not end in a newline, the status echo shares a line with that
/// output; the leading part is kept as output without a trailing newline.
pub fn split_exit_status(lines: &[String]) -> FramedOutput {
    let status = lines
        .iter()
        .enumerate()
        .rev()
        .find_map(|(idx, line)| line.rfind(EXIT_STATUS_PREFIX).map(|pos| (idx, pos)));

    let Some((status_idx, prefix_pos)) = status else {
        return FramedOutput {
            output: join_lines(lines),
            exit_code: None,
        };
    };

    let status_line = &lines[status_idx];
    let exit_code = status_line[prefix_pos + EXIT_STATUS_PREFIX.len()..]
        .trim()
        .parse::<i32>()
        .ok();

    let mut output = join_lines(&lines[..status_idx]);
    output.push_str(&status_line[..prefix_pos]);
    // Anything printed between the status line and the sentinel (e.g. a background
    // job) still belongs to the caller.
    output.push_str(&join_lines(&lines[status_idx + 1..]));

    FramedOutput { output, exit_code }
}

/// Like [`split_exit_status`] for a capture whose middle lines were dropped.
///
/// `head` holds the first lines, `tail` the last ones (the status line among them)
/// and `total` counts every line seen. The output is the head followed by a
/// truncation summary giving the real number of output lines.
pub fn split_elided(head: &[String], tail: &[String], total: usize) -> FramedOutput {
    let framed_tail = split_exit_status(tail);
    let tail_lines = framed_tail.output.lines().count();
    let output_lines = total.saturating_sub(tail.len()) + tail_lines;
    FramedOutput {
        output: format!(
            "{}{}",
            head.join("\n"),
            truncation_notice(output_lines, head.len())
        ),
        exit_code: framed_tail.exit_code,
    }
}

fn join_lines(lines: &[String]) -> String {
    let mut joined = String::with_capacity(lines.iter().map(|line| line.len() + 1).sum());
    for line in lines {
        joined.push_str(line);
        joined.push('\n');
    }
    joined
}
