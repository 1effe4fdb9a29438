//! Background drain of a child process's output stream.
//!
//! A detached thread reads lines from the stream and pushes them onto a bounded
//! channel. The consumer polls the channel in short slices so a silent command
//! never blocks it past its deadline. The thread owns only the stream, never the
//! process; it exits on EOF, on a read error, or once the receiver is dropped.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, trace};

use crate::core::framing::{FramedOutput, split_elided, split_exit_status};

/// Upper bound on a single blocking wait for the next line.
pub const POLL_SLICE: Duration = Duration::from_millis(100);

/// Bytes kept from the start of an overlong line.
pub const MAX_LINE_BYTES: usize = 16 * 1024;

/// Bytes kept from the end of an overlong line, so a status line or marker printed
/// after unterminated output survives.
const LINE_TAIL_BYTES: usize = 512;

/// Lines kept after the head fills up. Must cover the exit-status line plus
/// anything a background job prints between it and the sentinel.
const TAIL_LINES: usize = 8;

/// Placed where bytes of an overlong line were dropped.
const ELISION: &str = "[...]";

/// How a [`OutputReader::read_until`] call ended. Lines seen before the end are
/// in the caller's [`Capture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The marker line arrived; it is not captured.
    Marker,
    /// The deadline passed before the marker arrived.
    TimedOut,
    /// The stream closed before the marker arrived.
    Closed,
}

/// Bounded record of one command's output lines.
///
/// Keeps the first `limit` lines and the last few, and counts every line, so a
/// command that prints without end costs a fixed amount of memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    head: Vec<String>,
    tail: VecDeque<String>,
    total: usize,
    limit: usize,
}

impl Capture {
    pub fn new(limit: usize) -> Self {
        Self {
            head: Vec::new(),
            tail: VecDeque::new(),
            total: 0,
            limit,
        }
    }

    pub fn push(&mut self, line: String) {
        self.total += 1;
        if self.head.len() < self.limit {
            self.head.push(line);
            return;
        }
        self.tail.push_back(line);
        if self.tail.len() > TAIL_LINES {
            self.tail.pop_front();
        }
    }

    /// Every line pushed, retained or not.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Lines currently held in memory.
    pub fn retained(&self) -> usize {
        self.head.len() + self.tail.len()
    }

    /// Lines pushed but no longer held.
    pub fn dropped(&self) -> usize {
        self.total - self.retained()
    }

    /// Retained lines in arrival order.
    pub fn lines(&self) -> Vec<String> {
        self.head.iter().chain(self.tail.iter()).cloned().collect()
    }

    /// Separate the exit-status line from the captured output. When lines were
    /// dropped the output is the head plus a truncation summary counting all of
    /// them.
    pub fn into_framed(self) -> FramedOutput {
        let Capture {
            mut head, tail, total, ..
        } = self;
        let tail: Vec<String> = tail.into();
        if head.len() + tail.len() == total {
            head.extend(tail);
            return split_exit_status(&head);
        }
        split_elided(&head, &tail, total)
    }
}

pub struct OutputReader {
    lines: Receiver<String>,
}

impl OutputReader {
    /// Start draining `stream` on a background thread.
    ///
    /// `capacity` bounds how many unread lines may be queued before the reader
    /// thread blocks.
    pub fn spawn<R: Read + Send + 'static>(stream: R, capacity: usize) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel(capacity);
        thread::Builder::new()
            .name("harness-output-reader".to_string())
            .spawn(move || drain_lines(stream, tx))
            .context("spawn output reader thread")?;
        Ok(Self { lines: rx })
    }

    /// Feed lines into `capture` until one ends with `marker` or `timeout`
    /// elapses.
    ///
    /// Every line is checked for the marker whether or not the capture keeps
    /// it. Text preceding the marker on its own line (output that lacked a
    /// trailing newline) is captured as a final line.
    pub fn read_until(&self, marker: &str, timeout: Duration, capture: &mut Capture) -> ReadOutcome {
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return ReadOutcome::TimedOut;
            }

            match self.lines.recv_timeout(remaining.min(POLL_SLICE)) {
                Ok(line) => {
                    if let Some(rest) = line.strip_suffix(marker) {
                        if !rest.is_empty() {
                            capture.push(rest.to_string());
                        }
                        return ReadOutcome::Marker;
                    }
                    capture.push(line);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return ReadOutcome::Closed,
            }
        }
    }
}

fn drain_lines<R: Read>(stream: R, tx: SyncSender<String>) {
    let mut reader = BufReader::new(stream);
    let mut head = Vec::new();
    let mut tail = Vec::new();
    loop {
        match read_bounded_line(&mut reader, &mut head, &mut tail) {
            Ok(0) => {
                debug!("output stream closed");
                return;
            }
            Ok(len) => {
                let line = join_bounded(&head, &tail, len);
                trace!(len, "output line");
                if tx.send(line).is_err() {
                    // Receiver dropped: the session moved on to a new process.
                    return;
                }
            }
            Err(err) => {
                debug!(err = %err, "output stream read failed");
                return;
            }
        }
    }
}

/// Read one line, keeping up to [`MAX_LINE_BYTES`] from its start in `head`
/// and a window of its last bytes in `tail`. Returns the full line length.
fn read_bounded_line<R: BufRead>(
    reader: &mut R,
    head: &mut Vec<u8>,
    tail: &mut Vec<u8>,
) -> std::io::Result<usize> {
    head.clear();
    tail.clear();
    let mut read = 0;
    loop {
        let (used, done) = {
            let available = match reader.fill_buf() {
                Ok(available) => available,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };
            if available.is_empty() {
                return Ok(read);
            }
            let (chunk, done) = match available.iter().position(|&b| b == b'\n') {
                Some(idx) => (&available[..=idx], true),
                None => (available, false),
            };
            let room = MAX_LINE_BYTES.saturating_sub(head.len()).min(chunk.len());
            head.extend_from_slice(&chunk[..room]);
            tail.extend_from_slice(&chunk[room..]);
            if tail.len() > 2 * LINE_TAIL_BYTES {
                tail.drain(..tail.len() - LINE_TAIL_BYTES);
            }
            (chunk.len(), done)
        };
        reader.consume(used);
        read += used;
        if done {
            return Ok(read);
        }
    }
}

fn join_bounded(head: &[u8], tail: &[u8], len: usize) -> String {
    let mut line = String::from_utf8_lossy(head).into_owned();
    if !tail.is_empty() {
        let kept = &tail[tail.len().saturating_sub(LINE_TAIL_BYTES)..];
        if head.len() + kept.len() < len {
            line.push_str(ELISION);
        }
        line.push_str(&String::from_utf8_lossy(kept));
    }
    let trimmed = line.trim_end_matches(['\n', '\r']).len();
    line.truncate(trimmed);
    line
}
