//! Reference observer for the diagnostic wire format.
//!
//! The harness gives no exit code: it prints its marker and then either the
//! buffer runs silently or the core parks. An observer can only watch the raw
//! byte stream and decide, at EOF or at a deadline, what it saw.

use anyhow::Result;
use crossbeam_channel::{bounded, RecvTimeoutError};
use serde::Serialize;
use std::io::{ErrorKind, Read};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Exactly the marker, then nothing.
    MarkerThenSilence,
    /// A strict prefix of the marker (possibly nothing at all).
    MarkerMissing,
    /// Bytes that are not the marker.
    MarkerMismatch,
    /// The marker, followed by more output.
    TrailingOutput,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::MarkerThenSilence => "marker_then_silence",
            Outcome::MarkerMissing => "marker_missing",
            Outcome::MarkerMismatch => "marker_mismatch",
            Outcome::TrailingOutput => "trailing_output",
        }
    }

    pub fn is_pass(self) -> bool {
        self == Outcome::MarkerThenSilence
    }
}

/// Incremental classifier for one stream.
#[derive(Debug)]
pub struct MarkerMatcher {
    expected: Vec<u8>,
    seen: Vec<u8>,
}

impl MarkerMatcher {
    pub fn new(expected: &[u8]) -> Self {
        Self {
            expected: expected.to_vec(),
            seen: Vec::new(),
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        self.seen.extend_from_slice(chunk);
    }

    pub fn received(&self) -> &[u8] {
        &self.seen
    }

    pub fn outcome(&self) -> Outcome {
        let n = self.expected.len();
        if self.seen.len() <= n {
            if self.seen == self.expected {
                Outcome::MarkerThenSilence
            } else if self.expected.starts_with(&self.seen) {
                Outcome::MarkerMissing
            } else {
                Outcome::MarkerMismatch
            }
        } else if self.seen.starts_with(&self.expected) {
            Outcome::TrailingOutput
        } else {
            Outcome::MarkerMismatch
        }
    }

    /// True once more input cannot change the outcome.
    pub fn settled(&self) -> bool {
        matches!(
            self.outcome(),
            Outcome::MarkerMismatch | Outcome::TrailingOutput
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchReport {
    pub outcome: Outcome,
    pub expected: String,
    pub received: String,
    pub received_bytes: usize,
    pub timed_out: bool,
    pub elapsed_ms: u64,
}

enum Event {
    Data(Vec<u8>),
    Eof,
    Failed(std::io::Error),
}

/// Read `input` until EOF, until the outcome is settled, or until `deadline`
/// passes, whichever comes first.
pub fn watch<R>(mut input: R, marker: &[u8], deadline: Option<Duration>) -> Result<WatchReport>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = bounded::<Event>(64);
    // Detached: a blocked read on a live stream must not hold up the verdict.
    thread::spawn(move || {
        let mut buf = [0u8; 256];
        loop {
            let event = match input.read(&mut buf) {
                Ok(0) => Event::Eof,
                Ok(n) => Event::Data(buf[..n].to_vec()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => Event::Failed(e),
            };
            let done = !matches!(event, Event::Data(_));
            if tx.send(event).is_err() || done {
                break;
            }
        }
    });

    let start = Instant::now();
    let mut matcher = MarkerMatcher::new(marker);
    let mut timed_out = false;

    loop {
        let event = match deadline {
            Some(limit) => {
                let remaining = limit.saturating_sub(start.elapsed());
                match rx.recv_timeout(remaining) {
                    Ok(event) => event,
                    Err(RecvTimeoutError::Timeout) => {
                        timed_out = true;
                        break;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(event) => event,
                Err(_) => break,
            },
        };

        match event {
            Event::Data(chunk) => {
                debug!("received {} bytes", chunk.len());
                matcher.feed(&chunk);
                if matcher.settled() {
                    break;
                }
            }
            Event::Eof => break,
            Event::Failed(e) => {
                return Err(anyhow::Error::new(e).context("Failed to read diagnostic stream"));
            }
        }
    }

    Ok(WatchReport {
        outcome: matcher.outcome(),
        expected: marker.escape_ascii().to_string(),
        received: matcher.received().escape_ascii().to_string(),
        received_bytes: matcher.received().len(),
        timed_out,
        elapsed_ms: start.elapsed().as_millis() as u64,
    })
}

/// Parse a marker given on the command line. Understands `\n`, `\r`, `\t`,
/// `\\` and `\xNN`.
pub fn unescape(s: &str) -> Result<Vec<u8>, String> {
    let mut out = Vec::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        match bytes.get(i + 1) {
            Some(b'n') => out.push(b'\n'),
            Some(b'r') => out.push(b'\r'),
            Some(b't') => out.push(b'\t'),
            Some(b'\\') => out.push(b'\\'),
            Some(b'x') => {
                let hex = s
                    .get(i + 2..i + 4)
                    .ok_or_else(|| format!("Truncated \\x escape in '{}'", s))?;
                if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return Err(format!("Invalid \\x escape '{}' in '{}'", hex, s));
                }
                let byte = u8::from_str_radix(hex, 16)
                    .map_err(|e| format!("Invalid \\x escape '{}': {}", hex, e))?;
                out.push(byte);
                i += 4;
                continue;
            }
            Some(&c) => return Err(format!("Unknown escape '\\{}' in '{}'", c as char, s)),
            None => return Err(format!("Trailing backslash in '{}'", s)),
        }
        i += 2;
    }
    Ok(out)
}
