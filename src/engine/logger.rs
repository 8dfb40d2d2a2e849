//! Build log
//!
//! Append-only text log of a build. Shared between the orchestrator and the
//! command executor it owns, optionally streamed line by line to a sink.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

const GREEN: &str = "\x1b[0;32m";
const RED: &str = "\x1b[0;31m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Default)]
struct LogState {
    buffer: String,
    lines: usize,
    sink: Option<mpsc::UnboundedSender<String>>,
}

/// Thread-safe build log buffer
#[derive(Debug, Clone, Default)]
pub struct BuildLogger {
    state: Arc<Mutex<LogState>>,
}

impl BuildLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream every line to `sink` as it is written
    pub fn with_sink(self, sink: mpsc::UnboundedSender<String>) -> Self {
        self.lock().sink = Some(sink);
        self
    }

    pub fn log(&self, message: impl AsRef<str>) {
        self.log_prefixed("", message);
    }

    /// Log every line of `message` with `prefix` in front of it
    pub fn log_prefixed(&self, prefix: &str, message: impl AsRef<str>) {
        let message = message.as_ref();
        let mut state = self.lock();

        let lines: Vec<&str> = if message.is_empty() {
            vec![""]
        } else {
            message.lines().collect()
        };

        for line in lines {
            let line = format!("{}{}", prefix, line);
            debug!(target: "phpci_builder::build_log", "{}", line);

            state.buffer.push_str(&line);
            state.buffer.push('\n');
            state.lines += 1;

            let closed = match &state.sink {
                Some(sink) => sink.send(line).is_err(),
                None => false,
            };
            if closed {
                state.sink = None;
            }
        }
    }

    pub fn log_success(&self, message: impl AsRef<str>) {
        self.log(format!("{}{}{}", GREEN, message.as_ref(), RESET));
    }

    pub fn log_failure(&self, message: impl AsRef<str>) {
        self.log(format!("{}{}{}", RED, message.as_ref(), RESET));
    }

    /// Full log text
    pub fn contents(&self) -> String {
        self.lock().buffer.clone()
    }

    pub fn line_count(&self) -> usize {
        self.lock().lines
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Remove ANSI colour sequences from a log line
pub fn strip_colors(line: &str) -> String {
    line.replace(GREEN, "").replace(RED, "").replace(RESET, "")
}
