//! Startup readiness detection for spawned dev servers.
//!
//! A child is "ready" once a stdout line carries one of the markers dev
//! servers print after binding (`Ready in 1.2s`, `started server on ...`,
//! `listening on port 3000`, `http://localhost:3000`). A stderr line containing
//! `Error:` before that point fails the start.

use std::sync::{Arc, Mutex, PoisonError};

use regex::Regex;
use tokio::sync::oneshot;

/// Marker on stderr that aborts a pending start.
pub const FATAL_MARKER: &str = "Error:";

/// Outcome reported by the output readers while a start is pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupSignal {
    Ready,
    Failed(String),
}

/// Matches readiness and fatal-error lines for one port.
#[derive(Debug, Clone)]
pub struct ReadinessMatcher {
    ready: Regex,
}

impl ReadinessMatcher {
    pub fn new(port: u16) -> Result<Self, regex::Error> {
        let pattern = format!(
            r"(?i)\bready\b|started server|listening on (?:port\s*)?{port}\b|(?:localhost|127\.0\.0\.1|0\.0\.0\.0):{port}\b"
        );
        Ok(Self {
            ready: Regex::new(&pattern)?,
        })
    }

    pub fn is_ready(&self, stdout_line: &str) -> bool {
        self.ready.is_match(stdout_line)
    }

    pub fn is_fatal(&self, stderr_line: &str) -> bool {
        stderr_line.contains(FATAL_MARKER)
    }
}

/// Single-assignment completion for a pending start.
///
/// Clones share one sender; the first `settle` wins and every later call
/// returns `false`. When all clones drop without settling, the receiver
/// observes a closed channel, which means the child's output ended first.
#[derive(Debug, Clone)]
pub struct StartupLatch {
    tx: Arc<Mutex<Option<oneshot::Sender<StartupSignal>>>>,
}

impl StartupLatch {
    pub fn new() -> (Self, oneshot::Receiver<StartupSignal>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Resolve the latch. Returns `true` only for the call that resolved it.
    pub fn settle(&self, signal: StartupSignal) -> bool {
        let sender = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match sender {
            // A dropped receiver (start already gave up) still counts as settled.
            Some(tx) => {
                let _ = tx.send(signal);
                true
            }
            None => false,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}
