//! # Diagnostics Channel
//!
//! A bounded multi-producer / single-consumer queue of operator-facing log
//! lines. Pooled workers call [`Diagnostics::publish`] from any thread; only
//! the acceptor's control thread calls [`Diagnostics::drain_and_emit`], which
//! writes each line through `tracing`. Background work therefore never writes
//! to the output directly.
//!
//! ## Ordering
//!
//! Lines leave the queue in arrival order. Lines published by one worker keep
//! their relative order; lines from different workers interleave as they
//! arrive.
//!
//! ## Overflow
//!
//! The queue holds at most `bound` lines. Publishing into a full queue drops
//! the oldest line and bumps a counter; the next drain reports how many lines
//! were lost as a warning.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Severity of a diagnostic line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiagnosticLevel::Debug => "debug",
            DiagnosticLevel::Info => "info",
            DiagnosticLevel::Warn => "warn",
            DiagnosticLevel::Error => "error",
        })
    }
}

/// One queued diagnostic line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticLine {
    pub level: DiagnosticLevel,
    /// Who published it: a connection id, `"acceptor"`, `"worker-N"`
    pub source: String,
    pub message: String,
}

struct Inner {
    queue: Mutex<VecDeque<DiagnosticLine>>,
    bound: usize,
    dropped: AtomicU64,
    published: AtomicU64,
}

/// Handle to the process-wide diagnostics queue
///
/// Cloning is cheap; every clone feeds the same queue.
#[derive(Clone)]
pub struct Diagnostics {
    inner: Arc<Inner>,
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("bound", &self.inner.bound)
            .field("pending", &self.len())
            .field("dropped", &self.inner.dropped.load(Ordering::Relaxed))
            .finish()
    }
}

impl Diagnostics {
    /// Create a queue holding at most `bound` lines (a bound of 0 is treated as 1).
    pub fn new(bound: usize) -> Self {
        let bound = bound.max(1);
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::with_capacity(bound.min(1024))),
                bound,
                dropped: AtomicU64::new(0),
                published: AtomicU64::new(0),
            }),
        }
    }

    /// Enqueue a line. Never blocks beyond the queue lock; never fails.
    pub fn publish(
        &self,
        level: DiagnosticLevel,
        source: impl Into<String>,
        message: impl Into<String>,
    ) {
        let line = DiagnosticLine {
            level,
            source: source.into(),
            message: message.into(),
        };
        let mut queue = self.inner.queue.lock();
        if queue.len() >= self.inner.bound {
            queue.pop_front();
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(line);
        self.inner.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn info(&self, source: impl Into<String>, message: impl Into<String>) {
        self.publish(DiagnosticLevel::Info, source, message);
    }

    pub fn warn(&self, source: impl Into<String>, message: impl Into<String>) {
        self.publish(DiagnosticLevel::Warn, source, message);
    }

    pub fn error(&self, source: impl Into<String>, message: impl Into<String>) {
        self.publish(DiagnosticLevel::Error, source, message);
    }

    /// Take every pending line, oldest first.
    pub fn drain(&self) -> Vec<DiagnosticLine> {
        let mut queue = self.inner.queue.lock();
        queue.drain(..).collect()
    }

    /// Drain the queue and write each line through `tracing`.
    ///
    /// Must only be called from the control thread. Returns the number of
    /// lines emitted, not counting the overflow warning.
    pub fn drain_and_emit(&self) -> usize {
        let dropped = self.inner.dropped.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            warn!(
                target: "parley::diagnostics",
                dropped = dropped,
                bound = self.inner.bound,
                "Diagnostics queue overflowed - oldest lines dropped"
            );
        }

        let lines = self.drain();
        for line in &lines {
            match line.level {
                DiagnosticLevel::Debug => {
                    debug!(target: "parley::diagnostics", source = %line.source, "{}", line.message)
                }
                DiagnosticLevel::Info => {
                    info!(target: "parley::diagnostics", source = %line.source, "{}", line.message)
                }
                DiagnosticLevel::Warn => {
                    warn!(target: "parley::diagnostics", source = %line.source, "{}", line.message)
                }
                DiagnosticLevel::Error => {
                    error!(target: "parley::diagnostics", source = %line.source, "{}", line.message)
                }
            }
        }
        lines.len()
    }

    /// Lines currently waiting to be drained
    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lines dropped since the last drain
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Lines published over the lifetime of the queue
    pub fn published(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    pub fn bound(&self) -> usize {
        self.inner.bound
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_DIAGNOSTICS_BOUND)
    }
}

/// A [`Diagnostics`] handle with a fixed source tag
///
/// Handed to each pipeline and handler so every line carries the connection id.
#[derive(Clone, Debug)]
pub struct Publisher {
    diagnostics: Diagnostics,
    source: String,
}

impl Publisher {
    pub fn new(diagnostics: Diagnostics, source: impl Into<String>) -> Self {
        Self {
            diagnostics,
            source: source.into(),
        }
    }

    pub fn publish(&self, level: DiagnosticLevel, message: impl Into<String>) {
        self.diagnostics
            .publish(level, self.source.as_str(), message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.publish(DiagnosticLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.publish(DiagnosticLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.publish(DiagnosticLevel::Error, message);
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}
