//! Labeled time splits for connect observability

use std::fmt;
use std::time::{Duration, Instant};

/// Records labeled time splits relative to a start point.
///
/// Used by the engine to report how long the signaling and transport phases
/// of a connect took.
#[derive(Debug, Clone)]
pub struct Stopwatch {
    label: String,
    start: Instant,
    splits: Vec<(String, Duration)>,
}

impl Stopwatch {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            start: Instant::now(),
            splits: Vec::new(),
        }
    }

    /// Record a split at the current instant
    pub fn split(&mut self, name: impl Into<String>) {
        self.splits.push((name.into(), self.start.elapsed()));
    }

    /// Elapsed time since the stopwatch (re)started
    pub fn total(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn splits(&self) -> &[(String, Duration)] {
        &self.splits
    }

    /// Drop all splits and restart the clock
    pub fn clear(&mut self) {
        self.splits.clear();
        self.start = Instant::now();
    }
}

impl fmt::Display for Stopwatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.label)?;
        for (name, at) in &self.splits {
            write!(f, " {} +{}ms", name, at.as_millis())?;
        }
        write!(f, " (total {}ms)", self.total().as_millis())
    }
}
