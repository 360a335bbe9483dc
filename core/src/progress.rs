//! Explicit progress/checkpoint capability.
//!
//! Design note: "Global state/singleton logging → explicit context." The
//! original tools write progress and periodic checkpoints straight to
//! `cerr`; drivers here take a `Progress` handle instead so callers can
//! redirect, silence, or attach timing to the stream without the driver
//! reaching into global state. Backed by `tracing`, matching how the
//! teacher crate instruments its engine/session code.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Progress {
    enabled: bool,
}

impl Progress {
    pub fn new() -> Self {
        Progress { enabled: true }
    }

    /// A progress handle that drops every event, for tests and library
    /// callers that don't want `tracing` output.
    pub fn silent() -> Self {
        Progress { enabled: false }
    }

    pub fn info(&self, message: impl AsRef<str>) {
        if self.enabled {
            tracing::info!("{}", message.as_ref());
        }
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        if self.enabled {
            tracing::warn!("{}", message.as_ref());
        }
    }

    /// Reports whether a checkpoint is due, given an iteration count and
    /// a configured interval (0 disables checkpointing).
    pub fn checkpoint_due(&self, iteration: u64, interval: u64) -> bool {
        interval > 0 && iteration > 0 && iteration % interval == 0
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

/// A simple wall-clock deadline, checked every 1000 words per
/// SPEC_FULL.md §5's concurrency/resource model.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    limit: Option<Duration>,
    started: std::time::Instant,
}

impl Deadline {
    pub fn new(limit: Option<Duration>) -> Self {
        Deadline { limit, started: std::time::Instant::now() }
    }

    pub fn expired(&self) -> bool {
        self.limit.map(|l| self.started.elapsed() > l).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_due_respects_interval() {
        let p = Progress::silent();
        assert!(!p.checkpoint_due(0, 10));
        assert!(!p.checkpoint_due(5, 10));
        assert!(p.checkpoint_due(10, 10));
        assert!(!p.checkpoint_due(10, 0));
    }

    #[test]
    fn deadline_with_no_limit_never_expires() {
        let d = Deadline::new(None);
        assert!(!d.expired());
    }
}
