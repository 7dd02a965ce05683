//! Per-request deadlines.

use std::time::{Duration, Instant};

use thiserror::Error;

/// The request's deadline passed before work completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("deadline exceeded")]
pub struct DeadlineExceeded;

/// Point in time after which a request should be abandoned.
///
/// `Deadline::none()` never expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// A deadline that never expires.
    pub const fn none() -> Self {
        Self(None)
    }

    /// Expires at `instant`.
    pub const fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    /// Expires `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now().checked_add(timeout))
    }

    /// Time left, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.0
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Caps `budget` by the time left.
    pub fn clamp(&self, budget: Duration) -> Duration {
        self.remaining().map_or(budget, |left| left.min(budget))
    }

    /// Returns `true` once the deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    /// Fails if the deadline has passed.
    pub fn check(&self) -> Result<(), DeadlineExceeded> {
        if self.is_expired() {
            Err(DeadlineExceeded)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_deadline() {
        let deadline = Deadline::none();
        assert!(!deadline.is_expired());
        assert_eq!(deadline.remaining(), None);
        assert_eq!(deadline.clamp(Duration::from_secs(5)), Duration::from_secs(5));
    }

    #[test]
    fn test_elapsed_deadline() {
        let deadline = Deadline::at(Instant::now());
        assert!(deadline.is_expired());
        assert_eq!(deadline.check(), Err(DeadlineExceeded));
        assert_eq!(deadline.clamp(Duration::from_secs(5)), Duration::ZERO);
    }

    #[test]
    fn test_future_deadline_clamps_budget() {
        let deadline = Deadline::after(Duration::from_millis(200));
        assert!(deadline.check().is_ok());
        assert!(deadline.clamp(Duration::from_secs(5)) <= Duration::from_millis(200));
    }
}
