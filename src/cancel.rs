use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{EdfError, Result};

/// Cooperative cancellation flag shared between a caller and a running conversion
///
/// Clones share the same flag. A conversion only looks at it on record
/// boundaries, so a record is either written completely or not at all.
///
/// ```rust
/// use edfconv::CancelToken;
///
/// let token = CancelToken::new();
/// let handle = token.clone();
/// assert!(!token.is_cancelled());
/// handle.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(EdfError::Cancelled)` once the flag is set
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(EdfError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Checks a [`CancelToken`] every 1% of the total record count
#[derive(Debug, Clone)]
pub struct ProgressCadence {
    total: i64,
    step: i64,
    label: &'static str,
}

impl ProgressCadence {
    pub fn new(label: &'static str, total: i64) -> Self {
        ProgressCadence {
            total,
            step: (total / 100).max(1),
            label,
        }
    }

    pub fn step(&self) -> i64 {
        self.step
    }

    /// Called at the top of every record; checks the token on the cadence only
    pub fn tick(&self, record: i64, token: &CancelToken) -> Result<()> {
        if record % self.step != 0 {
            return Ok(());
        }
        log::debug!("{}: record {} of {}", self.label, record, self.total);
        token.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cadence_step() {
        assert_eq!(ProgressCadence::new("t", 0).step(), 1);
        assert_eq!(ProgressCadence::new("t", 99).step(), 1);
        assert_eq!(ProgressCadence::new("t", 1000).step(), 10);
    }

    #[test]
    fn test_tick_only_checks_on_cadence() {
        let token = CancelToken::new();
        let cadence = ProgressCadence::new("t", 1000);
        token.cancel();
        assert!(cadence.tick(5, &token).is_ok());
        assert!(matches!(cadence.tick(10, &token), Err(EdfError::Cancelled)));
    }
}
