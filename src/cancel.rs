//! Cooperative cancellation for full-store scans

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, UnimemError};

/// Shared flag checked between record-level steps of long scans
///
/// Raising it makes the next checkpoint return [`UnimemError::Cancelled`].
/// Scans are read-only, so nothing is rolled back.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Checkpoint between records
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(UnimemError::Cancelled)
        } else {
            Ok(())
        }
    }
}
