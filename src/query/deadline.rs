//! Query deadlines.
//!
//! Every query carries one deadline shared by all per-partition tasks.
//! Operators check it cooperatively at their boundaries; the first task to
//! observe expiry trips the cancellation flag so sibling partitions stop
//! at their next check instead of running to completion.

use crate::error::{QueryError, QueryResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct QueryDeadline {
    cancelled: Arc<AtomicBool>,
    start: Instant,
    limit: Option<Duration>,
}

impl QueryDeadline {
    pub fn new(limit: Option<Duration>) -> Self {
        QueryDeadline {
            cancelled: Arc::new(AtomicBool::new(false)),
            start: Instant::now(),
            limit,
        }
    }

    /// A deadline that never expires (it can still be cancelled).
    pub fn unlimited() -> Self {
        QueryDeadline::new(None)
    }

    /// Returns `Err(Timeout)` once the limit elapsed or the query was
    /// cancelled. Call this at operator boundaries.
    pub fn check(&self) -> QueryResult<()> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(self.timeout_error());
        }
        if let Some(limit) = self.limit {
            if self.start.elapsed() > limit {
                self.cancelled.store(true, Ordering::Relaxed);
                return Err(self.timeout_error());
            }
        }
        Ok(())
    }

    /// Trip the flag, e.g. when a sibling partition failed.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    fn timeout_error(&self) -> QueryError {
        QueryError::Timeout {
            elapsed_ms: self.start.elapsed().as_millis() as u64,
        }
    }
}
