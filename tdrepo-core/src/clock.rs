//! Time sources for annotation and expiry.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Source of "now" for timestamps and expiry decisions
pub trait Clock: Send + Sync {
    /// Current wall-clock time
    fn now(&self) -> DateTime<Utc>;
}

/// Reads the system wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall clock driven by tokio's timer.
///
/// Starts at `origin` and advances with `tokio::time::Instant`, so under a
/// paused runtime (`#[tokio::test(start_paused = true)]`) it moves only when
/// tokio time is advanced.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: DateTime<Utc>,
    start: Instant,
}

impl TokioClock {
    /// Anchor `origin` to the current tokio instant
    pub fn starting_at(origin: DateTime<Utc>) -> Self {
        Self {
            origin,
            start: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::starting_at(Utc::now())
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().duration_since(self.start);
        chrono::Duration::from_std(elapsed)
            .ok()
            .and_then(|elapsed| self.origin.checked_add_signed(elapsed))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
