use chrono::{DateTime, SubsecRound, Utc};
use std::fmt::Debug;

/// Source of request timestamps
pub trait Clock: Debug + Send + Sync {
    /// Current time, truncated to whole seconds
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now().trunc_subsecs(0)
    }
}

/// Always returns the same instant (tests, replays)
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
