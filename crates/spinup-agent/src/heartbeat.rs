use std::time::Duration;

use chrono::{DateTime, Utc};
use spinup_control::clock::after;

/// When the next `running` heartbeat is owed. Starts due immediately.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatSchedule {
    interval: Duration,
    next_due: DateTime<Utc>,
}

impl HeartbeatSchedule {
    pub fn new(interval: Duration, now: DateTime<Utc>) -> Self {
        Self {
            interval,
            next_due: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_due
    }

    /// Advance past `now` whether or not the write succeeded, so a failing
    /// store is retried on the next cycle instead of every iteration.
    pub fn mark_attempted(&mut self, now: DateTime<Utc>) {
        self.next_due = after(now, self.interval);
    }

    pub fn next_due(&self) -> DateTime<Utc> {
        self.next_due
    }
}

#[cfg(test)]
mod tests {
    use spinup_control::clock::{Clock, ManualClock};

    use super::*;

    #[test]
    fn due_at_start_then_every_interval() {
        let clock = ManualClock::at_unix(1_000);
        let mut s = HeartbeatSchedule::new(Duration::from_secs(180), clock.now());
        assert!(s.is_due(clock.now()));

        s.mark_attempted(clock.now());
        clock.advance(Duration::from_secs(179));
        assert!(!s.is_due(clock.now()));

        clock.advance(Duration::from_secs(1));
        assert!(s.is_due(clock.now()));
        assert_eq!(s.next_due().timestamp(), 1_180);
    }
}
