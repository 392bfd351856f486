//! Small interval tracker shared by the backlog runner's heartbeat log
//! and low-priority gate, and the pod watchdog's heartbeat log.
//! Grounded on the `IntervalTimer` helper in the original scan-backlog
//! implementation: `has_interval_elapsed` resets the clock as a side
//! effect so callers don't need a separate "mark seen" step, and
//! `fastforward` lets a caller force the next check to return true.

use std::time::{Duration, Instant};

pub struct IntervalTimer {
    period: Duration,
    last: Instant,
}

impl IntervalTimer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last: Instant::now(),
        }
    }

    /// Returns true at most once per `period`; resets the clock when it does.
    pub fn has_elapsed(&mut self) -> bool {
        if self.last.elapsed() >= self.period {
            self.last = Instant::now();
            true
        } else {
            false
        }
    }

    /// Forces the next `has_elapsed` call to return true.
    pub fn fastforward(&mut self) {
        self.last = Instant::now() - self.period;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_is_false_immediately_after_construction() {
        let mut timer = IntervalTimer::new(Duration::from_secs(60));
        assert!(!timer.has_elapsed());
    }

    #[test]
    fn fastforward_forces_next_check_true() {
        let mut timer = IntervalTimer::new(Duration::from_secs(60));
        timer.fastforward();
        assert!(timer.has_elapsed());
        assert!(!timer.has_elapsed());
    }

    #[test]
    fn elapsed_resets_the_clock() {
        let mut timer = IntervalTimer::new(Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(10));
        assert!(timer.has_elapsed());
        assert!(!timer.has_elapsed());
    }
}
