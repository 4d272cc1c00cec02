use std::thread;
use std::time::{Duration, Instant};

/// Fixed-period pacing for the render loop.
///
/// Deadlines advance by exactly one period per tick. If the loop falls
/// behind, the schedule is re-anchored to now instead of firing a burst of
/// catch-up ticks.
pub struct Ticker {
    period: Duration,
    next: Instant,
    missed: u64,
}

impl Ticker {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next: Instant::now() + period,
            missed: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Sleep until the next deadline.
    pub fn wait(&mut self) {
        let now = Instant::now();
        if self.next > now {
            thread::sleep(self.next - now);
        }
        self.next += self.period;

        let now = Instant::now();
        if self.next <= now {
            self.missed += 1;
            self.next = now + self.period;
        }
    }

    /// How many times the schedule had to be re-anchored.
    pub fn missed(&self) -> u64 {
        self.missed
    }
}

/// Time between consecutive paints. Diagnostic only.
pub struct FrameTiming {
    previous: Instant,
}

impl FrameTiming {
    pub fn new() -> Self {
        Self {
            previous: Instant::now(),
        }
    }

    /// Elapsed time since the previous call (or construction), then reset.
    pub fn lap(&mut self) -> Duration {
        let now = Instant::now();
        let dt = now.duration_since(self.previous);
        self.previous = now;
        dt
    }
}

impl Default for FrameTiming {
    fn default() -> Self {
        Self::new()
    }
}
