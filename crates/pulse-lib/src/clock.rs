use std::time::{Duration, Instant};

/// Monotonic millisecond time plus the one place the controller is allowed to wait.
pub trait Clock {
    fn now_ms(&self) -> u64;
    fn sleep(&mut self, duration: Duration);
}

/// Wall-clock implementation backed by [`Instant`]. Copies share the same origin.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_advances() {
        let mut clock = MonotonicClock::new();
        let before = clock.now_ms();
        clock.sleep(Duration::from_millis(3));
        assert!(clock.now_ms() >= before + 3);
    }
}
