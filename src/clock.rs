//! Virtual clock: maps wall time to simulated time with a compression
//! factor ("speed").

use std::time::Instant;

/// Maps wall-clock progress to simulated seconds at a configurable rate.
///
/// `sim_now()` is monotonic even under wall-clock jitter: if the wall clock
/// appears to regress (shouldn't happen with `Instant`, but defensive
/// against future refactors), the delta for that step is treated as zero
/// rather than going backwards.
pub struct VirtualClock {
    speed: f64,
    started_wall: Instant,
    last_wall: Instant,
    accumulated_sim_seconds: f64,
}

impl VirtualClock {
    /// Create a clock starting now, compressing wall time by `speed`.
    pub fn new(speed: f64) -> Self {
        let now = Instant::now();
        Self {
            speed,
            started_wall: now,
            last_wall: now,
            accumulated_sim_seconds: 0.0,
        }
    }

    /// Compression factor: 1 wall-second advances this many simulated
    /// seconds.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Advance the clock to the current wall time, returning the simulated
    /// seconds elapsed since the previous call (or construction).
    pub fn advance(&mut self) -> f64 {
        let now = Instant::now();
        let wall_delta = now.saturating_duration_since(self.last_wall).as_secs_f64();
        self.last_wall = now;

        let sim_delta = wall_delta * self.speed;
        self.accumulated_sim_seconds += sim_delta;
        sim_delta
    }

    /// Advance the clock directly by `sim_delta` simulated seconds,
    /// bypassing the wall clock. Used by scenario tests that need a
    /// deterministic timeline rather than one at the mercy of how fast the
    /// test executes.
    pub fn advance_by(&mut self, sim_delta: f64) -> f64 {
        self.last_wall = Instant::now();
        self.accumulated_sim_seconds += sim_delta;
        sim_delta
    }

    /// Total simulated seconds elapsed since the clock was created.
    pub fn sim_now(&self) -> f64 {
        self.accumulated_sim_seconds
    }

    /// Wall time elapsed since the clock was created.
    pub fn wall_elapsed(&self) -> f64 {
        self.started_wall.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn starts_at_zero() {
        let clock = VirtualClock::new(1.0);
        assert_eq!(clock.sim_now(), 0.0);
    }

    #[test]
    fn advance_is_non_negative_and_accumulates() {
        let mut clock = VirtualClock::new(1.0);
        sleep(Duration::from_millis(5));
        let d1 = clock.advance();
        assert!(d1 >= 0.0);
        sleep(Duration::from_millis(5));
        let d2 = clock.advance();
        assert!(d2 >= 0.0);
        assert!((clock.sim_now() - (d1 + d2)).abs() < 1e-9);
    }

    #[test]
    fn speed_scales_sim_seconds() {
        let mut fast = VirtualClock::new(60.0);
        sleep(Duration::from_millis(10));
        let delta = fast.advance();
        // 10ms wall * 60 speed ~= 0.6 sim seconds, allow generous slack for
        // scheduler jitter.
        assert!(delta > 0.1, "delta too small: {delta}");
    }

    #[test]
    fn advance_by_ignores_wall_clock() {
        let mut clock = VirtualClock::new(1.0);
        let d = clock.advance_by(60.0);
        assert_eq!(d, 60.0);
        assert_eq!(clock.sim_now(), 60.0);
        let d2 = clock.advance_by(10.0);
        assert_eq!(d2, 10.0);
        assert_eq!(clock.sim_now(), 70.0);
    }

    #[test]
    fn sim_now_never_decreases() {
        let mut clock = VirtualClock::new(10.0);
        let mut last = clock.sim_now();
        for _ in 0..5 {
            sleep(Duration::from_millis(2));
            clock.advance();
            let now = clock.sim_now();
            assert!(now >= last);
            last = now;
        }
    }
}
