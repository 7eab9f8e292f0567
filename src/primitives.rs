//! Stochastic primitives shared by the process model: a mean-reverting
//! Ornstein-Uhlenbeck channel and a sawtooth dosing generator, both driven
//! by simulated time.

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method: sum of 12
/// uniform [0,1) values minus 6. Draws from `rng` rather than the thread-local
/// global generator, so a model's stream is reproducible regardless of which
/// worker thread ticks it.
pub fn approx_std_normal(rng: &mut fastrand::Rng) -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += rng.f64();
    }
    sum - 6.0
}

/// Sample from N(mean, sigma).
pub fn gaussian(rng: &mut fastrand::Rng, mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal(rng)
}

// ---------------------------------------------------------------------------
// Ornstein-Uhlenbeck channel
// ---------------------------------------------------------------------------

/// Mean-reverting Euler-Maruyama channel: `dX = theta*(mean - X)*dt +
/// sigma*sqrt(dt)*dW`, clamped to `[clamp_lo, clamp_hi]` after each step.
///
/// Large steps (e.g. after a pause) are subdivided into substeps of at most
/// `1 / (10 * theta)` simulated seconds to keep the discretisation close to
/// the continuous-time process.
#[derive(Debug, Clone)]
pub struct OuChannel {
    pub mean: f64,
    pub theta: f64,
    pub sigma: f64,
    pub clamp_lo: f64,
    pub clamp_hi: f64,
    pub value: f64,
}

impl OuChannel {
    pub fn new(mean: f64, theta: f64, sigma: f64, clamp_lo: f64, clamp_hi: f64) -> Self {
        Self {
            mean,
            theta,
            sigma,
            clamp_lo,
            clamp_hi,
            value: mean,
        }
    }

    /// Advance the channel by `dt` simulated seconds, returning the new
    /// value. Subdivides large `dt` into bounded substeps.
    pub fn step(&mut self, dt: f64, rng: &mut fastrand::Rng) -> f64 {
        if dt <= 0.0 {
            return self.value;
        }

        let max_substep = 1.0 / (10.0 * self.theta.max(1e-9));
        let n_substeps = (dt / max_substep).ceil().max(1.0) as u32;
        let sub_dt = dt / n_substeps as f64;

        for _ in 0..n_substeps {
            let drift = self.theta * (self.mean - self.value) * sub_dt;
            let diffusion = self.sigma * sub_dt.sqrt() * approx_std_normal(rng);
            self.value = (self.value + drift + diffusion).clamp(self.clamp_lo, self.clamp_hi);
        }

        self.value
    }
}

// ---------------------------------------------------------------------------
// Dose sawtooth
// ---------------------------------------------------------------------------

/// Periodic dosing pulse that snaps to `peak` every `period` simulated
/// seconds (when enabled) and decays exponentially between pulses.
#[derive(Debug, Clone)]
pub struct DoseSawtooth {
    pub period: f64,
    pub peak: f64,
    pub decay_rate: f64,
    pub enabled: bool,
    last_pulse_time: f64,
    current: f64,
}

impl DoseSawtooth {
    pub fn new(period: f64, peak: f64, decay_rate: f64) -> Self {
        Self {
            period,
            peak,
            decay_rate,
            enabled: true,
            last_pulse_time: 0.0,
            current: peak,
        }
    }

    /// Advance the sawtooth to `sim_now`, decaying at `decay_rate` (doubled
    /// by the caller during rain) unless a pulse fires.
    pub fn step(&mut self, sim_now: f64, dt: f64, decay_rate: f64) -> f64 {
        if self.enabled && sim_now - self.last_pulse_time >= self.period {
            self.current = self.peak;
            self.last_pulse_time = sim_now;
        } else {
            self.current = (self.current * (-decay_rate * dt).exp()).clamp(0.0, self.peak);
        }
        self.current
    }

    pub fn current(&self) -> f64 {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approx_std_normal_has_zero_mean() {
        let mut rng = fastrand::Rng::with_seed(1);
        let n = 5000;
        let sum: f64 = (0..n).map(|_| approx_std_normal(&mut rng)).sum();
        let mean = sum / n as f64;
        assert!(mean.abs() < 0.15, "mean should be near zero: {mean}");
    }

    #[test]
    fn ou_channel_stays_within_clamp() {
        let mut rng = fastrand::Rng::with_seed(2);
        let mut ch = OuChannel::new(7.2, 0.08, 0.02, 6.5, 8.0);
        for _ in 0..2000 {
            let v = ch.step(1.0, &mut rng);
            assert!((6.5..=8.0).contains(&v), "value escaped clamp: {v}");
        }
    }

    #[test]
    fn ou_channel_reverts_toward_mean() {
        let mut rng = fastrand::Rng::with_seed(3);
        let mut ch = OuChannel::new(10.0, 0.5, 0.01, -100.0, 100.0);
        ch.value = -50.0;
        for _ in 0..200 {
            ch.step(1.0, &mut rng);
        }
        assert!(
            (ch.value - 10.0).abs() < 5.0,
            "did not revert toward mean: {}",
            ch.value
        );
    }

    #[test]
    fn ou_channel_large_dt_is_substepped_without_panicking() {
        let mut rng = fastrand::Rng::with_seed(4);
        let mut ch = OuChannel::new(3.0, 0.05, 0.15, 0.0, 50.0);
        let v = ch.step(3600.0, &mut rng);
        assert!((0.0..=50.0).contains(&v));
    }

    #[test]
    fn ou_channel_zero_dt_is_noop() {
        let mut rng = fastrand::Rng::with_seed(5);
        let mut ch = OuChannel::new(3.0, 0.05, 0.15, 0.0, 50.0);
        let before = ch.value;
        let v = ch.step(0.0, &mut rng);
        assert_eq!(v, before);
    }

    #[test]
    fn dose_sawtooth_pulses_to_peak_then_decays() {
        let mut dose = DoseSawtooth::new(100.0, 2.0, 0.001);
        let first = dose.step(0.0, 1.0, 0.001);
        assert_eq!(first, 2.0);
        let mut last = first;
        for t in 1..100 {
            let v = dose.step(t as f64, 1.0, 0.001);
            assert!(v <= last + 1e-9, "sawtooth should decay between pulses");
            last = v;
        }
    }

    #[test]
    fn dose_sawtooth_respects_disabled() {
        let mut dose = DoseSawtooth::new(10.0, 2.0, 0.01);
        dose.enabled = false;
        let v0 = dose.step(0.0, 1.0, 0.01);
        let v1 = dose.step(20.0, 1.0, 0.01);
        assert!(v1 <= v0, "disabled dose should never re-pulse");
    }

    #[test]
    fn dose_sawtooth_stays_within_bounds() {
        let mut dose = DoseSawtooth::new(50.0, 5.0, 0.002);
        for t in 0..1000 {
            let v = dose.step(t as f64, 1.0, 0.002);
            assert!((0.0..=5.0).contains(&v), "dose out of bounds: {v}");
        }
    }
}
