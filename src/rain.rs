//! Rain event source: Poisson-scheduled disturbance envelopes over
//! simulated time, plus operator-injected events via `inject`.

/// Mean inter-arrival time between auto-scheduled rain events, in simulated
/// seconds. The behavioural envelope in the design only constrains this to
/// `[18h, 36h]`; 24h is chosen as a representative middle value.
const MEAN_INTER_ARRIVAL_SEC: f64 = 24.0 * 3600.0;

/// Fraction of an event's duration over which turbidity ramps linearly from
/// zero to its peak.
const RAMP_FRACTION: f64 = 0.10;

/// Exponential decay time-constant as a fraction of the event's duration.
const DECAY_TIME_CONSTANT_FRACTION: f64 = 0.35;

/// A single rain disturbance, active over `[start_sim_time, start_sim_time +
/// duration)`.
#[derive(Debug, Clone, Copy)]
pub struct RainEvent {
    pub start_sim_time: f64,
    pub duration: f64,
    pub peak_ntu: f64,
    pub ph_drop: f64,
    pub flow_boost_frac: f64,
    pub temp_drop: f64,
}

impl RainEvent {
    fn is_active(&self, sim_now: f64) -> bool {
        sim_now >= self.start_sim_time && sim_now < self.start_sim_time + self.duration
    }

    fn is_expired(&self, sim_now: f64) -> bool {
        sim_now >= self.start_sim_time + self.duration
    }

    /// Shape factor in `[0, 1]` (approximately) describing how much of the
    /// event's peak magnitude is active at `sim_now`: a linear ramp over the
    /// first `RAMP_FRACTION` of the duration, then exponential decay.
    fn shape(&self, sim_now: f64) -> f64 {
        let elapsed = sim_now - self.start_sim_time;
        let ramp_end = self.duration * RAMP_FRACTION;
        if elapsed <= ramp_end {
            if ramp_end <= 0.0 {
                1.0
            } else {
                (elapsed / ramp_end).clamp(0.0, 1.0)
            }
        } else {
            let tau = self.duration * DECAY_TIME_CONSTANT_FRACTION;
            (-(elapsed - ramp_end) / tau.max(1e-9)).exp()
        }
    }
}

/// Net contribution of all currently-active rain events, added to
/// turbidity, subtracted from pH, applied as a flow multiplier, and
/// subtracted from temperature.
#[derive(Debug, Clone, Copy, Default)]
pub struct RainContribution {
    pub delta_turb: f64,
    pub delta_ph: f64,
    pub delta_flow_frac: f64,
    pub delta_temp: f64,
}

/// Schedules and tracks rain events, pruning expired ones.
pub struct RainEventSource {
    events: Vec<RainEvent>,
    auto_schedule: bool,
    next_auto_at: f64,
    rng: fastrand::Rng,
}

impl RainEventSource {
    /// `seed` owns an independent generator from the process model's, so
    /// construction order between the two doesn't affect either one's
    /// stream.
    pub fn new(auto_schedule: bool, seed: u64) -> Self {
        let mut rng = fastrand::Rng::with_seed(seed);
        let next_auto_at = Self::sample_next_interval(&mut rng);
        Self {
            events: Vec::new(),
            auto_schedule,
            next_auto_at,
            rng,
        }
    }

    fn sample_next_interval(rng: &mut fastrand::Rng) -> f64 {
        // Exponential inter-arrival: -mean * ln(U), U in (0, 1].
        let u = (1.0 - rng.f64()).max(f64::MIN_POSITIVE);
        -MEAN_INTER_ARRIVAL_SEC * u.ln()
    }

    /// Synthesise a rain event with a default shape, optionally overriding
    /// the peak turbidity.
    pub fn inject(&mut self, sim_now: f64, peak_ntu: Option<f64>) {
        let peak_ntu = peak_ntu.unwrap_or_else(|| 200.0 + self.rng.f64() * 600.0).clamp(200.0, 800.0);
        let duration = (2.0 + self.rng.f64() * 6.0) * 3600.0;
        let ph_drop = (0.2 + self.rng.f64() * 0.6) * (peak_ntu / 800.0);
        let flow_boost_frac = 0.10 + self.rng.f64() * 0.10;
        let temp_drop = 1.0 + self.rng.f64();

        self.events.push(RainEvent {
            start_sim_time: sim_now,
            duration,
            peak_ntu,
            ph_drop,
            flow_boost_frac,
            temp_drop,
        });
    }

    /// Advance the auto-scheduler; injects a new event if its scheduled
    /// arrival has passed. No-op when auto-scheduling is disabled.
    pub fn tick_schedule(&mut self, sim_now: f64) {
        if !self.auto_schedule {
            return;
        }
        if sim_now >= self.next_auto_at {
            self.inject(sim_now, None);
            self.next_auto_at = sim_now + Self::sample_next_interval(&mut self.rng);
        }
    }

    /// Sum the shaped contributions of all active events, pruning expired
    /// ones. pH and temperature contributions take the max magnitude across
    /// overlapping events; turbidity and flow sum.
    pub fn active_contributions(&mut self, sim_now: f64) -> RainContribution {
        self.events.retain(|e| !e.is_expired(sim_now));

        let mut out = RainContribution::default();
        for event in &self.events {
            if !event.is_active(sim_now) {
                continue;
            }
            let shape = event.shape(sim_now);
            out.delta_turb += event.peak_ntu * shape;
            out.delta_ph = out.delta_ph.max(event.ph_drop * shape);
            out.delta_flow_frac += event.flow_boost_frac * shape;
            out.delta_temp = out.delta_temp.max(event.temp_drop * shape);
        }
        out
    }

    pub fn active_count(&self) -> usize {
        self.events.len()
    }
}
