//! Process model: composes the stochastic primitives, rain envelopes, and
//! diurnal demand curve into the plant's correlated sensor channels.

use crate::primitives::{DoseSawtooth, OuChannel};
use crate::rain::RainContribution;

/// A forced-value or noise-burst fault applied to one sensor channel for a
/// bounded simulated duration.
#[derive(Debug, Clone, Copy)]
pub enum SensorFault {
    /// Freeze the channel at its value when the fault was applied.
    HoldLast,
    /// Pin the channel to zero.
    StuckAtZero,
    /// Add amplified noise on top of the normal signal until `until_sim`.
    Glitch { until_sim: f64 },
}

/// Which sensor a fault targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultTarget {
    Turbidity,
    Chlorine,
    Flow,
}

/// Engineering-unit readings for a single tick, taken atomically.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSnapshot {
    pub turb_raw: f64,
    pub turb_filtered: f64,
    pub ph: f64,
    pub chlorine: f64,
    pub flow_raw: f64,
    pub flow_treated: f64,
    pub level_pct: f64,
    pub temperature: f64,
    pub alum_dose: f64,
    pub filter_dp: f64,
    pub dam_release: f64,
    pub level_cm: f64,
    pub backwash_count: u32,
    pub totaliser_ml: f64,
    pub runtime_hours: f64,
}

/// Whether the plant is treating water this tick; governs filtered
/// turbidity and reservoir inflow. Supplied by the plant state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreatmentMode {
    Treating,
    NotTreating,
}

/// Coagulant/disinfectant/backwash commands read from the Coil Set that the
/// process model needs (the rest are consumed by the state machine).
#[derive(Debug, Clone, Copy)]
pub struct ProcessInputs {
    pub dose_enabled: bool,
    pub treatment: TreatmentMode,
}

const RESERVOIR_CAPACITY_LITERS: f64 = 2_000_000.0;
// Kept below the diurnal flow floor (300 L/s raw, ~294 L/s after the 2%
// treatment loss) so the reservoir reliably fills while Running instead of
// drifting flat/negative on the baseline flow alone.
const NOMINAL_DEMAND_LPS: f64 = 250.0;
const FILTER_DP_GROWTH_K: f64 = 0.00005;
const FILTER_DP_RESET: f64 = 15.0;
const FILTER_DP_MAX: f64 = 300.0;
const TURB_FILTERED_DRIFT_K: f64 = 0.01;
const ALUM_DOSE_BASE: f64 = 0.5;
const ALUM_DOSE_PER_NTU: f64 = 0.01;
const ALUM_DOSE_MAX: f64 = 50.0;

/// Morning/afternoon diurnal demand bumps: Gaussian shapes in simulated
/// hour-of-day, sigma 1.5h, centred at 07:30 and 18:00.
fn diurnal_bump(hour_of_day: f64, center_hour: f64) -> f64 {
    let sigma = 1.5;
    let mut d = (hour_of_day - center_hour).abs();
    if d > 12.0 {
        d = 24.0 - d;
    }
    (-(d * d) / (2.0 * sigma * sigma)).exp()
}

fn diurnal_flow_base(sim_now: f64) -> f64 {
    let hour_of_day = (sim_now / 3600.0) % 24.0;
    let morning = diurnal_bump(hour_of_day, 7.5);
    let afternoon = diurnal_bump(hour_of_day, 18.0);
    300.0 + 300.0 * (morning + afternoon)
}

pub struct ProcessModel {
    turb_noise: OuChannel,
    ph_noise: OuChannel,
    temp_noise: OuChannel,
    flow_noise: OuChannel,
    chlorine_dose: DoseSawtooth,

    turb_filtered: f64,
    filter_dp: f64,
    totaliser_ml: f64,
    runtime_hours: f64,
    level_pct: f64,
    backwash_count: u32,

    faults: Vec<(FaultTarget, SensorFault)>,
    glitch_all_until: Option<f64>,
    last_fault_values: std::collections::HashMap<FaultTarget, f64>,
    rng: fastrand::Rng,
}

impl ProcessModel {
    /// Owns its own generator seeded from `seed` rather than drawing from
    /// `fastrand`'s thread-local default, so the draw sequence is
    /// reproducible regardless of which worker thread ticks the model.
    pub fn new(seed: u64) -> Self {
        Self {
            turb_noise: OuChannel::new(3.0, 0.05, 0.15, 0.0, 50.0),
            ph_noise: OuChannel::new(7.2, 0.08, 0.02, 6.0, 8.5),
            temp_noise: OuChannel::new(26.0, 0.01, 0.05, 10.0, 40.0),
            flow_noise: OuChannel::new(0.0, 0.1, 5.0, -40.0, 40.0),
            chlorine_dose: DoseSawtooth::new(1800.0, 2.0, 0.0006),
            turb_filtered: 0.06,
            filter_dp: FILTER_DP_RESET,
            totaliser_ml: 0.0,
            runtime_hours: 0.0,
            level_pct: 50.0,
            backwash_count: 0,
            faults: Vec::new(),
            glitch_all_until: None,
            last_fault_values: std::collections::HashMap::new(),
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    pub fn set_fault(&mut self, target: FaultTarget, fault: SensorFault) {
        self.faults.retain(|(t, _)| *t != target);
        self.faults.push((target, fault));
    }

    pub fn clear_fault(&mut self, target: FaultTarget) {
        self.faults.retain(|(t, _)| *t != target);
        self.last_fault_values.remove(&target);
    }

    pub fn glitch_all(&mut self, sim_now: f64) {
        self.glitch_all_until = Some(sim_now + 30.0);
    }

    fn apply_fault(&mut self, target: FaultTarget, raw: f64, sim_now: f64) -> f64 {
        let Some((_, fault)) = self.faults.iter().find(|(t, _)| *t == target) else {
            return raw;
        };
        let fault = *fault;
        match fault {
            SensorFault::StuckAtZero => 0.0,
            SensorFault::HoldLast => *self.last_fault_values.entry(target).or_insert(raw),
            SensorFault::Glitch { until_sim } => {
                if sim_now < until_sim {
                    raw + crate::primitives::gaussian(&mut self.rng, 0.0, raw.abs().max(1.0) * 2.0)
                } else {
                    raw
                }
            }
        }
    }

    /// Advance the process model by `dt` simulated seconds, producing a new
    /// `ProcessSnapshot`.
    pub fn tick(&mut self, sim_now: f64, dt: f64, rain: RainContribution, inputs: ProcessInputs) -> ProcessSnapshot {
        let treating = inputs.treatment == TreatmentMode::Treating;

        // 1. Base OU channels.
        let mut turb_raw = self.turb_noise.step(dt, &mut self.rng);
        let mut ph = self.ph_noise.step(dt, &mut self.rng);
        let mut temperature = self.temp_noise.step(dt, &mut self.rng);
        let flow_noise = self.flow_noise.step(dt, &mut self.rng);

        // 2. Diurnal flow demand.
        let flow_base = diurnal_flow_base(sim_now);

        // 3. Rain contributions.
        turb_raw += rain.delta_turb;
        ph -= rain.delta_ph;
        let mut flow_raw = (flow_base + flow_noise) * (1.0 + rain.delta_flow_frac);
        temperature -= rain.delta_temp;

        // Global glitch burst (command intake), applied after physical
        // composition so it represents sensor-side noise, not process
        // noise.
        if let Some(until) = self.glitch_all_until {
            if sim_now < until {
                turb_raw += crate::primitives::gaussian(&mut self.rng, 0.0, 5.0);
                ph += crate::primitives::gaussian(&mut self.rng, 0.0, 0.3);
                flow_raw += crate::primitives::gaussian(&mut self.rng, 0.0, 30.0);
                temperature += crate::primitives::gaussian(&mut self.rng, 0.0, 1.0);
            } else {
                self.glitch_all_until = None;
            }
        }

        turb_raw = turb_raw.max(0.0);
        flow_raw = flow_raw.max(0.0);

        // 4. Filtered turbidity.
        if treating {
            self.turb_filtered = (turb_raw * 0.02).max(0.02);
        } else {
            self.turb_filtered += (turb_raw - self.turb_filtered) * TURB_FILTERED_DRIFT_K * dt;
        }

        // 5. Chlorine dose sawtooth; rain doubles the decay (organics
        // consumption).
        self.chlorine_dose.enabled = inputs.dose_enabled;
        let decay_rate = if rain.delta_turb > 0.0 {
            self.chlorine_dose.decay_rate * 2.0
        } else {
            self.chlorine_dose.decay_rate
        };
        let chlorine = self.chlorine_dose.step(sim_now, dt, decay_rate);

        // Alum dose tracks raw turbidity (a coagulant-demand control loop);
        // not directly specified, chosen to satisfy the rain-cascade
        // property via the shared turb_raw input.
        let alum_dose = (ALUM_DOSE_BASE + ALUM_DOSE_PER_NTU * turb_raw).clamp(0.0, ALUM_DOSE_MAX);

        let flow_treated = if treating { flow_raw * 0.98 } else { 0.0 };

        // 6. Filter differential pressure. A just-entered-backwash reset is
        // applied by the caller via `reset_filter_dp` after the state
        // machine evaluates this tick's snapshot, so it lands in the same
        // tick as the state transition rather than one tick late.
        if treating {
            self.filter_dp = (self.filter_dp + FILTER_DP_GROWTH_K * flow_raw * turb_raw * dt)
                .min(FILTER_DP_MAX);
        }

        // 7. Totaliser and runtime.
        if treating {
            self.totaliser_ml += flow_treated * dt / 1_000_000.0;
            self.runtime_hours += dt / 3600.0;
        }

        // Reservoir level.
        let demand_pct_per_s = (NOMINAL_DEMAND_LPS / RESERVOIR_CAPACITY_LITERS) * 100.0;
        if treating {
            let inflow_pct_per_s = (flow_treated / RESERVOIR_CAPACITY_LITERS) * 100.0;
            self.level_pct = (self.level_pct + (inflow_pct_per_s - demand_pct_per_s) * dt).clamp(0.0, 100.0);
        } else {
            self.level_pct = (self.level_pct - demand_pct_per_s * dt).clamp(0.0, 100.0);
        }

        // 8. Apply sensor faults/glitches on top of the composed signal.
        turb_raw = self.apply_fault(FaultTarget::Turbidity, turb_raw, sim_now);
        let chlorine = self.apply_fault(FaultTarget::Chlorine, chlorine, sim_now);
        flow_raw = self.apply_fault(FaultTarget::Flow, flow_raw, sim_now);

        ProcessSnapshot {
            turb_raw,
            turb_filtered: self.turb_filtered,
            ph,
            chlorine,
            flow_raw,
            flow_treated,
            level_pct: self.level_pct,
            temperature,
            alum_dose,
            filter_dp: self.filter_dp,
            dam_release: 0.0, // no dam-release source modelled
            level_cm: self.level_pct * 5.0, // reservoir depth proxy: 5m at 100%
            backwash_count: self.backwash_count,
            totaliser_ml: self.totaliser_ml,
            runtime_hours: self.runtime_hours,
        }
    }

    pub fn note_backwash_increment(&mut self) {
        self.backwash_count += 1;
    }

    /// Current backwash count, used by the caller to patch an already-built
    /// snapshot in place on the tick the count incremented.
    pub fn backwash_count(&self) -> u32 {
        self.backwash_count
    }

    /// Reset `filter_dp` to its post-backwash floor, called by the engine
    /// the tick a `Backwash` entry is detected so the reset is visible in
    /// that same tick's register snapshot.
    pub fn reset_filter_dp(&mut self) -> f64 {
        self.filter_dp = FILTER_DP_RESET;
        self.filter_dp
    }
}
