//! The owning aggregate: clock, rain source, process model, state machine,
//! and alarm evaluator, wired together into one `tick`. Everything here is
//! owned by the scan orchestrator's tick loop; the only state shared with
//! other loops is the register bank, passed in by reference.

use std::sync::Mutex;

use crate::alarms;
use crate::clock::VirtualClock;
use crate::plant::{CoilCommands, PlantState, PlantStateMachine};
use crate::process::{ProcessInputs, ProcessModel, ProcessSnapshot};
use crate::rain::RainEventSource;
use crate::registers::{coil, di, hr, ir, RegisterBank, Scale, COIL_COUNT, DISCRETE_INPUT_COUNT, HOLDING_REGISTER_COUNT, INPUT_REGISTER_COUNT};

/// Scaling table from `§4.7`, indexed by holding-register address.
const HR_SCALES: [Scale; HOLDING_REGISTER_COUNT] = [
    Scale::Linear(10.0),  // turb_raw
    Scale::Linear(100.0), // turb_filtered
    Scale::Linear(100.0), // ph
    Scale::Linear(100.0), // chlorine
    Scale::Linear(10.0),  // flow_raw
    Scale::Linear(10.0),  // flow_treated
    Scale::Linear(10.0),  // level_pct
    Scale::Linear(10.0),  // temperature
    Scale::Linear(10.0),  // alum_dose
    Scale::Linear(10.0),  // filter_dp
    Scale::Linear(10.0),  // dam_release
    Scale::Linear(1.0),   // level_cm
    Scale::Linear(1.0),   // backwash_count
    Scale::Linear(1.0),   // totaliser_ml
    Scale::Linear(1.0),   // runtime_hours
];

fn coils_from_bits(bits: [bool; COIL_COUNT]) -> CoilCommands {
    CoilCommands {
        auto_mode: bits[coil::AUTO],
        intake_cmd: bits[coil::INTAKE],
        dose_cmd: bits[coil::CHLORINE],
        alum_cmd: bits[coil::ALUM],
        backwash_cmd: bits[coil::BACKWASH],
        estop: bits[coil::ESTOP],
        turb_shutdown_ack: bits[coil::TURB_SHUTDOWN],
    }
}

/// Everything produced by one tick, handed to the push loop and exposed for
/// tests without needing to read back through the register bank.
#[derive(Debug, Clone)]
pub struct TickResult {
    pub sim_now: f64,
    pub state: PlantState,
    pub snapshot: ProcessSnapshot,
    pub alarm_word: u16,
    pub coils: [bool; COIL_COUNT],
    pub discretes: [bool; DISCRETE_INPUT_COUNT],
}

pub struct Engine {
    clock: VirtualClock,
    rain: Mutex<RainEventSource>,
    process: ProcessModel,
    plant: PlantStateMachine,
    modbus_up: std::sync::atomic::AtomicBool,
}

impl Engine {
    pub fn new(seed: u64, speed: f64, auto_events: bool) -> Self {
        Self {
            clock: VirtualClock::new(speed),
            // Seeded from the same `seed` as the process model but drawing
            // from its own `fastrand::Rng`, so neither construction order
            // nor which worker thread ticks the engine affects either
            // stream.
            rain: Mutex::new(RainEventSource::new(auto_events, seed)),
            process: ProcessModel::new(seed),
            plant: PlantStateMachine::new(),
            modbus_up: std::sync::atomic::AtomicBool::new(true),
        }
    }

    pub fn sim_now(&self) -> f64 {
        self.clock.sim_now()
    }

    pub fn wall_elapsed(&self) -> f64 {
        self.clock.wall_elapsed()
    }

    pub fn mark_modbus_down(&self) {
        self.modbus_up.store(false, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn mark_modbus_up(&self) {
        self.modbus_up.store(true, std::sync::atomic::Ordering::Relaxed);
    }

    /// Inject a rain event at the current simulated time. Safe to call
    /// concurrently with `tick` — guarded by the rain source's own lock.
    pub fn inject_rain(&self, peak_ntu: Option<f64>) {
        let sim_now = self.clock.sim_now();
        let mut rain = self.rain.lock().expect("rain source lock poisoned");
        rain.inject(sim_now, peak_ntu);
    }

    pub fn set_fault(&mut self, target: crate::process::FaultTarget, fault: crate::process::SensorFault) {
        self.process.set_fault(target, fault);
    }

    pub fn clear_fault(&mut self, target: crate::process::FaultTarget) {
        self.process.clear_fault(target);
    }

    pub fn glitch_all(&mut self) {
        let sim_now = self.clock.sim_now();
        self.process.glitch_all(sim_now);
    }

    /// Advance the whole simulation by one tick (wall-clock-driven `dt`) and
    /// commit the projected registers to `bank`. Called once per scan period
    /// by the tick loop.
    pub fn tick(&mut self, bank: &RegisterBank) -> TickResult {
        let dt = self.clock.advance();
        self.tick_inner(bank, dt)
    }

    /// Advance the simulation by exactly `dt` simulated seconds, bypassing
    /// the wall clock. Lets scenario tests drive a deterministic timeline
    /// without depending on how fast the test happens to execute.
    pub fn tick_with_dt(&mut self, bank: &RegisterBank, dt: f64) -> TickResult {
        self.clock.advance_by(dt);
        self.tick_inner(bank, dt)
    }

    fn tick_inner(&mut self, bank: &RegisterBank, dt: f64) -> TickResult {
        let sim_now = self.clock.sim_now();

        let coil_bits = bank.coil_snapshot();
        let coils = coils_from_bits(coil_bits);

        let rain_contrib = {
            let mut rain = self.rain.lock().expect("rain source lock poisoned");
            rain.tick_schedule(sim_now);
            rain.active_contributions(sim_now)
        };

        let inputs = ProcessInputs {
            dose_enabled: coils.dose_cmd,
            treatment: self.plant.treatment_mode(),
        };

        let mut snapshot = self.process.tick(sim_now, dt, rain_contrib, inputs);

        self.plant.evaluate(sim_now, &snapshot, coils);
        if self.plant.just_entered_backwash() {
            self.process.note_backwash_increment();
            snapshot.filter_dp = self.process.reset_filter_dp();
            snapshot.backwash_count = self.process.backwash_count();
        }

        let equipment = self.plant.equipment_status(coils);
        let modbus_up = self.modbus_up.load(std::sync::atomic::Ordering::Relaxed);
        let alarm_word = alarms::evaluate(&snapshot, &equipment, modbus_up);

        let mut holding = [0u16; HOLDING_REGISTER_COUNT];
        let values = [
            snapshot.turb_raw,
            snapshot.turb_filtered,
            snapshot.ph,
            snapshot.chlorine,
            snapshot.flow_raw,
            snapshot.flow_treated,
            snapshot.level_pct,
            snapshot.temperature,
            snapshot.alum_dose,
            snapshot.filter_dp,
            snapshot.dam_release,
            snapshot.level_cm,
            snapshot.backwash_count as f64,
            snapshot.totaliser_ml,
            snapshot.runtime_hours,
        ];
        for i in 0..HOLDING_REGISTER_COUNT {
            holding[i] = crate::registers::encode(values[i], HR_SCALES[i]);
        }

        let mut input = [0u16; INPUT_REGISTER_COUNT];
        input[ir::TURB_RAW_BACKUP] = holding[hr::TURB_RAW];
        input[ir::PLANT_STATUS] = self.plant.state().code();
        input[ir::ALARM_WORD] = alarm_word;

        let mut discretes = [false; DISCRETE_INPUT_COUNT];
        discretes[di::PUMP_RUNNING] = equipment.pump_running;
        discretes[di::VALVE_OPEN] = equipment.valve_open;
        discretes[di::BACKWASH_ACTIVE] = equipment.backwash_active;
        discretes[di::COMM_FAULT] = !modbus_up;
        discretes[di::PUMP_FAULT] = equipment.pump_fault;
        discretes[di::VALVE_FAULT] = equipment.valve_fault;
        discretes[di::ESTOP_ACTIVE] = equipment.estop_active;
        discretes[di::TURB_SHUTDOWN_ACTIVE] = equipment.turb_shutdown_active;
        discretes[di::DOSE_ACTIVE] = equipment.dose_active;
        discretes[di::ALUM_ACTIVE] = equipment.alum_active;

        bank.commit_tick(holding, input, discretes);

        TickResult {
            sim_now,
            state: self.plant.state(),
            snapshot,
            alarm_word,
            coils: coil_bits,
            discretes,
        }
    }
}
