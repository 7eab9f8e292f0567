//! Plant state machine: consumes process outputs and coil commands, emits
//! the current plant status and which discrete inputs/equipment are active.

use crate::process::{ProcessSnapshot, TreatmentMode};

/// Simulated seconds the plant must dwell in `Starting` before `Running`.
const STARTING_DWELL_SEC: f64 = 60.0;
/// Simulated seconds a backwash cycle lasts.
const BACKWASH_DWELL_SEC: f64 = 20.0 * 60.0;

const TURB_SHUTDOWN_TRIGGER: f64 = 500.0;
const TURB_SHUTDOWN_CLEAR: f64 = 400.0;
const BACKWASH_DP_TRIGGER: f64 = 150.0;

/// Plant status code, matching the IR1 projection (`§6`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum PlantState {
    Offline = 0,
    Starting = 1,
    Running = 2,
    Shutdown = 3,
    Backwash = 4,
    Fault = 5,
}

impl PlantState {
    pub fn code(self) -> u16 {
        self as u16
    }
}

/// Coil-derived commands the state machine reacts to.
#[derive(Debug, Clone, Copy)]
pub struct CoilCommands {
    pub auto_mode: bool,
    pub intake_cmd: bool,
    pub dose_cmd: bool,
    pub alum_cmd: bool,
    pub backwash_cmd: bool,
    pub estop: bool,
    pub turb_shutdown_ack: bool,
}

/// Discrete-input-facing observable side effects of the current state.
#[derive(Debug, Clone, Copy, Default)]
pub struct EquipmentStatus {
    pub pump_running: bool,
    pub valve_open: bool,
    pub backwash_active: bool,
    pub pump_fault: bool,
    pub valve_fault: bool,
    pub estop_active: bool,
    pub turb_shutdown_active: bool,
    pub dose_active: bool,
    pub alum_active: bool,
}

pub struct PlantStateMachine {
    state: PlantState,
    entered_at_sim: f64,
    just_entered_backwash: bool,
}

impl PlantStateMachine {
    pub fn new() -> Self {
        Self {
            state: PlantState::Offline,
            entered_at_sim: 0.0,
            just_entered_backwash: false,
        }
    }

    pub fn state(&self) -> PlantState {
        self.state
    }

    fn transition_to(&mut self, sim_now: f64, next: PlantState) {
        if next != self.state {
            self.just_entered_backwash = next == PlantState::Backwash;
            self.state = next;
            self.entered_at_sim = sim_now;
        } else {
            self.just_entered_backwash = false;
        }
    }

    /// True exactly on the tick a `Backwash` entry happened, so the process
    /// model can reset `filter_dp`.
    pub fn just_entered_backwash(&self) -> bool {
        self.just_entered_backwash
    }

    pub fn treatment_mode(&self) -> TreatmentMode {
        match self.state {
            PlantState::Running | PlantState::Backwash => TreatmentMode::Treating,
            _ => TreatmentMode::NotTreating,
        }
    }

    /// Evaluate transitions for one tick, given the latest process snapshot
    /// and coil commands. First matching rule wins, per the design.
    pub fn evaluate(&mut self, sim_now: f64, snapshot: &ProcessSnapshot, coils: CoilCommands) {
        let dwell = sim_now - self.entered_at_sim;

        if coils.estop {
            self.transition_to(sim_now, PlantState::Fault);
            return;
        }
        if self.state == PlantState::Fault {
            // Stays in Fault until estop clears, then goes to Offline.
            self.transition_to(sim_now, PlantState::Offline);
            return;
        }

        if snapshot.turb_raw > TURB_SHUTDOWN_TRIGGER {
            self.transition_to(sim_now, PlantState::Shutdown);
            return;
        }

        match self.state {
            PlantState::Offline => {
                if coils.auto_mode && coils.intake_cmd && snapshot.turb_raw <= TURB_SHUTDOWN_TRIGGER {
                    self.transition_to(sim_now, PlantState::Starting);
                }
            }
            PlantState::Starting => {
                if dwell >= STARTING_DWELL_SEC {
                    self.transition_to(sim_now, PlantState::Running);
                }
            }
            PlantState::Running => {
                if coils.backwash_cmd || snapshot.filter_dp >= BACKWASH_DP_TRIGGER {
                    self.transition_to(sim_now, PlantState::Backwash);
                }
            }
            PlantState::Backwash => {
                if dwell >= BACKWASH_DWELL_SEC {
                    self.transition_to(sim_now, PlantState::Running);
                }
            }
            PlantState::Shutdown => {
                if snapshot.turb_raw < TURB_SHUTDOWN_CLEAR && !coils.intake_cmd {
                    self.transition_to(sim_now, PlantState::Offline);
                }
            }
            PlantState::Fault => unreachable!("handled above"),
        }
    }

    /// Observable equipment status for the discrete input bank.
    pub fn equipment_status(&self, coils: CoilCommands) -> EquipmentStatus {
        let pump_running = matches!(self.state, PlantState::Running | PlantState::Backwash);
        let valve_open = self.state == PlantState::Backwash;
        let backwash_active = self.state == PlantState::Backwash;

        EquipmentStatus {
            pump_running,
            valve_open,
            backwash_active,
            pump_fault: coils.intake_cmd && !pump_running && self.state != PlantState::Offline && self.state != PlantState::Starting,
            valve_fault: coils.backwash_cmd != valve_open,
            estop_active: coils.estop,
            turb_shutdown_active: self.state == PlantState::Shutdown,
            dose_active: coils.dose_cmd,
            alum_active: coils.alum_cmd,
        }
    }
}

impl Default for PlantStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coils(auto: bool, intake: bool) -> CoilCommands {
        CoilCommands {
            auto_mode: auto,
            intake_cmd: intake,
            dose_cmd: true,
            alum_cmd: true,
            backwash_cmd: false,
            estop: false,
            turb_shutdown_ack: false,
        }
    }

    fn snapshot_with_turb(turb_raw: f64) -> ProcessSnapshot {
        ProcessSnapshot {
            turb_raw,
            ..Default::default()
        }
    }

    #[test]
    fn offline_stays_offline_without_auto_and_intake() {
        let mut sm = PlantStateMachine::new();
        sm.evaluate(0.0, &snapshot_with_turb(3.0), coils(false, false));
        assert_eq!(sm.state(), PlantState::Offline);
    }

    #[test]
    fn offline_to_starting_to_running() {
        let mut sm = PlantStateMachine::new();
        sm.evaluate(0.0, &snapshot_with_turb(3.0), coils(true, true));
        assert_eq!(sm.state(), PlantState::Starting);

        sm.evaluate(30.0, &snapshot_with_turb(3.0), coils(true, true));
        assert_eq!(sm.state(), PlantState::Starting, "should not run before dwell");

        sm.evaluate(61.0, &snapshot_with_turb(3.0), coils(true, true));
        assert_eq!(sm.state(), PlantState::Running);
    }

    #[test]
    fn turbidity_trips_shutdown_from_any_state() {
        let mut sm = PlantStateMachine::new();
        sm.evaluate(0.0, &snapshot_with_turb(3.0), coils(true, true));
        sm.evaluate(61.0, &snapshot_with_turb(3.0), coils(true, true));
        assert_eq!(sm.state(), PlantState::Running);

        sm.evaluate(100.0, &snapshot_with_turb(600.0), coils(true, true));
        assert_eq!(sm.state(), PlantState::Shutdown);
    }

    #[test]
    fn shutdown_requires_clear_and_intake_deassert_to_reach_offline() {
        let mut sm = PlantStateMachine::new();
        sm.evaluate(0.0, &snapshot_with_turb(600.0), coils(true, true));
        assert_eq!(sm.state(), PlantState::Shutdown);

        // turbidity clears but intake still asserted: stays Shutdown.
        sm.evaluate(10.0, &snapshot_with_turb(100.0), coils(true, true));
        assert_eq!(sm.state(), PlantState::Shutdown);

        sm.evaluate(11.0, &snapshot_with_turb(100.0), coils(true, false));
        assert_eq!(sm.state(), PlantState::Offline);
    }

    #[test]
    fn estop_forces_fault_and_clearing_returns_to_offline() {
        let mut sm = PlantStateMachine::new();
        sm.evaluate(0.0, &snapshot_with_turb(3.0), coils(true, true));
        sm.evaluate(61.0, &snapshot_with_turb(3.0), coils(true, true));
        assert_eq!(sm.state(), PlantState::Running);

        let mut c = coils(true, true);
        c.estop = true;
        sm.evaluate(62.0, &snapshot_with_turb(3.0), c);
        assert_eq!(sm.state(), PlantState::Fault);

        c.estop = false;
        sm.evaluate(63.0, &snapshot_with_turb(3.0), c);
        assert_eq!(sm.state(), PlantState::Offline);
    }

    #[test]
    fn backwash_triggers_on_filter_dp_and_returns_after_dwell() {
        let mut sm = PlantStateMachine::new();
        sm.evaluate(0.0, &snapshot_with_turb(3.0), coils(true, true));
        sm.evaluate(61.0, &snapshot_with_turb(3.0), coils(true, true));
        assert_eq!(sm.state(), PlantState::Running);

        let mut snap = snapshot_with_turb(3.0);
        snap.filter_dp = 150.0;
        sm.evaluate(62.0, &snap, coils(true, true));
        assert_eq!(sm.state(), PlantState::Backwash);
        assert!(sm.just_entered_backwash());

        sm.evaluate(62.0 + 1200.0, &snapshot_with_turb(3.0), coils(true, true));
        assert_eq!(sm.state(), PlantState::Running);
    }

    #[test]
    fn treatment_mode_matches_running_and_backwash_only() {
        let mut sm = PlantStateMachine::new();
        assert_eq!(sm.treatment_mode(), TreatmentMode::NotTreating);
        sm.evaluate(0.0, &snapshot_with_turb(3.0), coils(true, true));
        sm.evaluate(61.0, &snapshot_with_turb(3.0), coils(true, true));
        assert_eq!(sm.treatment_mode(), TreatmentMode::Treating);
    }

    #[test]
    fn equipment_status_deasserts_on_shutdown() {
        let mut sm = PlantStateMachine::new();
        sm.evaluate(0.0, &snapshot_with_turb(600.0), coils(true, true));
        let status = sm.equipment_status(coils(true, true));
        assert!(!status.pump_running);
        assert!(!status.backwash_active);
    }
}
