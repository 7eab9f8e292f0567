//! Alarm evaluator: projects the 16-bit alarm word from the current
//! process snapshot and plant state each tick. Pure projection, no
//! latching.

use crate::plant::EquipmentStatus;
use crate::process::ProcessSnapshot;

pub mod bit {
    pub const TURB_RAW_HIGH: u16 = 0;
    pub const TURB_FILTERED_HIGH: u16 = 1;
    pub const CHLORINE_LOW: u16 = 2;
    pub const PH_HIGH: u16 = 3;
    pub const PH_LOW: u16 = 4;
    pub const LEVEL_HIGH: u16 = 5;
    pub const LEVEL_LOW: u16 = 6;
    pub const COMM_FAULT: u16 = 7;
    pub const PUMP_FAULT: u16 = 8;
    pub const VALVE_FAULT: u16 = 9;
}

/// Recompute the alarm word from a snapshot, equipment status, and whether
/// the Modbus server is currently reachable.
pub fn evaluate(snapshot: &ProcessSnapshot, equipment: &EquipmentStatus, modbus_up: bool) -> u16 {
    let mut word: u16 = 0;
    let mut set = |bit: u16, cond: bool| {
        if cond {
            word |= 1 << bit;
        }
    };

    set(bit::TURB_RAW_HIGH, snapshot.turb_raw > 200.0);
    set(bit::TURB_FILTERED_HIGH, snapshot.turb_filtered > 1.0);
    set(bit::CHLORINE_LOW, snapshot.chlorine < 0.2);
    set(bit::PH_HIGH, snapshot.ph > 8.5);
    set(bit::PH_LOW, snapshot.ph < 6.5);
    set(bit::LEVEL_HIGH, snapshot.level_pct > 95.0);
    set(bit::LEVEL_LOW, snapshot.level_pct < 20.0);
    set(bit::COMM_FAULT, !modbus_up);
    set(bit::PUMP_FAULT, equipment.pump_fault);
    set(bit::VALVE_FAULT, equipment.valve_fault);

    word
}
