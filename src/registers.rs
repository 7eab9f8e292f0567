//! Fixed-point register bank: holding registers, input registers, coils,
//! and discrete inputs, plus the engineering-unit <-> u16 encoding table.
//!
//! The bank is the only state shared across the scan orchestrator's loops
//! and the Modbus server task; callers take the bank's lock for the
//! duration of a read or an atomic write-apply, never across an await of
//! network I/O.

use std::sync::RwLock;

pub const HOLDING_REGISTER_COUNT: usize = 15;
pub const INPUT_REGISTER_COUNT: usize = 3;
pub const COIL_COUNT: usize = 8;
pub const DISCRETE_INPUT_COUNT: usize = 10;

/// Holding register addresses, per the scaling table.
pub mod hr {
    pub const TURB_RAW: usize = 0;
    pub const TURB_FILTERED: usize = 1;
    pub const PH: usize = 2;
    pub const CHLORINE: usize = 3;
    pub const FLOW_RAW: usize = 4;
    pub const FLOW_TREATED: usize = 5;
    pub const LEVEL_PCT: usize = 6;
    pub const TEMPERATURE: usize = 7;
    pub const ALUM_DOSE: usize = 8;
    pub const FILTER_DP: usize = 9;
    pub const DAM_RELEASE: usize = 10;
    pub const LEVEL_CM: usize = 11;
    pub const BACKWASH_COUNT: usize = 12;
    pub const TOTALISER_ML: usize = 13;
    pub const RUNTIME_H: usize = 14;
}

/// Input register addresses.
pub mod ir {
    pub const TURB_RAW_BACKUP: usize = 0;
    pub const PLANT_STATUS: usize = 1;
    pub const ALARM_WORD: usize = 2;
}

/// Coil addresses (Modbus 1-based numbers in `§6` minus one).
pub mod coil {
    pub const INTAKE: usize = 0;
    pub const ALUM: usize = 1;
    pub const CHLORINE: usize = 2;
    pub const BACKWASH: usize = 3;
    pub const AUTO: usize = 4;
    pub const ESTOP: usize = 5;
    pub const ACK: usize = 6;
    pub const TURB_SHUTDOWN: usize = 7;
}

/// Discrete input addresses.
pub mod di {
    pub const PUMP_RUNNING: usize = 0;
    pub const VALVE_OPEN: usize = 1;
    pub const BACKWASH_ACTIVE: usize = 2;
    pub const COMM_FAULT: usize = 3;
    pub const PUMP_FAULT: usize = 4;
    pub const VALVE_FAULT: usize = 5;
    pub const ESTOP_ACTIVE: usize = 6;
    pub const TURB_SHUTDOWN_ACTIVE: usize = 7;
    pub const DOSE_ACTIVE: usize = 8;
    pub const ALUM_ACTIVE: usize = 9;
}

/// Fixed-point scale applied before rounding to a `u16`. `Bitfield` is
/// passed through unscaled (already an integer bit pattern).
#[derive(Debug, Clone, Copy)]
pub enum Scale {
    Linear(f64),
    Bitfield,
}

/// Encode an engineering-unit value into a saturating `u16` using
/// round-half-to-even, per the scaling table.
pub fn encode(value: f64, scale: Scale) -> u16 {
    let scaled = match scale {
        Scale::Linear(factor) => value * factor,
        Scale::Bitfield => value,
    };
    let rounded = scaled.round_ties_even();
    if rounded <= 0.0 {
        0
    } else if rounded >= u16::MAX as f64 {
        u16::MAX
    } else {
        rounded as u16
    }
}

/// Decode a raw register back into an engineering-unit value.
pub fn decode(raw: u16, scale: Scale) -> f64 {
    match scale {
        Scale::Linear(factor) => raw as f64 / factor,
        Scale::Bitfield => raw as f64,
    }
}

/// A single pending write landed by the Modbus server, drained by the
/// command-drain loop before the next tick.
#[derive(Debug, Clone)]
pub enum PendingWrite {
    Coil { index: usize, value: bool },
    HoldingRegister { index: usize, value: u16 },
}

/// The fixed-address register/coil/discrete-input bank.
///
/// Exclusively mutated by the scan orchestrator's tick loop; Modbus reads
/// take the shared read-side lock; Modbus writes are queued as
/// `PendingWrite`s rather than applied in place, so a register read never
/// tears across the middle of a tick.
pub struct RegisterBank {
    inner: RwLock<BankInner>,
}

struct BankInner {
    holding: [u16; HOLDING_REGISTER_COUNT],
    input: [u16; INPUT_REGISTER_COUNT],
    coils: [bool; COIL_COUNT],
    discretes: [bool; DISCRETE_INPUT_COUNT],
}

impl Default for RegisterBank {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterBank {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(BankInner {
                holding: [0; HOLDING_REGISTER_COUNT],
                input: [0; INPUT_REGISTER_COUNT],
                coils: [false; COIL_COUNT],
                discretes: [false; DISCRETE_INPUT_COUNT],
            }),
        }
    }

    pub fn read_holding(&self, addr: usize, count: usize) -> Option<Vec<u16>> {
        let inner = self.inner.read().ok()?;
        inner.holding.get(addr..addr + count).map(|s| s.to_vec())
    }

    pub fn read_input(&self, addr: usize, count: usize) -> Option<Vec<u16>> {
        let inner = self.inner.read().ok()?;
        inner.input.get(addr..addr + count).map(|s| s.to_vec())
    }

    pub fn read_coils(&self, addr: usize, count: usize) -> Option<Vec<bool>> {
        let inner = self.inner.read().ok()?;
        inner.coils.get(addr..addr + count).map(|s| s.to_vec())
    }

    pub fn read_discretes(&self, addr: usize, count: usize) -> Option<Vec<bool>> {
        let inner = self.inner.read().ok()?;
        inner.discretes.get(addr..addr + count).map(|s| s.to_vec())
    }

    /// Overwrite all holding/input registers and discrete inputs for the
    /// current tick. Coils are NOT touched here; they are mutated only via
    /// `apply_writes` (Modbus-originated) or directly by the caller through
    /// `write_coil`, matching the design's single-writer-per-command-source
    /// rule.
    pub fn commit_tick(&self, holding: [u16; HOLDING_REGISTER_COUNT], input: [u16; INPUT_REGISTER_COUNT], discretes: [bool; DISCRETE_INPUT_COUNT]) {
        let mut inner = self.inner.write().expect("register bank lock poisoned");
        inner.holding = holding;
        inner.input = input;
        inner.discretes = discretes;
    }

    pub fn coil_snapshot(&self) -> [bool; COIL_COUNT] {
        self.inner.read().expect("register bank lock poisoned").coils
    }

    pub fn write_coil(&self, index: usize, value: bool) {
        if let Ok(mut inner) = self.inner.write() {
            if index < COIL_COUNT {
                inner.coils[index] = value;
            }
        }
    }

    fn write_holding(&self, index: usize, value: u16) {
        if let Ok(mut inner) = self.inner.write() {
            if index < HOLDING_REGISTER_COUNT {
                inner.holding[index] = value;
            }
        }
    }

    /// Apply a batch of pending writes atomically under a single lock
    /// acquisition.
    pub fn apply_writes(&self, ops: &[PendingWrite]) {
        let mut inner = self.inner.write().expect("register bank lock poisoned");
        for op in ops {
            match *op {
                PendingWrite::Coil { index, value } if index < COIL_COUNT => {
                    inner.coils[index] = value;
                }
                PendingWrite::HoldingRegister { index, value } if index < HOLDING_REGISTER_COUNT => {
                    inner.holding[index] = value;
                }
                _ => {}
            }
        }
    }
}
