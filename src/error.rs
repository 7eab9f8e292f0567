//! Error kinds surfaced by the simulator, and their mapping to process exit
//! codes.
//!
//! `SimError` is the typed surface used where a caller needs to branch on
//! the kind of failure (mainly `main`, picking an exit code). Inside loop
//! bodies, `anyhow::Result` with `.context(...)` is used for convenience and
//! converted to a `SimError` only at the point where that branching happens.

use std::fmt;

/// Exit code returned by the process on clean shutdown, bad arguments, or an
/// internal error.
pub const EXIT_OK: i32 = 0;
pub const EXIT_BAD_ARGS: i32 = 2;
pub const EXIT_INTERNAL: i32 = 70;

/// Error categories named in the design's error-handling policy.
#[derive(Debug)]
pub enum SimError {
    /// Invalid CLI flags (bad port, non-positive speed, ...). Fatal at
    /// startup.
    ConfigError(String),
    /// Cannot bind the Modbus or push port. Fatal at startup; a client
    /// disconnecting mid-run is not this variant.
    NetworkError(String),
    /// Malformed inbound command. Reported back to the caller, no state
    /// change, loop continues.
    ClientError(String),
    /// Non-fatal simulation anomaly: a clamp saturated, a large step got
    /// substepped. Logged at debug, never propagated.
    SimulationWarn(String),
    /// Invariant violation. Logged with context; fatal only if the bank
    /// lock is poisoned.
    Internal(String),
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigError(msg) => write!(f, "config error: {msg}"),
            Self::NetworkError(msg) => write!(f, "network error: {msg}"),
            Self::ClientError(msg) => write!(f, "client error: {msg}"),
            Self::SimulationWarn(msg) => write!(f, "simulation warning: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for SimError {}

impl SimError {
    /// Exit code this error should produce if it escapes `main`.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConfigError(_) => EXIT_BAD_ARGS,
            Self::NetworkError(_) | Self::Internal(_) => EXIT_INTERNAL,
            Self::ClientError(_) | Self::SimulationWarn(_) => EXIT_OK,
        }
    }
}
