//! CLI surface: flags controlling the Modbus/push ports, time compression,
//! RNG seed, and auto-event scheduling.

use clap::Parser;

use crate::error::SimError;

#[derive(Parser, Debug)]
#[command(
    name = "wtp-sim",
    version,
    about = "Real-time surface water treatment plant simulator, exposed over Modbus TCP"
)]
pub struct Args {
    /// TCP port for the Modbus server.
    #[arg(long, default_value_t = 502)]
    pub modbus_port: u16,

    /// TCP port for the HTTP/WebSocket dashboard; the live-push feed binds
    /// to `dashboard_port + 1`.
    #[arg(long, default_value_t = 8080)]
    pub dashboard_port: u16,

    /// Simulated-seconds-per-wall-second compression factor.
    #[arg(long, default_value_t = 1.0)]
    pub speed: f64,

    /// RNG seed. When omitted, an OS-randomised seed is chosen and logged.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Disable automatic rain-event scheduling (manual injection only).
    #[arg(long, default_value_t = false)]
    pub no_auto_events: bool,
}

impl Args {
    /// Validate the parsed flags, returning a `ConfigError` for anything
    /// the type system didn't already rule out.
    pub fn validate(&self) -> Result<(), SimError> {
        if self.speed <= 0.0 {
            return Err(SimError::ConfigError(format!(
                "--speed must be positive, got {}",
                self.speed
            )));
        }
        if self.modbus_port == self.dashboard_port || self.modbus_port == self.dashboard_port + 1 {
            return Err(SimError::ConfigError(
                "--modbus-port must not collide with the dashboard or push port".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the effective RNG seed, generating and logging one if none
    /// was supplied.
    pub fn resolve_seed(&self) -> u64 {
        match self.seed {
            Some(seed) => seed,
            None => {
                let seed = fastrand::u64(..);
                tracing::info!(seed, "no --seed given, using OS-randomised seed");
                seed
            }
        }
    }

    pub fn push_port(&self) -> u16 {
        self.dashboard_port + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args {
            modbus_port: 502,
            dashboard_port: 8080,
            speed: 1.0,
            seed: Some(42),
            no_auto_events: false,
        }
    }

    #[test]
    fn valid_args_pass_validation() {
        assert!(base_args().validate().is_ok());
    }

    #[test]
    fn non_positive_speed_is_rejected() {
        let mut args = base_args();
        args.speed = 0.0;
        assert!(args.validate().is_err());
        args.speed = -5.0;
        assert!(args.validate().is_err());
    }

    #[test]
    fn colliding_ports_are_rejected() {
        let mut args = base_args();
        args.modbus_port = args.dashboard_port;
        assert!(args.validate().is_err());

        let mut args2 = base_args();
        args2.modbus_port = args2.dashboard_port + 1;
        assert!(args2.validate().is_err());
    }

    #[test]
    fn push_port_is_dashboard_port_plus_one() {
        let args = base_args();
        assert_eq!(args.push_port(), 8081);
    }

    #[test]
    fn resolve_seed_returns_explicit_seed() {
        let args = base_args();
        assert_eq!(args.resolve_seed(), 42);
    }
}
