//! Command intake: parses scripted scenario commands from the external
//! control surface (the live-push channel's inbound messages) into typed
//! effects applied to the rain source and process model.

use crate::process::FaultTarget;

/// A parsed, ready-to-apply scenario command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Rain { peak_ntu: Option<f64> },
    Dose { enabled: bool },
    Fault { target: FaultTarget },
    Clear { target: FaultTarget },
    Glitch,
    Status,
}

fn parse_target(token: &str) -> Result<FaultTarget, String> {
    match token.to_ascii_lowercase().as_str() {
        "turbidity" => Ok(FaultTarget::Turbidity),
        "chlorine" => Ok(FaultTarget::Chlorine),
        "flow" => Ok(FaultTarget::Flow),
        other => Err(format!("unknown sensor {other:?}")),
    }
}

/// Parse one command line (already split from its JSON envelope, if any)
/// into a `Command`. Unknown verbs or malformed arguments are rejected with
/// a diagnostic and cause no state change.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let mut parts = line.trim().split_whitespace();
    let verb = parts.next().ok_or_else(|| "empty command".to_string())?;

    match verb.to_ascii_lowercase().as_str() {
        "rain" => {
            let peak_ntu = match parts.next() {
                Some(tok) => Some(
                    tok.parse::<f64>()
                        .map_err(|_| format!("invalid rain peak {tok:?}"))?,
                ),
                None => None,
            };
            Ok(Command::Rain { peak_ntu })
        }
        "dose" => match parts.next().map(|t| t.to_ascii_lowercase()) {
            Some(ref t) if t == "on" => Ok(Command::Dose { enabled: true }),
            Some(ref t) if t == "off" => Ok(Command::Dose { enabled: false }),
            other => Err(format!("dose requires on|off, got {other:?}")),
        },
        "fault" => {
            let tok = parts.next().ok_or_else(|| "fault requires a sensor name".to_string())?;
            Ok(Command::Fault { target: parse_target(tok)? })
        }
        "clear" => {
            let tok = parts.next().ok_or_else(|| "clear requires a sensor name".to_string())?;
            Ok(Command::Clear { target: parse_target(tok)? })
        }
        "glitch" => Ok(Command::Glitch),
        "status" => Ok(Command::Status),
        other => Err(format!("unknown command {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rain_with_peak() {
        assert_eq!(parse_command("rain 700").unwrap(), Command::Rain { peak_ntu: Some(700.0) });
    }

    #[test]
    fn parses_rain_without_peak() {
        assert_eq!(parse_command("rain").unwrap(), Command::Rain { peak_ntu: None });
    }

    #[test]
    fn parses_dose_on_and_off() {
        assert_eq!(parse_command("dose on").unwrap(), Command::Dose { enabled: true });
        assert_eq!(parse_command("dose off").unwrap(), Command::Dose { enabled: false });
    }

    #[test]
    fn dose_without_argument_is_rejected() {
        assert!(parse_command("dose").is_err());
    }

    #[test]
    fn parses_fault_and_clear_for_known_sensors() {
        assert_eq!(
            parse_command("fault turbidity").unwrap(),
            Command::Fault { target: FaultTarget::Turbidity }
        );
        assert_eq!(
            parse_command("clear flow").unwrap(),
            Command::Clear { target: FaultTarget::Flow }
        );
    }

    #[test]
    fn fault_rejects_unknown_sensor() {
        assert!(parse_command("fault pressure").is_err());
    }

    #[test]
    fn parses_glitch_and_status() {
        assert_eq!(parse_command("glitch").unwrap(), Command::Glitch);
        assert_eq!(parse_command("status").unwrap(), Command::Status);
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(parse_command("frobnicate").is_err());
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(parse_command("   ").is_err());
    }

    #[test]
    fn command_is_case_insensitive() {
        assert_eq!(parse_command("RAIN 300").unwrap(), Command::Rain { peak_ntu: Some(300.0) });
        assert_eq!(parse_command("DOSE ON").unwrap(), Command::Dose { enabled: true });
    }
}
