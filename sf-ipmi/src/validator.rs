//! Pure validation over the typed raw command form (C3).

use sf_error::{Result, SuperfanError};
use sf_transport::RawCommand;

/// (netfn, cmd) pairs known to perturb fan/sensor behavior on affected BMCs.
const BLACKLIST: &[(u8, u8)] = &[(0x06, 0x01), (0x06, 0x02)];

const MODE_NETFN: u8 = 0x30;
const MODE_CMD: u8 = 0x45;
const SPEED_NETFN: u8 = 0x30;
const SPEED_CMD_STANDARD: u8 = 0x70;
const SPEED_CMD_X9: u8 = 0x91;

const PERMITTED_MODES: &[u8] = &[0x00, 0x01, 0x02, 0x04];

/// Rejects blacklisted, malformed, or unsafe raw commands before dispatch.
/// Never performs I/O.
pub struct CommandValidator {
    /// Minimum speed byte permitted on a speed-set command, unless the byte
    /// is `0x00` and `permit_off` allows it.
    pub floor: u8,
    pub permit_off: bool,
}

impl CommandValidator {
    pub fn new(floor: u8, permit_off: bool) -> Self {
        Self { floor, permit_off }
    }

    pub fn validate(&self, command: &RawCommand) -> Result<()> {
        if BLACKLIST.contains(&(command.netfn, command.cmd)) {
            return Err(SuperfanError::Blacklisted {
                netfn: command.netfn,
                cmd: command.cmd,
            });
        }

        if command.netfn == MODE_NETFN && command.cmd == MODE_CMD {
            if let Some((0x01, mode)) = first_two(&command.data) {
                if !PERMITTED_MODES.contains(&mode) {
                    return Err(SuperfanError::UnsafeMode(mode));
                }
            }
        }

        if let Some(speed_byte) = speed_byte(command) {
            let is_permitted_off = speed_byte == 0x00 && self.permit_off;
            if !is_permitted_off && speed_byte < self.floor {
                return Err(SuperfanError::UnsafeSpeed(speed_byte, self.floor));
            }
        }

        Ok(())
    }
}

fn first_two(data: &[u8]) -> Option<(u8, u8)> {
    match data {
        [a, b, ..] => Some((*a, *b)),
        _ => None,
    }
}

/// Extracts the trailing speed byte from a speed-set command, if `command`
/// is one of the two speed-set templates.
fn speed_byte(command: &RawCommand) -> Option<u8> {
    if command.netfn != SPEED_NETFN {
        return None;
    }
    match command.cmd {
        SPEED_CMD_STANDARD if command.data.len() >= 4 && command.data[0] == 0x66 && command.data[1] == 0x01 => {
            Some(command.data[3])
        }
        SPEED_CMD_X9 if command.data.len() >= 4 && command.data[0] == 0x5A && command.data[1] == 0x03 => {
            Some(command.data[3])
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode_cmd(mode: u8) -> RawCommand {
        RawCommand::new(0x30, 0x45, vec![0x01, mode])
    }

    fn speed_cmd(byte: u8) -> RawCommand {
        RawCommand::new(0x30, 0x70, vec![0x66, 0x01, 0x00, byte])
    }

    #[test]
    fn accepts_well_formed_command() {
        let validator = CommandValidator::new(0x04, false);
        assert!(validator.validate(&speed_cmd(0x80)).is_ok());
    }

    #[test]
    fn rejects_blacklisted_commands() {
        let validator = CommandValidator::new(0x04, false);
        let blacklisted = RawCommand::new(0x06, 0x01, vec![]);
        assert!(matches!(
            validator.validate(&blacklisted),
            Err(SuperfanError::Blacklisted { netfn: 0x06, cmd: 0x01 })
        ));
        let blacklisted2 = RawCommand::new(0x06, 0x02, vec![]);
        assert!(validator.validate(&blacklisted2).is_err());
    }

    #[test]
    fn rejects_unpermitted_mode_byte() {
        let validator = CommandValidator::new(0x04, false);
        assert!(validator.validate(&mode_cmd(0x03)).is_err());
        assert!(validator.validate(&mode_cmd(0x00)).is_ok());
        assert!(validator.validate(&mode_cmd(0x04)).is_ok());
    }

    #[test]
    fn rejects_speed_below_floor() {
        let validator = CommandValidator::new(0x20, false);
        assert!(validator.validate(&speed_cmd(0x10)).is_err());
    }

    #[test]
    fn permits_off_when_policy_allows() {
        let validator = CommandValidator::new(0x20, true);
        assert!(validator.validate(&speed_cmd(0x00)).is_ok());
    }

    #[test]
    fn forbids_off_when_policy_disallows() {
        let validator = CommandValidator::new(0x20, false);
        assert!(validator.validate(&speed_cmd(0x00)).is_err());
    }

    #[test]
    fn non_mode_non_speed_commands_pass_through() {
        let validator = CommandValidator::new(0x20, false);
        let query = RawCommand::new(0x30, 0x45, vec![0x00]);
        assert!(validator.validate(&query).is_ok());
    }
}
