//! Typed raw IPMI command representation.
//!
//! Redesign from the original's string-typed command construction: callers
//! build a [`RawCommand`], the validator inspects the typed form, and only
//! the transport edge renders it back to the `raw 0x.. 0x..` wire string.

use sf_error::SuperfanError;
use std::fmt;

/// A typed `raw netfn cmd [data...]` IPMI command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCommand {
    pub netfn: u8,
    pub cmd: u8,
    pub data: Vec<u8>,
}

impl RawCommand {
    pub fn new(netfn: u8, cmd: u8, data: Vec<u8>) -> Self {
        Self { netfn, cmd, data }
    }

    /// Parse a whitespace-tokenized command string.
    ///
    /// Returns `Ok(None)` when the command does not start with the `raw`
    /// token (non-raw commands pass through the validator unchanged, per
    /// spec.md §4.3). Returns `Err` when the command is `raw`-prefixed but
    /// a byte token is not well-formed hex.
    pub fn parse(command: &str) -> Result<Option<RawCommand>, SuperfanError> {
        let parts: Vec<&str> = command.split_whitespace().collect();
        if parts.first().copied() != Some("raw") || parts.len() < 3 {
            return Ok(None);
        }

        let mut bytes = Vec::with_capacity(parts.len() - 1);
        for token in &parts[1..] {
            bytes.push(parse_hex_byte(token)?);
        }

        Ok(Some(RawCommand {
            netfn: bytes[0],
            cmd: bytes[1],
            data: bytes[2..].to_vec(),
        }))
    }

    /// Render back to the wire-level `raw 0x.. 0x..` string the transport
    /// layer expects.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RawCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "raw {:#04x} {:#04x}", self.netfn, self.cmd)?;
        for b in &self.data {
            write!(f, " {:#04x}", b)?;
        }
        Ok(())
    }
}

/// Parse a single hex token (with or without a `0x` prefix) into a byte.
///
/// A well-formed token consists solely of hex digits after stripping an
/// optional `0x`/`0X` prefix; anything else is [`SuperfanError::Malformed`].
pub fn parse_hex_byte(token: &str) -> Result<u8, SuperfanError> {
    let stripped = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);

    if stripped.is_empty() || !stripped.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(SuperfanError::Malformed(token.to_string()));
    }

    u8::from_str_radix(stripped, 16).map_err(|_| SuperfanError::Malformed(token.to_string()))
}
