//! Device command strings.
//!
//! Everything the monitor sends to the device besides mode switches is
//! built here, so a different CLI dialect only touches this file and the
//! parsers.

use crate::errors::ParseError;

/// Dump the port-mirroring service configuration, one statement per line.
pub const PORT_MIRRORING_CONFIG_COMMAND: &str = "show config services port-mirroring | flatten";

/// Prefix shared by every flattened port-mirroring statement.
pub const SESSION_STATEMENT_PREFIX: &str = "services port-mirroring session";

/// Whether `name` is safe to interpolate into a device command.
pub fn is_valid_interface_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':'))
}

/// Counter dump for one interface, filtered to the octet lines.
pub fn interface_counters_command(interface: &str) -> Result<String, ParseError> {
    if !is_valid_interface_name(interface) {
        return Err(ParseError::InvalidInterface(interface.to_string()));
    }
    Ok(format!(
        r#"show interfaces counters {interface} | include regex "^\s*(RX|TX) octets:""#
    ))
}
