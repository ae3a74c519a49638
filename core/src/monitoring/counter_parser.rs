//! Parse filtered interface counter output.
//!
//! Expected input (one line per direction):
//!
//! ```text
//!      RX octets: 12948298 ( 217 bps / 0.0 Mbps)
//!      TX octets: 3259646366958 ( 376 bps / 0.0 Mbps)
//! ```

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use super::types::CounterSample;
use crate::errors::ParseError;

fn label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(RX|TX) octets:").expect("valid regex"))
}

fn value_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?P<dir>RX|TX) octets:\s+(?P<octets>\d+)(?:\s*\([^/)]*/\s*(?P<mbps>\d+(?:\.\d+)?)\s*Mbps\s*\))?\s*$",
        )
        .expect("valid regex")
    })
}

#[derive(Default)]
struct Direction {
    octets: Option<u64>,
    mbps: Option<f64>,
}

/// Extract the RX and TX octet counters for `interface` from `text`.
///
/// Exactly one line of each direction must be present. The device's own
/// rate estimate is kept when present but never required.
pub fn parse_interface_counters(
    interface: &str,
    text: &str,
    sampled_at: DateTime<Utc>,
) -> Result<CounterSample, ParseError> {
    let fail = |reason: String| ParseError::Counters {
        interface: interface.to_string(),
        reason,
    };

    let mut rx = Direction::default();
    let mut tx = Direction::default();

    for line in text.lines() {
        let Some(label) = label_re().captures(line) else {
            continue;
        };
        let dir = &label[1];
        let caps = value_re()
            .captures(line)
            .ok_or_else(|| fail(format!("malformed {dir} octets line: {:?}", line.trim())))?;
        let octets: u64 = caps["octets"]
            .parse()
            .map_err(|e| fail(format!("invalid {dir} octet count: {e}")))?;
        let mbps = caps.name("mbps").and_then(|m| m.as_str().parse::<f64>().ok());

        let slot = if dir == "RX" { &mut rx } else { &mut tx };
        if slot.octets.is_some() {
            return Err(fail(format!("duplicate {dir} octets line")));
        }
        slot.octets = Some(octets);
        slot.mbps = mbps;
    }

    let rx_octets = rx.octets.ok_or_else(|| fail("missing RX octets line".to_string()))?;
    let tx_octets = tx.octets.ok_or_else(|| fail("missing TX octets line".to_string()))?;

    Ok(CounterSample {
        interface: interface.to_string(),
        rx_octets,
        tx_octets,
        sampled_at,
        reported_rx_mbps: rx.mbps,
        reported_tx_mbps: tx.mbps,
    })
}
