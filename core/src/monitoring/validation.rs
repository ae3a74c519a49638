//! Direction-aware validation of one mirroring session.
//!
//! The destination interface transmits whatever the session copies from
//! the source, so the expected destination TX rate depends on which
//! source flows are mirrored:
//!
//! | direction            | expected destination TX |
//! |----------------------|-------------------------|
//! | both / unspecified   | source RX + source TX   |
//! | ingress              | source RX               |
//! | egress               | source TX               |

use crate::config::Thresholds;
use crate::errors::ValidationError;

use super::types::{
    bps_to_mbps, AdminState, Direction, MirroringSessionDef, RateSample, ValidationVerdict,
    VerdictStatus,
};

/// Floor for the delta denominator, in bits per second.
pub const RATE_EPSILON_BPS: f64 = 1.0;

/// Expected destination TX rate in bits per second.
pub fn expected_rate(
    direction: Direction,
    source: Option<&RateSample>,
) -> Result<f64, ValidationError> {
    let source =
        source.ok_or_else(|| ValidationError::InputUnavailable("source interface".to_string()))?;
    let rx = || {
        source
            .rx_bps
            .ok_or_else(|| ValidationError::InputUnavailable(format!("source {} RX", source.interface)))
    };
    let tx = || {
        source
            .tx_bps
            .ok_or_else(|| ValidationError::InputUnavailable(format!("source {} TX", source.interface)))
    };
    match direction {
        Direction::Both | Direction::Unspecified => Ok(rx()? + tx()?),
        Direction::Ingress => rx(),
        Direction::Egress => tx(),
    }
}

/// Actual destination TX rate in bits per second.
pub fn actual_rate(dest: Option<&RateSample>) -> Result<f64, ValidationError> {
    let dest = dest
        .ok_or_else(|| ValidationError::InputUnavailable("destination interface".to_string()))?;
    dest.tx_bps
        .ok_or_else(|| ValidationError::InputUnavailable(format!("destination {} TX", dest.interface)))
}

/// `|actual - expected| / max(expected, ε) × 100`.
pub fn delta_percent(expected_bps: f64, actual_bps: f64) -> f64 {
    (actual_bps - expected_bps).abs() / expected_bps.max(RATE_EPSILON_BPS) * 100.0
}

/// Judge whether `def` mirrors its source faithfully.
///
/// Thresholds are compared against full-precision rates; values are only
/// rounded in the detail text.
pub fn validate(
    def: &MirroringSessionDef,
    source: Option<&RateSample>,
    dest: Option<&RateSample>,
    thresholds: &Thresholds,
) -> ValidationVerdict {
    if def.admin_state == AdminState::Disabled {
        return ValidationVerdict::unknown(&def.name, "Session administratively disabled");
    }

    let expected = expected_rate(def.direction, source);
    let actual = actual_rate(dest);
    let (expected_bps, actual_bps) = match (&expected, &actual) {
        (Ok(e), Ok(a)) => (*e, *a),
        (Err(err), _) | (_, Err(err)) => {
            return ValidationVerdict {
                expected_rate_bps: expected.as_ref().ok().copied(),
                actual_rate_bps: actual.as_ref().ok().copied(),
                ..ValidationVerdict::unknown(&def.name, err.to_string())
            };
        }
    };

    let expected_mbps = bps_to_mbps(expected_bps);
    let actual_mbps = bps_to_mbps(actual_bps);
    let delta = delta_percent(expected_bps, actual_bps);
    let expected_idle = expected_mbps < thresholds.idle_mbps;
    let actual_idle = actual_mbps < thresholds.idle_mbps;

    let (status, detail) = if expected_idle && actual_idle {
        (VerdictStatus::Match, "Idle & consistent".to_string())
    } else if actual_idle {
        (
            VerdictStatus::Error,
            format!("Source has {expected_mbps:.2} Mbps but destination is idle"),
        )
    } else if delta <= thresholds.delta_percent {
        (VerdictStatus::Match, format!("Match ({delta:.1}% delta)"))
    } else if expected_idle {
        (
            VerdictStatus::Warning,
            format!("Source idle but destination has {actual_mbps:.2} Mbps"),
        )
    } else {
        (
            VerdictStatus::Warning,
            format!(
                "High delta ({delta:.1}%): expected {expected_mbps:.2} Mbps, destination {actual_mbps:.2} Mbps"
            ),
        )
    };

    ValidationVerdict {
        session_name: def.name.clone(),
        status,
        expected_rate_bps: Some(expected_bps),
        actual_rate_bps: Some(actual_bps),
        delta_percent: Some(delta),
        detail,
    }
}
