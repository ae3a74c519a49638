//! Port-mirroring data model, parsers and the rate/validation pipeline.

pub mod commands;
pub mod config_parser;
pub mod counter_parser;
pub mod rate;
pub mod types;
pub mod validation;

pub use commands::{
    interface_counters_command, is_valid_interface_name, PORT_MIRRORING_CONFIG_COMMAND,
};
pub use config_parser::{
    check_device_error, parse_port_mirroring_config, ConfigParseOutcome, ParseNote,
};
pub use counter_parser::parse_interface_counters;
pub use rate::{compute_rate, RateTracker};
pub use types::{
    bps_to_mbps, AdminState, ConnectionStatus, CounterSample, Direction, MirroringSessionDef,
    RateSample, SessionReport, Snapshot, StatusSummary, ValidationVerdict, VerdictStatus,
};
pub use validation::validate;
