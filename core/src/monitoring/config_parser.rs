//! Parse flattened port-mirroring configuration into session definitions.
//!
//! Each statement is one line of the form
//! `services port-mirroring session <name> <attribute> [values...]`.
//! Statements for the same session are grouped in order of first
//! appearance; a group that never names both interfaces is dropped with a
//! note instead of failing the whole parse.

use serde::Serialize;

use super::commands::{is_valid_interface_name, SESSION_STATEMENT_PREFIX};
use crate::errors::ParseError;
use super::types::{AdminState, Direction, MirroringSessionDef};

/// A non-fatal problem found while parsing, attributed to one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseNote {
    pub session: String,
    pub message: String,
}

/// Result of parsing one configuration dump.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigParseOutcome {
    pub sessions: Vec<MirroringSessionDef>,
    pub notes: Vec<ParseNote>,
}

#[derive(Debug)]
struct SessionBuilder {
    name: String,
    description: Option<String>,
    source_interface: Option<String>,
    dest_interface: Option<String>,
    direction: Direction,
    admin_state: AdminState,
}

impl SessionBuilder {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            source_interface: None,
            dest_interface: None,
            direction: Direction::Unspecified,
            admin_state: AdminState::Unknown,
        }
    }

    fn build(self) -> Result<MirroringSessionDef, String> {
        match (self.source_interface, self.dest_interface) {
            (Some(source_interface), Some(dest_interface)) => Ok(MirroringSessionDef {
                name: self.name,
                description: self.description,
                source_interface,
                dest_interface,
                direction: self.direction,
                admin_state: self.admin_state,
            }),
            (None, Some(_)) => Err("missing source-interface; session skipped".to_string()),
            (Some(_), None) => Err("missing destination-interface; session skipped".to_string()),
            (None, None) => {
                Err("missing source-interface and destination-interface; session skipped"
                    .to_string())
            }
        }
    }
}

struct Parser {
    groups: Vec<SessionBuilder>,
    notes: Vec<ParseNote>,
}

impl Parser {
    fn note(&mut self, session: &str, message: impl Into<String>) {
        self.notes.push(ParseNote {
            session: session.to_string(),
            message: message.into(),
        });
    }

    fn group(&mut self, name: &str) -> usize {
        match self.groups.iter().position(|g| g.name == name) {
            Some(idx) => idx,
            None => {
                self.groups.push(SessionBuilder::new(name));
                self.groups.len() - 1
            }
        }
    }

    fn statement(&mut self, name: &str, attribute: Option<&str>, args: &[&str], rest: &str) {
        let idx = self.group(name);
        let Some(attribute) = attribute else {
            return;
        };

        match attribute {
            "admin-state" => {
                let state = match args.first().copied() {
                    Some("enabled") => AdminState::Enabled,
                    Some("disabled") => AdminState::Disabled,
                    other => {
                        self.note(
                            name,
                            format!("unrecognized admin-state {:?}", other.unwrap_or("")),
                        );
                        AdminState::Unknown
                    }
                };
                self.groups[idx].admin_state = state;
            }
            "description" => {
                let text = strip_quotes(rest);
                if !text.is_empty() {
                    self.groups[idx].description = Some(text.to_string());
                }
            }
            "source-interface" => self.source_interface(idx, name, args),
            "destination-interface" => {
                let Some(interface) = self.interface_arg(name, attribute, args) else {
                    return;
                };
                match self.groups[idx].dest_interface.clone() {
                    Some(existing) if existing != interface => {
                        self.note(
                            name,
                            format!(
                                "additional destination-interface {interface} ignored; using {existing}"
                            ),
                        );
                    }
                    Some(_) => {}
                    None => self.groups[idx].dest_interface = Some(interface),
                }
            }
            other => {
                tracing::debug!(session = name, attribute = other, "Ignoring statement");
            }
        }
    }

    fn source_interface(&mut self, idx: usize, name: &str, args: &[&str]) {
        let Some(interface) = self.interface_arg(name, "source-interface", args) else {
            return;
        };

        let direction = match args.iter().position(|a| *a == "direction") {
            None => None,
            Some(pos) => match args.get(pos + 1) {
                Some(value) => match Direction::from_keyword(value) {
                    Some(d) => Some(d),
                    None => {
                        self.note(
                            name,
                            format!("unrecognized direction {value:?}; treating as unspecified"),
                        );
                        Some(Direction::Unspecified)
                    }
                },
                None => {
                    self.note(name, "direction keyword without a value; treating as unspecified");
                    Some(Direction::Unspecified)
                }
            },
        };

        match self.groups[idx].source_interface.clone() {
            Some(existing) if existing != interface => {
                self.note(
                    name,
                    format!(
                        "multiple source interfaces not supported; ignoring {interface}, using {existing}"
                    ),
                );
            }
            existing => {
                if existing.is_none() {
                    self.groups[idx].source_interface = Some(interface);
                }
                if let Some(direction) = direction {
                    self.groups[idx].direction = direction;
                }
            }
        }
    }

    /// First argument as a validated interface name.
    fn interface_arg(&mut self, name: &str, attribute: &str, args: &[&str]) -> Option<String> {
        match args.first() {
            None => {
                self.note(name, format!("{attribute} without an interface"));
                None
            }
            Some(interface) if !is_valid_interface_name(interface) => {
                self.note(
                    name,
                    format!("{attribute} {interface:?} contains unsupported characters"),
                );
                None
            }
            Some(interface) => Some((*interface).to_string()),
        }
    }
}

/// Split off the first whitespace-delimited word.
fn split_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(end) => (&text[..end], &text[end..]),
        None => (text, ""),
    }
}

fn strip_quotes(text: &str) -> &str {
    let text = text.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = text
            .strip_prefix(quote)
            .and_then(|t| t.strip_suffix(quote))
        {
            return inner.trim();
        }
    }
    text
}

/// Reject output in which the device reports that it could not run the
/// configuration dump at all.
pub fn check_device_error(text: &str) -> Result<(), ParseError> {
    match text
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with("ERROR") || l.starts_with("% "))
    {
        Some(line) => Err(ParseError::Config(line.to_string())),
        None => Ok(()),
    }
}

/// Parse the output of the flattened port-mirroring configuration dump.
pub fn parse_port_mirroring_config(text: &str) -> ConfigParseOutcome {
    let mut parser = Parser {
        groups: Vec::new(),
        notes: Vec::new(),
    };

    for line in text.lines() {
        let Some(statement) = line.trim().strip_prefix(SESSION_STATEMENT_PREFIX) else {
            continue;
        };
        // Require a word boundary after the prefix ("session" vs "sessions").
        if !statement.starts_with(char::is_whitespace) {
            continue;
        }

        let (name, after_name) = split_word(statement);
        if name.is_empty() {
            continue;
        }
        let (attribute, rest) = split_word(after_name);
        let attribute = (!attribute.is_empty()).then_some(attribute);
        let args: Vec<&str> = rest.split_whitespace().collect();
        parser.statement(name, attribute, &args, rest);
    }

    let mut outcome = ConfigParseOutcome {
        sessions: Vec::with_capacity(parser.groups.len()),
        notes: parser.notes,
    };
    for group in parser.groups {
        let name = group.name.clone();
        match group.build() {
            Ok(def) => outcome.sessions.push(def),
            Err(message) => outcome.notes.push(ParseNote {
                session: name,
                message,
            }),
        }
    }
    outcome
}
