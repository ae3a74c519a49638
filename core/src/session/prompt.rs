//! Prompt detection and output cleanup for the device CLI.
//!
//! This is the only place that knows what the device prompt looks like.
//! A prompt is a line of the form `hostname(tag)(tag)#`, where the tags
//! are optional: a `(cfg...)` tag marks configuration mode, anything else
//! (typically a timestamp) is ignored.

use std::sync::OnceLock;

use regex::Regex;

use super::CliMode;

fn prompt_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<host>[A-Za-z0-9_.\-]+)(?P<tags>(?:\([^()]*\))*)#\s*$")
            .expect("prompt pattern is valid")
    })
}

fn ansi_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // CSI sequences, OSC sequences terminated by BEL, and stray BELs.
        Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]|\x1b\][^\x07]*\x07|\x07")
            .expect("ansi pattern is valid")
    })
}

/// A whole line that is nothing but a pager marker.
fn pager_line_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*-{2,}\s*more\s*-{2,}\s*$").expect("pager pattern is valid")
    })
}

/// A pager marker at the start of a line, plus its newline when the
/// marker is alone on the line. Output printed after the pager was
/// answered may continue on the marker's line.
fn pager_marker_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)^[ \t]*-{2,}[ \t]*more[ \t]*-{2,}[ \t]*\n?")
            .expect("pager pattern is valid")
    })
}

/// A prompt line recognized in device output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub hostname: String,
    pub mode: CliMode,
}

/// Parse a single line as a device prompt.
pub fn parse_prompt(line: &str) -> Option<Prompt> {
    let caps = prompt_pattern().captures(line.trim())?;
    let tags = caps.name("tags").map_or("", |m| m.as_str());
    let mode = if tags.contains("(cfg") {
        CliMode::Config
    } else {
        CliMode::Show
    };
    Some(Prompt {
        hostname: caps["host"].to_string(),
        mode,
    })
}

/// The prompt on the last non-empty line of `text`, if any.
pub fn trailing_prompt(text: &str) -> Option<Prompt> {
    text.trim_end().lines().last().and_then(parse_prompt)
}

/// Remove terminal control sequences and carriage returns.
pub fn strip_ansi(text: &str) -> String {
    ansi_pattern().replace_all(text, "").replace('\r', "")
}

/// Whether the output currently stops at a pager marker (`-- More --`).
pub fn ends_with_pager(text: &str) -> bool {
    text.trim_end()
        .lines()
        .last()
        .is_some_and(|line| pager_line_pattern().is_match(line))
}

/// Remove all pager markers from captured output. Text that merely
/// contains `-more-` inside a line is left alone.
pub fn strip_pager(text: &str) -> String {
    pager_marker_pattern().replace_all(text, "").into_owned()
}

/// Matches prompts for one device once its hostname is known.
#[derive(Debug, Clone, Default)]
pub struct PromptMatcher {
    hostname: Option<String>,
}

impl PromptMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    pub fn set_hostname(&mut self, hostname: impl Into<String>) {
        self.hostname = Some(hostname.into());
    }

    /// Whether `text` ends at the prompt of `mode` for this device.
    pub fn at_prompt(&self, text: &str, mode: CliMode) -> bool {
        match trailing_prompt(text) {
            Some(prompt) => {
                prompt.mode == mode
                    && self
                        .hostname
                        .as_deref()
                        .map_or(true, |h| h == prompt.hostname)
            }
            None => false,
        }
    }
}

/// Turn raw captured text into command output: drop the echoed command,
/// the trailing prompt and pager markers.
pub fn extract_output(text: &str, command: &str) -> String {
    let text = strip_pager(text);
    let mut lines: Vec<&str> = text.lines().collect();

    if lines
        .last()
        .is_some_and(|line| parse_prompt(line).is_some())
    {
        lines.pop();
    }

    let command = command.trim();
    if let Some(pos) = lines.iter().position(|line| !line.trim().is_empty()) {
        if lines[pos].trim_end().ends_with(command) {
            lines.drain(..=pos);
        }
    }

    while lines.last().is_some_and(|line| line.trim().is_empty()) {
        lines.pop();
    }

    lines.join("\n")
}
