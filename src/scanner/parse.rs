//! Parsers for the two lsof output encodings.
//!
//! The field-oriented encoding (`lsof -F pcPn`) is the primary path: compact,
//! machine-readable, one field per line. The tabular encoding is the fallback
//! when field mode fails, parsed from whitespace-delimited human output.
//! Both produce the same shape: one record per pid with an ascending,
//! duplicate-free port list. Unrecognized or malformed lines are ignored.

use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

use regex::Regex;

use crate::models::DiscoveredListener;

fn field_port_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // e.g. "TCP *:3000 (LISTEN)" or "TCP 127.0.0.1:5173 (LISTEN)"
    RE.get_or_init(|| Regex::new(r":(\d+)\s*\(LISTEN\)").expect("valid port pattern"))
}

fn table_port_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"TCP \S*:(\d+) \(LISTEN\)").expect("valid port pattern"))
}

fn node_command_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bnode(?:js)?\b").expect("valid command pattern"))
}

fn bun_command_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bbun\b").expect("valid command pattern"))
}

/// Accumulates ports per pid while preserving first-seen record order.
#[derive(Default)]
struct RecordBuilder {
    order: Vec<u32>,
    users: HashMap<u32, String>,
    ports: HashMap<u32, BTreeSet<u16>>,
}

impl RecordBuilder {
    fn open(&mut self, pid: u32) {
        if !self.ports.contains_key(&pid) {
            self.order.push(pid);
            self.ports.insert(pid, BTreeSet::new());
        }
    }

    fn add_port(&mut self, pid: u32, port: u16) {
        self.open(pid);
        if let Some(set) = self.ports.get_mut(&pid) {
            set.insert(port);
        }
    }

    fn set_user(&mut self, pid: u32, user: &str) {
        if !user.is_empty() {
            self.users.entry(pid).or_insert_with(|| user.to_string());
        }
    }

    fn finish(mut self) -> Vec<DiscoveredListener> {
        self.order
            .iter()
            .map(|pid| DiscoveredListener {
                pid: *pid,
                user: self.users.remove(pid),
                ports: self
                    .ports
                    .remove(pid)
                    .map(|set| set.into_iter().collect())
                    .unwrap_or_default(),
            })
            .collect()
    }
}

/// Parse `lsof -F pcPn` output.
///
/// A `p<pid>` line starts a new record; each following `n<name>` line attaches
/// a listening port to the current record. Other field tags (`c`, `P`) and
/// malformed lines are skipped. The field encoding carries no user column.
pub fn parse_field_output(stdout: &str) -> Vec<DiscoveredListener> {
    let mut records = RecordBuilder::default();
    let mut current: Option<u32> = None;

    for line in stdout.lines() {
        let Some(tag) = line.as_bytes().first().copied() else {
            continue;
        };
        // A multi-byte first character cannot be a field tag; skip the line
        // rather than slicing inside the character.
        let Some(value) = line.get(1..) else {
            continue;
        };
        match tag {
            b'p' => match value.parse::<u32>() {
                Ok(pid) => {
                    current = Some(pid);
                    records.open(pid);
                }
                Err(_) => current = None,
            },
            b'n' => {
                if let (Some(pid), Some(port)) = (current, extract_port(value, field_port_regex()))
                {
                    records.add_port(pid, port);
                }
            }
            _ => {}
        }
    }

    records.finish()
}

/// Parse tabular lsof output for one scan target.
///
/// Only lines containing a LISTEN marker are considered, the header line is
/// skipped, and the command column must match `scan_target` (exact, or a
/// word-boundary match allowing an optional `js` suffix for `node`).
pub fn parse_table_output(stdout: &str, scan_target: &str) -> Vec<DiscoveredListener> {
    let mut records = RecordBuilder::default();

    for line in stdout.lines() {
        if line.is_empty() || line.starts_with("COMMAND") || !line.contains("LISTEN") {
            continue;
        }

        let columns: Vec<&str> = line.split_whitespace().collect();
        if columns.len() < 2 {
            continue;
        }

        if !command_matches(scan_target, columns[0]) {
            continue;
        }
        let Ok(pid) = columns[1].parse::<u32>() else {
            continue;
        };

        records.open(pid);
        if let Some(user) = columns.get(2) {
            records.set_user(pid, user);
        }
        if let Some(port) = extract_port(line, table_port_regex()) {
            records.add_port(pid, port);
        }
    }

    records.finish()
}

fn extract_port(text: &str, pattern: &Regex) -> Option<u16> {
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn command_matches(scan_target: &str, command: &str) -> bool {
    match scan_target {
        "node" => command == "node" || node_command_regex().is_match(command),
        "bun" => command == "bun" || bun_command_regex().is_match(command),
        other => command == other,
    }
}
