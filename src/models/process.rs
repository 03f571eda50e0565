//! Listening process data structures.

use serde::{Deserialize, Serialize};

use super::Category;

/// Raw record produced by the Listener Inspector: a process holding at least
/// one listening TCP socket, before classification.
///
/// `user` is only available from the tabular lsof encoding; the field-oriented
/// encoding does not carry it. `ports` is ascending and duplicate-free; it may
/// be empty when the address line could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredListener {
    pub pid: u32,
    pub user: Option<String>,
    pub ports: Vec<u16>,
}

/// A classified listening process, as published in each discovery snapshot.
///
/// Snapshots are rebuilt from scratch on every pass and replace the previous
/// list wholesale; consumers must treat them as point-in-time data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListeningProcess {
    /// Process id. Always a valid positive id.
    pub pid: u32,
    /// Owning user, when the scan encoding provided one.
    pub user: Option<String>,
    /// Listening ports, ascending and duplicate-free.
    pub ports: Vec<u16>,
    /// Resolved semantic category.
    pub category: Category,
}

impl ListeningProcess {
    /// Port list suffix for menu labels: `" (port 3000)"`,
    /// `" (ports 3000, 5173)"`, or empty when no port was resolved.
    pub fn ports_label(&self) -> String {
        match self.ports.as_slice() {
            [] => String::new(),
            [port] => format!(" (port {port})"),
            ports => {
                let joined = ports
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(" (ports {joined})")
            }
        }
    }
}

impl std::fmt::Display for ListeningProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}{}", self.category, self.pid, self.ports_label())
    }
}
