//! Data models for discovered processes, categories and kill outcomes.

mod category;
mod outcome;
mod process;

pub use category::{default_rules, Category, CategoryRule, RuleSet, VITE_COMMAND_PATTERN};
pub use outcome::{BulkKillOutcome, KillOutcome, KillStep};
pub use process::{DiscoveredListener, ListeningProcess};
