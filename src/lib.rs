//! NodeSweep Core Library
//!
//! Discovers locally listening Node.js, Vite and Bun processes, classifies
//! them by command-line signature, and terminates them with a two-phase
//! SIGTERM/SIGKILL escalation. Provides:
//! - Listener discovery via lsof (field output with a tabular fallback)
//! - Ordered-rule classification of discovered processes
//! - A graceful-then-forceful termination controller
//! - A single-flight refresh scheduler with a self-rearming one-shot timer
//!
//! The presentation layer (tray menu, notifications, preferences window) is a
//! thin shell over this crate: it reads published snapshots through
//! [`EventSink`] and invokes kills and preference changes on the engine.
//!
//! # Platform Support
//! Unix only (macOS and Linux): relies on `lsof`, `ps` and POSIX signals.

pub mod config;
pub mod engine;
pub mod error;
pub mod killer;
pub mod models;
pub mod scanner;

pub use config::{ConfigStore, Preferences, RefreshInterval, DEFAULT_REFRESH_MS, REFRESH_CHOICES};
pub use engine::{DefaultEngine, EventSink, NullSink, SweepEngine};
pub use error::{Error, Result};
pub use killer::ProcessKiller;
pub use models::{
    default_rules, BulkKillOutcome, Category, CategoryRule, DiscoveredListener, KillOutcome,
    KillStep, ListeningProcess, RuleSet,
};
pub use scanner::{ListenerSource, LsofScanner};
