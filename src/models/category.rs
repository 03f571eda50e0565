//! Process categories and the ordered classification rule table.
//!
//! Classification is heuristic: a coarse command name selects which rules
//! apply, and the first matching rule against the full command line wins.
//! Rule order is a first-class invariant — the Vite rule is declared before
//! the generic Node rule so that a Vite dev server (which runs as a `node`
//! process) is not reported as plain Node.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Word-boundary pattern for detecting Vite in a command line.
///
/// Applied to the lowercased command line with backslashes normalized to
/// forward slashes. `vite` (optionally `vite.js`) must be bounded by a path,
/// quote, whitespace or version separator on both sides, so `node vitest run`
/// or a `vite-plugin-foo` path component does not match, while
/// `./node_modules/.bin/vite`, `vite.js --port` and `vite@5.0.0` do.
pub const VITE_COMMAND_PATTERN: &str =
    r#"(?:^|[=/@\s"'`])vite(?:\.js)?(?:$|[\s"'`/:@])"#;

fn vite_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(VITE_COMMAND_PATTERN).expect("valid vite pattern"))
}

/// Semantic category of a discovered listening process.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Plain Node.js process.
    Node,
    /// Vite dev server (runs under the node binary, detected by command line).
    Vite,
    /// Bun runtime process.
    Bun,
}

impl Category {
    /// All known categories.
    pub const ALL: [Category; 3] = [Category::Node, Category::Vite, Category::Bun];

    /// The executable name lsof filters on when enumerating this category.
    ///
    /// Vite shares the `node` scan target; enumeration is deduplicated by
    /// target, not by category.
    pub fn scan_target(&self) -> &'static str {
        match self {
            Category::Node | Category::Vite => "node",
            Category::Bun => "bun",
        }
    }

    /// Last-resort category for a scan target with no matching rule.
    ///
    /// Only knows the built-in targets: `bun` maps to [`Category::Bun`] and
    /// anything else to [`Category::Node`]. A custom rule set scanning other
    /// targets should carry a [`CategoryRule::fallback`] rule per target so
    /// this default is never consulted.
    pub fn from_scan_target(target: &str) -> Category {
        match target {
            "bun" => Category::Bun,
            _ => Category::Node,
        }
    }

    /// Lowercase label used in menus and failure details.
    pub fn label(&self) -> &'static str {
        match self {
            Category::Node => "node",
            Category::Vite => "vite",
            Category::Bun => "bun",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// How a rule decides whether a command line belongs to its category.
#[derive(Debug, Clone)]
enum RuleMatcher {
    /// Matches when the pattern occurs in the normalized command line.
    CommandPattern(Regex),
    /// Matches any command line (generic fallback for its scan target).
    Always,
}

/// One classification rule: a tag, the scan target it applies to, and a
/// predicate over the normalized command line.
#[derive(Debug, Clone)]
pub struct CategoryRule {
    tag: Category,
    scan_target: &'static str,
    matcher: RuleMatcher,
}

impl CategoryRule {
    /// Rule that matches when `pattern` occurs in the command line.
    pub fn command_pattern(tag: Category, scan_target: &'static str, pattern: Regex) -> Self {
        Self {
            tag,
            scan_target,
            matcher: RuleMatcher::CommandPattern(pattern),
        }
    }

    /// Rule that matches every command line for its scan target.
    pub fn fallback(tag: Category, scan_target: &'static str) -> Self {
        Self {
            tag,
            scan_target,
            matcher: RuleMatcher::Always,
        }
    }

    /// The category this rule resolves to.
    pub fn tag(&self) -> Category {
        self.tag
    }

    /// The scan target this rule applies to.
    pub fn scan_target(&self) -> &'static str {
        self.scan_target
    }

    fn matches(&self, normalized_command: Option<&str>) -> bool {
        match (&self.matcher, normalized_command) {
            (RuleMatcher::Always, _) => true,
            (RuleMatcher::CommandPattern(re), Some(command)) => re.is_match(command),
            (RuleMatcher::CommandPattern(_), None) => false,
        }
    }
}

/// Ordered list of classification rules, evaluated top to bottom.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<CategoryRule>,
}

impl RuleSet {
    /// Build a rule set from an explicit ordered rule list.
    ///
    /// Order is priority: more specific rules must precede more general ones
    /// for the same scan target.
    pub fn with_rules(rules: Vec<CategoryRule>) -> Self {
        Self { rules }
    }

    /// Resolve the category for a process discovered under `scan_target`.
    ///
    /// `command_line` is `None` when the command-line fetch failed (the
    /// process may have exited between discovery and classification); pattern
    /// rules cannot match then, but fallback rules still apply, so a custom
    /// rule set's declared fallback is honored even without a command line.
    /// [`Category::from_scan_target`] is the last resort when no rule covers
    /// the target at all.
    pub fn resolve(&self, scan_target: &str, command_line: Option<&str>) -> Category {
        let normalized = command_line.map(|c| c.to_lowercase().replace('\\', "/"));
        for rule in self.rules.iter().filter(|r| r.scan_target == scan_target) {
            if rule.matches(normalized.as_deref()) {
                return rule.tag;
            }
        }
        Category::from_scan_target(scan_target)
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        default_rules()
    }
}

/// The standard rule table: Vite before Node (both on the `node` target),
/// Bun on its own target.
pub fn default_rules() -> RuleSet {
    RuleSet::with_rules(vec![
        CategoryRule::command_pattern(Category::Vite, "node", vite_regex().clone()),
        CategoryRule::fallback(Category::Node, "node"),
        CategoryRule::fallback(Category::Bun, "bun"),
    ])
}
