//! Preference storage for refresh cadence, user scope and enabled categories.
//!
//! Stored as JSON at `~/.nodesweep/config.json`. The refresh interval is
//! either a positive millisecond count or the string sentinel `"paused"`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::warn;

use crate::error::{Error, Result};
use crate::models::Category;

/// Default refresh cadence in milliseconds.
pub const DEFAULT_REFRESH_MS: u64 = 5000;

/// Interval choices offered by the preferences UI.
pub const REFRESH_CHOICES: [RefreshInterval; 4] = [
    RefreshInterval::Millis(1000),
    RefreshInterval::Millis(5000),
    RefreshInterval::Millis(10_000),
    RefreshInterval::Paused,
];

/// Refresh cadence: a positive duration, or paused (timer disarmed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshInterval {
    Millis(u64),
    Paused,
}

impl RefreshInterval {
    /// Clamp nonsense values (zero) back to the default cadence.
    pub fn sanitized(self) -> Self {
        match self {
            RefreshInterval::Millis(0) => RefreshInterval::Millis(DEFAULT_REFRESH_MS),
            other => other,
        }
    }

    /// Timer delay, or `None` when paused.
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            RefreshInterval::Millis(ms) => Some(Duration::from_millis(*ms)),
            RefreshInterval::Paused => None,
        }
    }
}

impl Default for RefreshInterval {
    fn default() -> Self {
        RefreshInterval::Millis(DEFAULT_REFRESH_MS)
    }
}

impl Serialize for RefreshInterval {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            RefreshInterval::Millis(ms) => serializer.serialize_u64(*ms),
            RefreshInterval::Paused => serializer.serialize_str("paused"),
        }
    }
}

impl<'de> Deserialize<'de> for RefreshInterval {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Millis(u64),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Millis(ms) => Ok(RefreshInterval::Millis(ms)),
            Raw::Text(s) if s == "paused" => Ok(RefreshInterval::Paused),
            Raw::Text(s) => Err(serde::de::Error::custom(format!(
                "invalid refresh interval: {s:?}"
            ))),
        }
    }
}

/// User preferences consumed by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    /// Refresh cadence, or paused.
    #[serde(default)]
    pub refresh_ms: RefreshInterval,

    /// Scan all users' processes instead of only the invoking user's.
    #[serde(default)]
    pub all_users: bool,

    /// Which categories are enabled for discovery.
    #[serde(default = "all_categories_enabled", rename = "processTypes")]
    pub categories: BTreeMap<Category, bool>,
}

fn all_categories_enabled() -> BTreeMap<Category, bool> {
    Category::ALL.iter().map(|c| (*c, true)).collect()
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            refresh_ms: RefreshInterval::default(),
            all_users: false,
            categories: all_categories_enabled(),
        }
    }
}

impl Preferences {
    /// Clamp loaded values and fill in categories missing from the file.
    pub fn sanitize(&mut self) {
        self.refresh_ms = self.refresh_ms.sanitized();
        for category in Category::ALL {
            self.categories.entry(category).or_insert(true);
        }
    }

    /// Whether a category is enabled (unknown entries default to enabled).
    pub fn is_enabled(&self, category: Category) -> bool {
        self.categories.get(&category).copied().unwrap_or(true)
    }

    /// The currently enabled category set.
    pub fn enabled_categories(&self) -> Vec<Category> {
        Category::ALL
            .into_iter()
            .filter(|c| self.is_enabled(*c))
            .collect()
    }
}

/// Persistent store for [`Preferences`].
pub struct ConfigStore {
    config_path: PathBuf,
}

impl ConfigStore {
    /// Store at the default path `~/.nodesweep/config.json`.
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;
        Ok(Self {
            config_path: home.join(".nodesweep").join("config.json"),
        })
    }

    /// Store at an explicit path.
    pub fn with_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    /// Load preferences, falling back to env-seeded defaults.
    ///
    /// A missing file yields defaults seeded from `NODESWEEP_REFRESH_MS` and
    /// `NODESWEEP_ALL_USERS=1` and writes them out. An unreadable or
    /// malformed file degrades to defaults with a warning; preferences are
    /// never a fatal error.
    pub async fn load_or_init(&self) -> Preferences {
        match fs::read(&self.config_path).await {
            Ok(bytes) => match serde_json::from_slice::<Preferences>(&bytes) {
                Ok(mut prefs) => {
                    prefs.sanitize();
                    prefs
                }
                Err(e) => {
                    warn!(path = %self.config_path.display(), error = %e, "malformed config, using defaults");
                    Preferences::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut prefs = Preferences::default();
                apply_env_overrides(&mut prefs);
                if let Err(e) = self.save(&prefs).await {
                    warn!(error = %e, "could not write initial config");
                }
                prefs
            }
            Err(e) => {
                warn!(path = %self.config_path.display(), error = %e, "could not read config, using defaults");
                Preferences::default()
            }
        }
    }

    /// Persist preferences as pretty-printed JSON.
    pub async fn save(&self, prefs: &Preferences) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(prefs)?;
        fs::write(&self.config_path, json).await?;
        Ok(())
    }
}

/// First-run seeding from the environment, mirroring the launcher's knobs.
fn apply_env_overrides(prefs: &mut Preferences) {
    if let Ok(value) = std::env::var("NODESWEEP_REFRESH_MS") {
        if value == "paused" {
            prefs.refresh_ms = RefreshInterval::Paused;
        } else if let Ok(ms) = value.parse::<u64>() {
            if ms > 0 {
                prefs.refresh_ms = RefreshInterval::Millis(ms);
            }
        }
    }
    if std::env::var("NODESWEEP_ALL_USERS").as_deref() == Ok("1") {
        prefs.all_users = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, ConfigStore) {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::with_path(dir.path().join("config.json"));
        (dir, store)
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let (_dir, store) = temp_store();
        let mut prefs = Preferences::default();
        prefs.refresh_ms = RefreshInterval::Millis(1000);
        prefs.all_users = true;
        prefs.categories.insert(Category::Bun, false);

        store.save(&prefs).await.unwrap();
        let loaded = store.load_or_init().await;

        assert_eq!(loaded.refresh_ms, RefreshInterval::Millis(1000));
        assert!(loaded.all_users);
        assert!(!loaded.is_enabled(Category::Bun));
        assert!(loaded.is_enabled(Category::Node));
    }

    #[tokio::test]
    async fn missing_file_yields_defaults_and_writes_them() {
        let (_dir, store) = temp_store();
        let prefs = store.load_or_init().await;
        assert_eq!(prefs, {
            let mut expected = Preferences::default();
            apply_env_overrides(&mut expected);
            expected
        });

        // Second load reads the file written on first init.
        let again = store.load_or_init().await;
        assert_eq!(prefs, again);
    }

    #[tokio::test]
    async fn malformed_file_degrades_to_defaults() {
        let (_dir, store) = temp_store();
        tokio::fs::create_dir_all(store.config_path.parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(&store.config_path, b"{not json")
            .await
            .unwrap();

        let prefs = store.load_or_init().await;
        assert_eq!(prefs.refresh_ms, RefreshInterval::default());
    }

    #[test]
    fn paused_sentinel_serializes_as_string() {
        let json = serde_json::to_string(&RefreshInterval::Paused).unwrap();
        assert_eq!(json, "\"paused\"");
        let back: RefreshInterval = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RefreshInterval::Paused);

        let ms: RefreshInterval = serde_json::from_str("2500").unwrap();
        assert_eq!(ms, RefreshInterval::Millis(2500));

        assert!(serde_json::from_str::<RefreshInterval>("\"sometimes\"").is_err());
    }

    #[test]
    fn zero_interval_is_sanitized_to_default() {
        assert_eq!(
            RefreshInterval::Millis(0).sanitized(),
            RefreshInterval::Millis(DEFAULT_REFRESH_MS)
        );
        assert_eq!(
            RefreshInterval::Paused.sanitized(),
            RefreshInterval::Paused
        );
    }

    #[test]
    fn enabled_categories_defaults_to_all() {
        let prefs = Preferences::default();
        assert_eq!(prefs.enabled_categories(), Category::ALL.to_vec());
    }
}
