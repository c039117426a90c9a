use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, RwLock};

use crate::engine::search::{DEFAULT_CONTEXT_CHARS, DEFAULT_MAX_ACCELERATED_HITS, SearchOptions};

pub const CURRENT_VERSION: u32 = 1;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "folio";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Use the accelerated text capability when the backend offers one
    #[serde(default = "default_true")]
    pub accelerated_text: bool,

    #[serde(default = "default_search_context_chars")]
    pub search_context_chars: usize,

    #[serde(default = "default_accelerated_max_hits")]
    pub accelerated_max_hits: usize,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
}

fn default_true() -> bool {
    true
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_search_context_chars() -> usize {
    DEFAULT_CONTEXT_CHARS
}

fn default_accelerated_max_hits() -> usize {
    DEFAULT_MAX_ACCELERATED_HITS
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> PathBuf {
    PathBuf::from("folio.log")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            accelerated_text: true,
            search_context_chars: default_search_context_chars(),
            accelerated_max_hits: default_accelerated_max_hits(),
            log_level: default_log_level(),
            log_file: default_log_file(),
        }
    }
}

impl Settings {
    #[must_use]
    pub fn search_options(&self) -> SearchOptions {
        SearchOptions {
            context_chars: self.search_context_chars,
            max_accelerated_hits: self.accelerated_max_hits.max(1),
        }
    }
}

static SETTINGS: LazyLock<RwLock<Settings>> = LazyLock::new(|| RwLock::new(Settings::default()));

pub fn preferred_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

/// Load the global settings from `path`, or from the per-user config file
/// when `None`. A missing per-user file is created with defaults.
pub fn load_settings(path: Option<&Path>) {
    if let Some(path) = path {
        load_settings_from_path(path);
        return;
    }

    let Some(path) = preferred_config_path() else {
        warn!("Could not determine config directory, using default settings");
        return;
    };
    if path.exists() {
        load_settings_from_path(&path);
    } else {
        info!("Settings file not found, creating with defaults at {path:?}");
        if let Ok(settings) = SETTINGS.read() {
            save_settings_to_file(&settings, &path);
        }
    }
}

fn load_settings_from_path(path: &Path) {
    match fs::read_to_string(path) {
        Ok(content) => match serde_yaml::from_str::<Settings>(&content) {
            Ok(mut settings) => {
                debug!("Loaded settings from {path:?}");

                if settings.version < CURRENT_VERSION {
                    migrate_settings(&mut settings);
                    save_settings_to_file(&settings, path);
                }

                if let Ok(mut global) = SETTINGS.write() {
                    *global = settings;
                }
            }
            Err(e) => {
                error!("Failed to parse settings file {path:?}: {e}");
            }
        },
        Err(e) => {
            error!("Failed to read settings file {path:?}: {e}");
        }
    }
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );
    settings.version = CURRENT_VERSION;
}

fn save_settings_to_file(settings: &Settings, path: &Path) {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            if let Err(e) = fs::create_dir_all(parent) {
                error!("Failed to create config directory {parent:?}: {e}");
                return;
            }
        }
    }

    match fs::write(path, generate_settings_yaml(settings)) {
        Ok(()) => debug!("Saved settings to {path:?}"),
        Err(e) => error!("Failed to save settings to {path:?}: {e}"),
    }
}

fn generate_settings_yaml(settings: &Settings) -> String {
    let mut content = String::new();

    content.push_str(&format!("version: {}\n", settings.version));
    content.push('\n');
    content.push_str("# Use the backend's native search/selection/outline when available\n");
    content.push_str(&format!("accelerated_text: {}\n", settings.accelerated_text));
    content.push_str("# Characters of context kept around each fallback search match\n");
    content.push_str(&format!(
        "search_context_chars: {}\n",
        settings.search_context_chars
    ));
    content.push_str("# Upper bound on hits returned by accelerated search\n");
    content.push_str(&format!(
        "accelerated_max_hits: {}\n",
        settings.accelerated_max_hits
    ));
    content.push('\n');
    content.push_str("# off | error | warn | info | debug | trace\n");
    content.push_str(&format!("log_level: \"{}\"\n", settings.log_level));
    content.push_str(&format!(
        "log_file: \"{}\"\n",
        settings.log_file.display()
    ));

    content
}

// Public API for accessing settings

#[must_use]
pub fn current() -> Settings {
    SETTINGS
        .read()
        .map(|s| s.clone())
        .unwrap_or_default()
}

#[must_use]
pub fn is_accelerated_text_enabled() -> bool {
    SETTINGS.read().map(|s| s.accelerated_text).unwrap_or(true)
}

#[must_use]
pub fn get_search_options() -> SearchOptions {
    SETTINGS
        .read()
        .map(|s| s.search_options())
        .unwrap_or_default()
}

#[must_use]
pub fn get_log_level() -> String {
    SETTINGS
        .read()
        .map(|s| s.log_level.clone())
        .unwrap_or_else(|_| default_log_level())
}

#[must_use]
pub fn get_log_file() -> PathBuf {
    SETTINGS
        .read()
        .map(|s| s.log_file.clone())
        .unwrap_or_else(|_| default_log_file())
}

#[cfg(test)]
fn reset_for_tests() {
    if let Ok(mut global) = SETTINGS.write() {
        *global = Settings::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn partial_file_fills_in_defaults() {
        let settings: Settings = serde_yaml::from_str("search_context_chars: 5\n").unwrap();
        assert_eq!(settings.search_context_chars, 5);
        assert_eq!(settings.accelerated_max_hits, DEFAULT_MAX_ACCELERATED_HITS);
        assert!(settings.accelerated_text);
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn generated_yaml_parses_back() {
        let settings = Settings {
            accelerated_text: false,
            search_context_chars: 7,
            accelerated_max_hits: 50,
            log_level: "debug".into(),
            log_file: PathBuf::from("/tmp/folio test.log"),
            ..Settings::default()
        };
        let parsed: Settings = serde_yaml::from_str(&generate_settings_yaml(&settings)).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn search_options_never_cap_at_zero() {
        let settings = Settings {
            accelerated_max_hits: 0,
            ..Settings::default()
        };
        assert_eq!(settings.search_options().max_accelerated_hits, 1);
    }

    #[test]
    #[serial]
    fn explicit_path_replaces_globals() {
        reset_for_tests();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "version: 1\naccelerated_text: false\nsearch_context_chars: 3\nlog_level: warn\n",
        )
        .unwrap();

        load_settings(Some(path.as_path()));

        assert!(!is_accelerated_text_enabled());
        assert_eq!(get_search_options().context_chars, 3);
        assert_eq!(get_log_level(), "warn");
        assert_eq!(get_log_file(), PathBuf::from("folio.log"));
        reset_for_tests();
    }

    #[test]
    #[serial]
    fn unparseable_file_keeps_defaults() {
        reset_for_tests();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "accelerated_text: [not a bool\n").unwrap();

        load_settings(Some(path.as_path()));

        assert_eq!(current(), Settings::default());
    }

    #[test]
    #[serial]
    fn old_version_is_migrated_and_rewritten() {
        reset_for_tests();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "version: 0\nsearch_context_chars: 9\n").unwrap();

        load_settings(Some(path.as_path()));

        assert_eq!(current().version, CURRENT_VERSION);
        assert_eq!(current().search_context_chars, 9);
        let rewritten = fs::read_to_string(&path).unwrap();
        assert!(rewritten.starts_with(&format!("version: {CURRENT_VERSION}")));
        reset_for_tests();
    }
}
