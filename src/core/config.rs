use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::core::cost::fetch::{validate_endpoint, DEFAULT_PRICING_URL};

pub const MAX_DECIMAL_PLACES: u8 = 6;
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Every key accepted by `get` / `set`.
pub const KEYS: &[&str] = &[
    "decimal_places",
    "refresh_interval_secs",
    "show_in_menu_bar",
    "launch_at_login",
    "daily_budget",
    "monthly_budget",
    "pricing_url",
    "log_level",
];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Unknown config key: '{0}'")]
    UnknownKey(String),
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_decimal_places")]
    pub decimal_places: u8,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_true")]
    pub show_in_menu_bar: bool,
    #[serde(default)]
    pub launch_at_login: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_budget: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_budget: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

fn default_decimal_places() -> u8 {
    2
}
fn default_refresh_interval() -> u64 {
    60
}
fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            decimal_places: default_decimal_places(),
            refresh_interval_secs: default_refresh_interval(),
            show_in_menu_bar: true,
            launch_at_login: false,
            daily_budget: None,
            monthly_budget: None,
            pricing_url: None,
            log_level: None,
        }
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(invalid(key, format!("'{}' is not a boolean", value))),
    }
}

/// `none` or an empty string clears an optional key.
fn is_unset(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case("none")
}

fn parse_budget(key: &str, value: &str) -> Result<Option<f64>, ConfigError> {
    if is_unset(value) {
        return Ok(None);
    }
    let budget: f64 = value
        .parse()
        .map_err(|_| invalid(key, format!("'{}' is not a number", value)))?;
    if !budget.is_finite() || budget < 0.0 {
        return Err(invalid(key, "must be a non-negative amount"));
    }
    Ok(Some(budget))
}

fn fmt_opt<T: ToString>(value: &Option<T>) -> Option<String> {
    value.as_ref().map(ToString::to_string)
}

impl AppConfig {
    /// Get the config file path, respecting XDG_CONFIG_HOME
    pub fn config_path() -> PathBuf {
        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("~"))
                    .join(".config")
            });
        config_dir.join("tokentally").join("config.toml")
    }

    /// Load config from the default path, falling back to defaults if not found
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Serialize and write this config to the config file path.
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::config_path();
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Current value of `key` as text. Unset optional keys are `None`.
    pub fn get(&self, key: &str) -> Result<Option<String>, ConfigError> {
        let value = match key {
            "decimal_places" => Some(self.decimal_places.to_string()),
            "refresh_interval_secs" => Some(self.refresh_interval_secs.to_string()),
            "show_in_menu_bar" => Some(self.show_in_menu_bar.to_string()),
            "launch_at_login" => Some(self.launch_at_login.to_string()),
            "daily_budget" => fmt_opt(&self.daily_budget),
            "monthly_budget" => fmt_opt(&self.monthly_budget),
            "pricing_url" => self.pricing_url.clone(),
            "log_level" => self.log_level.clone(),
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        };
        Ok(value)
    }

    /// Parse `value` for `key` and store it. Leaves the config untouched on
    /// error.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        match key {
            "decimal_places" => {
                let places: u8 = value
                    .parse()
                    .map_err(|_| invalid(key, format!("'{}' is not a whole number", value)))?;
                if places > MAX_DECIMAL_PLACES {
                    return Err(invalid(key, format!("must be at most {}", MAX_DECIMAL_PLACES)));
                }
                self.decimal_places = places;
            }
            "refresh_interval_secs" => {
                self.refresh_interval_secs = value
                    .parse()
                    .map_err(|_| invalid(key, format!("'{}' is not a number of seconds", value)))?;
            }
            "show_in_menu_bar" => self.show_in_menu_bar = parse_bool(key, value)?,
            "launch_at_login" => self.launch_at_login = parse_bool(key, value)?,
            "daily_budget" => self.daily_budget = parse_budget(key, value)?,
            "monthly_budget" => self.monthly_budget = parse_budget(key, value)?,
            "pricing_url" => {
                if is_unset(value) {
                    self.pricing_url = None;
                } else {
                    validate_endpoint(value).map_err(|e| invalid(key, e.to_string()))?;
                    self.pricing_url = Some(value.to_string());
                }
            }
            "log_level" => {
                if is_unset(value) {
                    self.log_level = None;
                } else {
                    let level = value.to_lowercase();
                    if !LOG_LEVELS.contains(&level.as_str()) {
                        return Err(invalid(
                            key,
                            format!("'{}' (must be one of {})", value, LOG_LEVELS.join("|")),
                        ));
                    }
                    self.log_level = Some(level);
                }
            }
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    /// Timer period, or `None` when the timer is disabled.
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_secs > 0).then(|| Duration::from_secs(self.refresh_interval_secs))
    }

    pub fn pricing_url(&self) -> &str {
        self.pricing_url.as_deref().unwrap_or(DEFAULT_PRICING_URL)
    }

    /// Validate the config
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.decimal_places > MAX_DECIMAL_PLACES {
            issues.push(format!(
                "Invalid decimal_places: {} (must be at most {})",
                self.decimal_places, MAX_DECIMAL_PLACES
            ));
        }
        for (key, budget) in [
            ("daily_budget", self.daily_budget),
            ("monthly_budget", self.monthly_budget),
        ] {
            if let Some(b) = budget {
                if !b.is_finite() || b < 0.0 {
                    issues.push(format!("Invalid {}: {} (must be non-negative)", key, b));
                }
            }
        }
        if let Some(url) = &self.pricing_url {
            if let Err(e) = validate_endpoint(url) {
                issues.push(format!("Invalid pricing_url: {}", e));
            }
        }
        if let Some(level) = &self.log_level {
            if !LOG_LEVELS.contains(&level.as_str()) {
                issues.push(format!(
                    "Invalid log_level: '{}' (must be one of {})",
                    level,
                    LOG_LEVELS.join("|")
                ));
            }
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let config = AppConfig::default();
        let issues = config.validate();
        assert!(issues.is_empty(), "Default config should be valid, got: {:?}", issues);
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.decimal_places, 2);
        assert_eq!(config.refresh_interval_secs, 60);
        assert!(config.show_in_menu_bar);
        assert!(!config.launch_at_login);
        assert_eq!(config.pricing_url(), DEFAULT_PRICING_URL);
    }

    #[test]
    fn parse_empty_toml_gives_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn parse_partial_toml() {
        let toml = r#"
decimal_places = 4
refresh_interval_secs = 0
daily_budget = 12.5
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.decimal_places, 4);
        assert_eq!(config.refresh_interval(), None);
        assert_eq!(config.daily_budget, Some(12.5));
        assert!(config.show_in_menu_bar);
    }

    #[test]
    fn refresh_interval_zero_disables_timer() {
        let mut config = AppConfig::default();
        assert_eq!(config.refresh_interval(), Some(Duration::from_secs(60)));
        config.set("refresh_interval_secs", "0").unwrap();
        assert_eq!(config.refresh_interval(), None);
    }

    #[test]
    fn get_and_set_round_trip_each_key() {
        let mut config = AppConfig::default();
        config.set("decimal_places", "3").unwrap();
        config.set("show_in_menu_bar", "off").unwrap();
        config.set("launch_at_login", "true").unwrap();
        config.set("monthly_budget", "200").unwrap();
        config.set("pricing_url", "https://example.com/p.json").unwrap();
        config.set("log_level", "DEBUG").unwrap();

        assert_eq!(config.get("decimal_places").unwrap().as_deref(), Some("3"));
        assert_eq!(config.get("show_in_menu_bar").unwrap().as_deref(), Some("false"));
        assert_eq!(config.get("launch_at_login").unwrap().as_deref(), Some("true"));
        assert_eq!(config.get("monthly_budget").unwrap().as_deref(), Some("200"));
        assert_eq!(config.get("daily_budget").unwrap(), None);
        assert_eq!(config.pricing_url(), "https://example.com/p.json");
        assert_eq!(config.get("log_level").unwrap().as_deref(), Some("debug"));
    }

    #[test]
    fn set_none_clears_optional_keys() {
        let mut config = AppConfig::default();
        config.set("daily_budget", "5").unwrap();
        config.set("daily_budget", "none").unwrap();
        assert_eq!(config.daily_budget, None);
    }

    #[test]
    fn set_rejects_bad_values() {
        let mut config = AppConfig::default();
        assert!(matches!(
            config.set("decimal_places", "7"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(config.set("decimal_places", "two").is_err());
        assert!(config.set("daily_budget", "-1").is_err());
        assert!(config.set("show_in_menu_bar", "maybe").is_err());
        assert!(config.set("pricing_url", "http://example.com").is_err());
        assert!(config.set("log_level", "loud").is_err());
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn unknown_key_is_an_error() {
        let mut config = AppConfig::default();
        assert!(matches!(config.get("colour"), Err(ConfigError::UnknownKey(_))));
        assert!(matches!(config.set("colour", "x"), Err(ConfigError::UnknownKey(_))));
    }

    #[test]
    fn every_listed_key_is_gettable() {
        let config = AppConfig::default();
        for key in KEYS {
            assert!(config.get(key).is_ok(), "key {key} should be readable");
        }
    }

    #[test]
    fn validate_catches_hand_edited_values() {
        let config = AppConfig {
            decimal_places: 9,
            monthly_budget: Some(-3.0),
            pricing_url: Some("ftp://prices".into()),
            log_level: Some("chatty".into()),
            ..AppConfig::default()
        };
        let issues = config.validate();
        assert_eq!(issues.len(), 4, "{:?}", issues);
    }

    #[test]
    fn save_and_load_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = AppConfig::default();
        config.set("daily_budget", "7.5").unwrap();
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn load_from_missing_path_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = AppConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded, AppConfig::default());
    }

    #[test]
    fn config_path_uses_xdg_when_set() {
        std::env::set_var("XDG_CONFIG_HOME", "/tmp/test_xdg_config");
        let path = AppConfig::config_path();
        std::env::remove_var("XDG_CONFIG_HOME");
        assert_eq!(path, PathBuf::from("/tmp/test_xdg_config/tokentally/config.toml"));
    }
}
