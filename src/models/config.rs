//! Client configuration.
//!
//! Connection settings for the remote service live here. Display preferences
//! are server-persisted and handled by [`crate::preferences`], not by this file.
//!
//! Config files are layered key by key: a later file only overrides the keys
//! it actually sets.

use serde::{Deserialize, Serialize};

/// Client configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct QmonConfig {
    pub server: ServerConfig,

    pub network: NetworkConfig,

    pub behavior: BehaviorConfig,
}

/// Where the download service lives
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the service API, e.g. `http://localhost:8080`
    pub url: String,

    /// API key sent as the `X-Api-Key` header (optional)
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080".to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Bounded timeout for every remote call, in seconds
    pub request_timeout_secs: u64,

    /// Number of history entries requested per history poll
    pub history_limit: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            history_limit: 200,
        }
    }
}

/// Minimum allowed request timeout in seconds
const MIN_REQUEST_TIMEOUT: u64 = 1;

/// Minimum history fetch size
const MIN_HISTORY_LIMIT: usize = 1;

impl NetworkConfig {
    /// Request timeout as a `Duration`
    #[must_use]
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate network configuration values.
    /// Returns a list of warnings for invalid values that were corrected to defaults.
    /// If `strict` is true, returns Err instead of correcting values.
    pub fn validate(&mut self, strict: bool) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();
        let defaults = Self::default();

        if self.request_timeout_secs < MIN_REQUEST_TIMEOUT {
            let msg = format!(
                "network.request_timeout_secs must be at least {MIN_REQUEST_TIMEOUT} second(s), got {}",
                self.request_timeout_secs
            );
            if strict {
                return Err(msg);
            }
            warnings.push(format!(
                "{msg} - using default ({})",
                defaults.request_timeout_secs
            ));
            self.request_timeout_secs = defaults.request_timeout_secs;
        }

        if self.history_limit < MIN_HISTORY_LIMIT {
            let msg = format!(
                "network.history_limit must be at least {MIN_HISTORY_LIMIT}, got {}",
                self.history_limit
            );
            if strict {
                return Err(msg);
            }
            warnings.push(format!("{msg} - using default ({})", defaults.history_limit));
            self.history_limit = defaults.history_limit;
        }

        Ok(warnings)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Prompt before deleting history entries or clearing the history
    pub confirm_destructive: bool,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            confirm_destructive: true,
        }
    }
}

impl QmonConfig {
    /// Get the user config file path, respecting XDG_CONFIG_HOME
    ///
    /// Resolution order:
    /// 1. $XDG_CONFIG_HOME/qmon/config.toml (if XDG_CONFIG_HOME is set)
    /// 2. $HOME/.config/qmon/config.toml (if HOME is set)
    /// 3. dirs::config_dir()/qmon/config.toml (fallback using dirs crate)
    #[must_use]
    pub fn user_config_path() -> Option<std::path::PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME")
            && !xdg_config.is_empty()
        {
            return Some(std::path::PathBuf::from(xdg_config).join("qmon/config.toml"));
        }

        if let Some(home) = std::env::var_os("HOME") {
            return Some(std::path::PathBuf::from(home).join(".config/qmon/config.toml"));
        }

        dirs::config_dir().map(|dir| dir.join("qmon/config.toml"))
    }

    /// Load configuration from files and environment.
    ///
    /// Returns the config and any warnings encountered during loading. With
    /// `QMON_STRICT_CONFIG` set, the first problem is returned as an error.
    pub fn load() -> Result<(Self, Vec<String>), String> {
        let mut layers = toml::Table::new();
        let mut warnings = Vec::new();
        let strict = Self::is_strict_mode();

        Self::load_config_file(&mut layers, "/etc/qmon/config.toml", strict, &mut warnings)?;

        if let Some(user_path) = Self::user_config_path() {
            Self::load_config_file(
                &mut layers,
                &user_path.to_string_lossy(),
                strict,
                &mut warnings,
            )?;
        }

        let mut config = Self::from_layers(layers).map_err(|e| format!("Config error: {}", e))?;
        config.apply_env_overrides(strict, &mut warnings)?;

        warnings.extend(config.network.validate(strict)?);

        Ok((config, warnings))
    }

    /// Check if strict config mode is enabled via QMON_STRICT_CONFIG
    fn is_strict_mode() -> bool {
        std::env::var("QMON_STRICT_CONFIG")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// Load a config file, collecting warnings on parse errors but not on missing files.
    /// A file that fails to parse contributes no keys.
    fn load_config_file(
        layers: &mut toml::Table,
        path: &str,
        strict: bool,
        warnings: &mut Vec<String>,
    ) -> Result<(), String> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                if let Err(e) = Self::add_layer(layers, &content) {
                    let msg = format!("Config parse error in '{}': {}", path, e);
                    if strict {
                        return Err(msg);
                    }
                    warnings.push(msg);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                let msg = format!("Could not read config '{}': {}", path, e);
                if strict {
                    return Err(msg);
                }
                warnings.push(msg);
            }
        }
        Ok(())
    }

    /// Parse a TOML document into a config.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str::<QmonConfig>(content)
    }

    /// Merge one file's keys over the keys collected so far. The file must
    /// parse as a config on its own before any of its keys are taken.
    fn add_layer(layers: &mut toml::Table, content: &str) -> Result<(), toml::de::Error> {
        let table: toml::Table = toml::from_str(content)?;
        Self::parse(content)?;
        merge_tables(layers, table);
        Ok(())
    }

    /// Build the config from merged layers; absent keys take their defaults.
    fn from_layers(layers: toml::Table) -> Result<Self, toml::de::Error> {
        toml::Value::Table(layers).try_into()
    }

    fn apply_env_overrides(&mut self, strict: bool, warnings: &mut Vec<String>) -> Result<(), String> {
        if let Ok(val) = std::env::var("QMON_URL")
            && !val.is_empty()
        {
            self.server.url = val;
        }

        if let Ok(val) = std::env::var("QMON_API_KEY")
            && !val.is_empty()
        {
            self.server.api_key = Some(val);
        }

        if let Ok(val) = std::env::var("QMON_TIMEOUT") {
            match val.parse::<u64>() {
                Ok(secs) if secs >= MIN_REQUEST_TIMEOUT => {
                    self.network.request_timeout_secs = secs;
                }
                Ok(_) => Self::report_env_error(
                    strict,
                    warnings,
                    "QMON_TIMEOUT",
                    &val,
                    &format!("must be at least {} second(s)", MIN_REQUEST_TIMEOUT),
                )?,
                Err(_) => Self::report_env_error(
                    strict,
                    warnings,
                    "QMON_TIMEOUT",
                    &val,
                    "expected a positive integer (seconds)",
                )?,
            }
        }

        if let Ok(val) = std::env::var("QMON_HISTORY_LIMIT") {
            match val.parse::<usize>() {
                Ok(limit) if limit >= MIN_HISTORY_LIMIT => {
                    self.network.history_limit = limit;
                }
                _ => Self::report_env_error(
                    strict,
                    warnings,
                    "QMON_HISTORY_LIMIT",
                    &val,
                    "expected a positive integer",
                )?,
            }
        }

        Ok(())
    }

    /// Report an environment variable error; fatal in strict mode
    fn report_env_error(
        strict: bool,
        warnings: &mut Vec<String>,
        var_name: &str,
        value: &str,
        reason: &str,
    ) -> Result<(), String> {
        if strict {
            return Err(format!("Invalid value '{}' for {}: {}", value, var_name, reason));
        }
        warnings.push(format!(
            "Invalid value '{}' for {}, {} - using default",
            value, var_name, reason
        ));
        Ok(())
    }
}

/// Recursively overlay `overlay` onto `base`. Nested tables merge; any other
/// value replaces what was there.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        if let toml::Value::Table(nested) = value {
            if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                merge_tables(existing, nested);
                continue;
            }
            base.insert(key, toml::Value::Table(nested));
        } else {
            base.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_file() {
        let config = QmonConfig::parse(
            r#"
            [server]
            url = "http://nas.local:9090"

            [network]
            request_timeout_secs = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.server.url, "http://nas.local:9090");
        assert_eq!(config.server.api_key, None);
        assert_eq!(config.network.request_timeout_secs, 4);
        assert_eq!(config.network.history_limit, 200);
        assert!(config.behavior.confirm_destructive);
    }

    fn layered(files: &[&str]) -> QmonConfig {
        let mut layers = toml::Table::new();
        for content in files {
            QmonConfig::add_layer(&mut layers, content).unwrap();
        }
        QmonConfig::from_layers(layers).unwrap()
    }

    #[test]
    fn test_later_file_keeps_earlier_api_key() {
        let config = layered(&["[server]\napi_key = \"secret\"", "[server]\nurl = \"http://other\""]);
        assert_eq!(config.server.url, "http://other");
        assert_eq!(config.server.api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_later_file_without_server_keeps_url() {
        let config = layered(&[
            "[server]\nurl = \"http://nas.local:9090\"",
            "[network]\nrequest_timeout_secs = 4",
        ]);
        assert_eq!(config.server.url, "http://nas.local:9090");
        assert_eq!(config.network.request_timeout_secs, 4);
        assert_eq!(config.network.history_limit, 200);
    }

    #[test]
    fn test_later_file_overrides_only_its_keys() {
        let config = layered(&[
            "[network]\nrequest_timeout_secs = 4\nhistory_limit = 50\n[behavior]\nconfirm_destructive = false",
            "[network]\nhistory_limit = 75",
        ]);
        assert_eq!(config.network.request_timeout_secs, 4);
        assert_eq!(config.network.history_limit, 75);
        assert!(!config.behavior.confirm_destructive);
    }

    #[test]
    fn test_invalid_layer_contributes_nothing() {
        let mut layers = toml::Table::new();
        QmonConfig::add_layer(&mut layers, "[server]\nurl = \"http://nas\"").unwrap();
        assert!(QmonConfig::add_layer(&mut layers, "[network]\nhistory_limit = \"many\"").is_err());
        let config = QmonConfig::from_layers(layers).unwrap();
        assert_eq!(config.server.url, "http://nas");
        assert_eq!(config.network.history_limit, 200);
    }

    #[test]
    fn test_no_layers_gives_defaults() {
        let config = layered(&[]);
        assert_eq!(config.server.url, "http://127.0.0.1:8080");
        assert!(config.behavior.confirm_destructive);
    }

    #[test]
    fn test_network_validate_valid_values() {
        let mut network = NetworkConfig::default();
        assert!(network.validate(false).unwrap().is_empty());
    }

    #[test]
    fn test_network_validate_zero_timeout() {
        let mut network = NetworkConfig {
            request_timeout_secs: 0,
            history_limit: 0,
        };
        let warnings = network.validate(false).unwrap();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("request_timeout_secs"));
        assert_eq!(network.request_timeout_secs, 10);
        assert_eq!(network.history_limit, 200);
    }

    #[test]
    fn test_network_validate_strict_mode_error() {
        let mut network = NetworkConfig {
            request_timeout_secs: 0,
            history_limit: 10,
        };
        let err = network.validate(true).unwrap_err();
        assert!(err.contains("at least 1"));
    }

    #[test]
    fn test_report_env_error_strict() {
        let mut warnings = Vec::new();
        assert!(QmonConfig::report_env_error(true, &mut warnings, "QMON_TIMEOUT", "x", "bad").is_err());
        assert!(QmonConfig::report_env_error(false, &mut warnings, "QMON_TIMEOUT", "x", "bad").is_ok());
        assert_eq!(warnings.len(), 1);
    }
}
