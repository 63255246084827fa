//! TOML configuration for `rawkey-monitor`.
//!
//! Stored at `$XDG_CONFIG_HOME/rawkey/config.toml`, falling back to
//! `~/.config/rawkey/config.toml`.
//!
//! # What is TOML? (for beginners)
//!
//! TOML is a small configuration format built from `[sections]` of
//! `key = value` pairs, with typed strings, booleans and numbers:
//!
//! ```toml
//! [capture]
//! display = ":1"
//! master_devices_only = false
//! report_releases = true
//!
//! [logging]
//! level = "debug"
//! ```
//!
//! `serde` maps each section onto a struct ([`CaptureConfig`],
//! [`LoggingConfig`]) through `#[derive(Serialize, Deserialize)]`.
//!
//! # Serde default values
//!
//! Every field carries `#[serde(default)]` or `#[serde(default = "fn")]`, so
//! a missing file, an empty file or a file with only some keys all load.
//! Absent keys take the same values as [`MonitorConfig::default()`].  An
//! unset `display` is skipped when saving rather than written as an empty
//! string, so `$DISPLAY` keeps applying.
//!
//! # Precedence
//!
//! The monitor loads this file first and then applies command-line flags on
//! top; `RUST_LOG` overrides `[logging] level` when set.

use std::path::{Path, PathBuf};

use rawkey_core::DeviceSelector;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Neither `XDG_CONFIG_HOME` nor `HOME` is set.
    #[error("could not determine config directory")]
    NoConfigDir,

    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level monitor configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitorConfig {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// What to capture and from where.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureConfig {
    /// X display to connect to.  Absent means `$DISPLAY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    /// Subscribe on master devices only instead of all devices.
    #[serde(default)]
    pub master_devices_only: bool,
    /// Print release transitions as well as presses.
    #[serde(default = "default_true")]
    pub report_releases: bool,
}

/// `tracing` filter settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `"info"` or `"rawkey_core=trace"`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            display: None,
            master_devices_only: false,
            report_releases: default_true(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl CaptureConfig {
    pub fn device_selector(&self) -> DeviceSelector {
        if self.master_devices_only {
            DeviceSelector::AllMasterDevices
        } else {
            DeviceSelector::AllDevices
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Directory holding the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoConfigDir`] when neither `XDG_CONFIG_HOME` nor
/// `HOME` is set.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .ok_or(ConfigError::NoConfigDir)?;
    Ok(base.join("rawkey"))
}

/// Full path of the default config file.
///
/// # Errors
///
/// See [`config_dir`].
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads the config from the default location.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<MonitorConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads the config from `path`, returning defaults if the file does not
/// exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<MonitorConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(MonitorConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(path: &Path, config: &MonitorConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes `config` to the default location.
///
/// # Errors
///
/// See [`save_config_to`].
pub fn save_config(config: &MonitorConfig) -> Result<(), ConfigError> {
    save_config_to(&config_file_path()?, config)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scratch_dir() -> PathBuf {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        std::env::temp_dir().join(format!(
            "rawkey_config_test_{}_{}",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        ))
    }

    #[test]
    fn test_default_config_captures_all_devices_with_releases() {
        let cfg = MonitorConfig::default();

        assert_eq!(cfg.capture.display, None);
        assert!(cfg.capture.report_releases);
        assert_eq!(cfg.capture.device_selector(), DeviceSelector::AllDevices);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let cfg: MonitorConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, MonitorConfig::default());
    }

    #[test]
    fn test_partial_capture_section_keeps_other_defaults() {
        // Arrange
        let toml_str = r#"
[capture]
master_devices_only = true
"#;

        // Act
        let cfg: MonitorConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.capture.device_selector(), DeviceSelector::AllMasterDevices);
        assert!(cfg.capture.report_releases);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_unset_display_is_omitted_from_toml() {
        let toml_str = toml::to_string_pretty(&MonitorConfig::default()).expect("serialize");
        assert!(!toml_str.contains("display"), "None display must be omitted");
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        // Arrange
        let dir = scratch_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "[[[ not valid toml").unwrap();

        // Act
        let result = load_config_from(&path);

        // Assert
        assert!(matches!(result, Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_missing_file_returns_default() {
        let path = scratch_dir().join("absent").join("config.toml");
        let cfg = load_config_from(&path).expect("missing file is not an error");
        assert_eq!(cfg, MonitorConfig::default());
    }

    #[test]
    fn test_save_then_load_preserves_settings() {
        // Arrange
        let dir = scratch_dir();
        let path = dir.join("nested").join("config.toml");
        let mut cfg = MonitorConfig::default();
        cfg.capture.display = Some(":1".to_string());
        cfg.capture.report_releases = false;
        cfg.logging.level = "rawkey_core=trace".to_string();

        // Act
        save_config_to(&path, &cfg).expect("save");
        let loaded = load_config_from(&path).expect("load");

        // Assert
        assert_eq!(loaded, cfg);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_config_file_path_ends_with_rawkey_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(path.ends_with("rawkey/config.toml"), "got {path:?}");
        }
    }
}
