//! Configuration file support for invflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (INVFLASH_*)
//! 3. Local config file (./invflash.toml)
//! 4. Global config file (~/.config/invflash/config.toml)
//!
//! ```toml
//! [port]
//! serial = "/dev/ttyUSB0"
//!
//! [update]
//! target = "dsp"
//! timeout_secs = 10
//!
//! [images]
//! arm = "firmware/arm/2.22.0.bin"
//! dsp = "firmware/dsp/3.45.0.bin"
//! catalog = "firmware/catalog.json"
//! ```

use directories::ProjectDirs;
use invflash::TargetType;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the local configuration file.
pub const LOCAL_CONFIG_FILE: &str = "invflash.toml";

/// Serial port configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Remembered serial port (e.g., "/dev/ttyUSB0" or "COM3"), reopened
    /// without prompting.
    pub serial: Option<String>,
}

/// Update defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSection {
    /// Default target ("arm" or "dsp").
    pub target: Option<String>,
    /// Per-step response timeout in seconds.
    pub timeout_secs: Option<u64>,
}

/// Firmware image locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImagesConfig {
    /// ARM image file.
    pub arm: Option<PathBuf>,
    /// DSP image file.
    pub dsp: Option<PathBuf>,
    /// Firmware catalog (JSON).
    pub catalog: Option<PathBuf>,
}

impl ImagesConfig {
    /// Image file configured for `target`.
    pub fn for_target(&self, target: TargetType) -> Option<&PathBuf> {
        match target {
            TargetType::Arm => self.arm.as_ref(),
            TargetType::Dsp => self.dsp.as_ref(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Update configuration.
    #[serde(default)]
    pub update: UpdateSection,
    /// Image configuration.
    #[serde(default)]
    pub images: ImagesConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "invflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.port.serial.is_some() {
            self.port.serial = other.port.serial;
        }

        if other.update.target.is_some() {
            self.update.target = other.update.target;
        }
        if other.update.timeout_secs.is_some() {
            self.update.timeout_secs = other.update.timeout_secs;
        }

        if other.images.arm.is_some() {
            self.images.arm = other.images.arm;
        }
        if other.images.dsp.is_some() {
            self.images.dsp = other.images.dsp;
        }
        if other.images.catalog.is_some() {
            self.images.catalog = other.images.catalog;
        }
    }

    /// Configured default target, if valid.
    pub fn target(&self) -> Option<TargetType> {
        let raw = self.update.target.as_deref()?;
        match raw.parse() {
            Ok(target) => Some(target),
            Err(e) => {
                warn!("Ignoring configured target: {e}");
                None
            },
        }
    }

    /// Remember `serial` as the port to reopen without prompting.
    ///
    /// Written to the local config if one exists, otherwise to the global one.
    pub fn remember_port(&mut self, serial: &str) -> anyhow::Result<PathBuf> {
        let path = if Path::new(LOCAL_CONFIG_FILE).exists() {
            PathBuf::from(LOCAL_CONFIG_FILE)
        } else if let Some(global_path) = Self::global_config_path() {
            if let Some(dir) = global_path.parent() {
                fs::create_dir_all(dir)?;
            }
            global_path
        } else {
            PathBuf::from(LOCAL_CONFIG_FILE)
        };
        self.remember_port_in(serial, &path)?;
        Ok(path)
    }

    /// Update the `[port]` section of the file at `path`, keeping the rest.
    fn remember_port_in(&mut self, serial: &str, path: &Path) -> anyhow::Result<()> {
        self.port.serial = Some(serial.to_string());

        let mut on_disk = Self::load_from_file(path).unwrap_or_default();
        on_disk.port.serial = Some(serial.to_string());

        let content = toml::to_string_pretty(&on_disk)?;
        fs::write(path, content)?;
        info!("Saved port {serial} to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.port.serial.is_none());
        assert!(config.update.target.is_none());
        assert!(config.update.timeout_secs.is_none());
        assert!(config.images.arm.is_none());
        assert!(config.images.catalog.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(
            r#"
            [port]
            serial = "/dev/ttyUSB1"

            [update]
            target = "dspType"
            timeout_secs = 5

            [images]
            arm = "arm.bin"
            catalog = "catalog.json"
            "#,
        )
        .unwrap();

        assert_eq!(config.port.serial.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(config.target(), Some(TargetType::Dsp));
        assert_eq!(config.update.timeout_secs, Some(5));
        assert_eq!(
            config.images.for_target(TargetType::Arm),
            Some(&PathBuf::from("arm.bin"))
        );
        assert_eq!(config.images.for_target(TargetType::Dsp), None);
    }

    #[test]
    fn test_invalid_target_ignored() {
        let mut config = Config::default();
        config.update.target = Some("avr".into());
        assert_eq!(config.target(), None);
    }

    #[test]
    fn test_merge_overrides_only_set_fields() {
        let mut base = Config::default();
        base.port.serial = Some("/dev/ttyUSB0".into());
        base.images.arm = Some("global-arm.bin".into());

        let mut local = Config::default();
        local.images.arm = Some("local-arm.bin".into());
        local.update.timeout_secs = Some(3);

        base.merge(local);
        assert_eq!(base.port.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.images.arm, Some(PathBuf::from("local-arm.bin")));
        assert_eq!(base.update.timeout_secs, Some(3));
    }

    #[test]
    fn test_load_from_path_invalid_toml_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "invalid toml [[[").unwrap();

        let config = Config::load_from_path(&path);
        assert!(config.port.serial.is_none());
    }

    #[test]
    fn test_remember_port_keeps_other_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCAL_CONFIG_FILE);
        fs::write(&path, "[images]\ndsp = \"dsp.bin\"\n").unwrap();

        let mut config = Config::default();
        config.remember_port_in("COM7", &path).unwrap();
        assert_eq!(config.port.serial.as_deref(), Some("COM7"));

        let saved = Config::load_from_path(&path);
        assert_eq!(saved.port.serial.as_deref(), Some("COM7"));
        assert_eq!(saved.images.dsp, Some(PathBuf::from("dsp.bin")));
    }
}
