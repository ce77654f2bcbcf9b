//! Configuration file support for efm8flash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (EFM8FLASH_*)
//! 3. Local config file (./efm8flash.toml)
//! 4. Global config file (~/.config/efm8flash/config.toml)
//!
//! Layers 1 and 2 are handled by clap; this module merges 3 and 4.

use {
    crate::CliError,
    anyhow::Result,
    directories::ProjectDirs,
    efm8flash::device,
    log::{debug, warn},
    serde::{Deserialize, Serialize},
    std::{
        fs,
        path::{Path, PathBuf},
    },
};

/// Local configuration file name, looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "efm8flash.toml";

/// Bootloader selection defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// USB vendor id.
    pub vid: Option<u16>,
    /// USB product id (0 matches any).
    pub pid: Option<u16>,
    /// Expected part name.
    pub mcu: Option<String>,
}

/// UART bootloader defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UartConfig {
    /// Serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: Option<String>,
    /// Baud rate.
    pub baud: Option<u32>,
    /// Device family name (ub1, ub2, ub3).
    pub family: Option<String>,
}

/// Flash defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Do not start the application after flashing.
    #[serde(default)]
    pub no_reset: bool,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Bootloader selection.
    #[serde(default)]
    pub device: DeviceConfig,
    /// UART transport.
    #[serde(default)]
    pub uart: UartConfig,
    /// Flashing.
    #[serde(default)]
    pub flash: FlashConfig,
}

impl Config {
    /// Load configuration from the global and local files.
    ///
    /// Missing or malformed files are skipped with a warning.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    ///
    /// Unlike the default lookup, an explicitly named file must exist and parse.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("Cannot read config file {}: {e}", path.display()))
        })?;
        let config = Self::parse(&content).map_err(|e| {
            CliError::Config(format!("Invalid config file {}: {e}", path.display()))
        })?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load configuration from a specific file, warning on failure.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match Self::parse(&content) {
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
        ProjectDirs::from("", "", "efm8flash").map(|dirs| {
            dirs.config_dir()
                .to_path_buf()
        })
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; set values in `other` win.
    fn merge(&mut self, other: Self) {
        // Device
        if other.device.vid.is_some() {
            self.device.vid = other.device.vid;
        }
        if other.device.pid.is_some() {
            self.device.pid = other.device.pid;
        }
        if other.device.mcu.is_some() {
            self.device.mcu = other.device.mcu;
        }

        // UART
        if other.uart.port.is_some() {
            self.uart.port = other.uart.port;
        }
        if other.uart.baud.is_some() {
            self.uart.baud = other.uart.baud;
        }
        if other.uart.family.is_some() {
            self.uart.family = other.uart.family;
        }

        // Flash
        if other.flash.no_reset {
            self.flash.no_reset = true;
        }
    }

    /// Reject values that parse as TOML but name nothing we know.
    pub fn validate(&self) -> Result<()> {
        if let Some(family) = &self.uart.family {
            if device::family_by_name(family).is_none() {
                return Err(CliError::Config(format!(
                    "Unknown device family '{family}' in configuration (expected ub1, ub2 or ub3)"
                ))
                .into());
            }
        }
        if let Some(mcu) = &self.device.mcu {
            if device::find_part(mcu).is_none() {
                return Err(
                    CliError::Config(format!("Unknown part '{mcu}' in configuration")).into(),
                );
            }
        }
        if self.uart.baud == Some(0) {
            return Err(CliError::Config("Baud rate in configuration must not be 0".into()).into());
        }
        Ok(())
    }
}
