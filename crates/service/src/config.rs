//! Tool configuration management

use crate::usb::DeviceFilter;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolConfig {
    #[serde(default)]
    pub general: GeneralSettings,
    #[serde(default)]
    pub usb: UsbSettings,
    /// External programs behind each operation
    #[serde(default)]
    pub commands: CommandSettings,
    #[serde(default)]
    pub execution: ExecutionSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    #[serde(default = "GeneralSettings::default_log_level")]
    pub log_level: String,
    /// Language of console messages (en, fr)
    #[serde(default = "GeneralSettings::default_locale")]
    pub locale: String,
    /// Optional log file, in addition to stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            locale: Self::default_locale(),
            log_file: None,
        }
    }
}

impl GeneralSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }

    fn default_locale() -> String {
        "en".to_string()
    }

    /// Log file path with `~` expanded
    pub fn log_file_path(&self) -> Option<PathBuf> {
        self.log_file.as_ref().map(|p| expand_path(p))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsbSettings {
    /// VID:PID patterns of devices to list (empty = all)
    #[serde(default)]
    pub filters: Vec<String>,
    /// Hide devices without a mass storage interface
    #[serde(default)]
    pub mass_storage_only: bool,
}

impl UsbSettings {
    /// Parsed filter patterns
    pub fn device_filters(&self) -> common::Result<Vec<DeviceFilter>> {
        self.filters.iter().map(|f| f.parse()).collect()
    }
}

/// Program names used by the operation registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSettings {
    /// Privilege elevation wrapper; empty runs tools directly
    #[serde(default = "CommandSettings::default_elevate")]
    pub elevate: String,
    #[serde(default = "CommandSettings::default_fsck")]
    pub fsck: String,
    #[serde(default = "CommandSettings::default_mkfs")]
    pub mkfs: String,
    #[serde(default = "CommandSettings::default_badblocks")]
    pub badblocks: String,
    #[serde(default = "CommandSettings::default_copy")]
    pub copy: String,
    /// Filesystem used by `format` when none is given
    #[serde(default = "CommandSettings::default_filesystem")]
    pub default_filesystem: String,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            elevate: Self::default_elevate(),
            fsck: Self::default_fsck(),
            mkfs: Self::default_mkfs(),
            badblocks: Self::default_badblocks(),
            copy: Self::default_copy(),
            default_filesystem: Self::default_filesystem(),
        }
    }
}

impl CommandSettings {
    fn default_elevate() -> String {
        "sudo".to_string()
    }

    fn default_fsck() -> String {
        "fsck".to_string()
    }

    fn default_mkfs() -> String {
        "mkfs".to_string()
    }

    fn default_badblocks() -> String {
        "badblocks".to_string()
    }

    fn default_copy() -> String {
        "cp".to_string()
    }

    fn default_filesystem() -> String {
        "vfat".to_string()
    }

    /// Elevation wrapper, `None` when tools run unwrapped
    pub fn elevation(&self) -> Option<&str> {
        let wrapper = self.elevate.trim();
        (!wrapper.is_empty()).then_some(wrapper)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionSettings {
    /// Kill external commands after this many seconds (0 = wait forever)
    #[serde(default)]
    pub timeout_secs: u64,
}

impl ExecutionSettings {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_with_override(None)
    }

    /// Timeout with `override_secs` (from the command line) taking precedence
    ///
    /// Zero means no timeout from either source.
    pub fn timeout_with_override(&self, override_secs: Option<u64>) -> Option<Duration> {
        let secs = override_secs.unwrap_or(self.timeout_secs);
        (secs > 0).then(|| Duration::from_secs(secs))
    }
}

impl ToolConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            expand_path(&p)
        } else {
            // Try standard locations in order
            let candidates = vec![Self::default_path(), PathBuf::from("/etc/usb-repair/config.toml")];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn parse(content: &str) -> Result<Self> {
        let config: ToolConfig = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Failed to load config: {:#}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-repair").join("config.toml")
        } else {
            PathBuf::from(".config/usb-repair/config.toml")
        }
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.general.log_level,
                valid_levels.join(", ")
            ));
        }

        let valid_locales = ["en", "fr"];
        if !valid_locales.contains(&self.general.locale.as_str()) {
            return Err(anyhow!(
                "Invalid locale '{}', must be one of: {}",
                self.general.locale,
                valid_locales.join(", ")
            ));
        }

        self.usb.device_filters()?;

        let programs = [
            ("fsck", &self.commands.fsck),
            ("mkfs", &self.commands.mkfs),
            ("badblocks", &self.commands.badblocks),
            ("copy", &self.commands.copy),
        ];
        for (name, program) in programs {
            if program.trim().is_empty() {
                return Err(anyhow!("Program for '{}' must not be empty", name));
            }
        }

        if self.commands.default_filesystem.trim().is_empty() {
            return Err(anyhow!("default_filesystem must not be empty"));
        }

        Ok(())
    }
}

/// Expand a leading `~` in user-supplied paths
pub fn expand_path(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(s) => PathBuf::from(shellexpand::tilde(s).as_ref()),
        None => path.to_path_buf(),
    }
}
