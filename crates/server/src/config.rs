//! Server configuration management

use crate::dfu::StderrPolicy;
use crate::dfu::exec::{DEFAULT_PREAMBLE_LINES, ExecOptions};
use crate::usb::BroadcasterConfig;
use anyhow::{Context, Result, anyhow};
use common::DeliveryPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub dfu: DfuSettings,
    #[serde(default)]
    pub hotplug: HotplugSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_addr: String,
    pub log_level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// How `dfu-util` is invoked
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DfuSettings {
    /// Program name or path of the tool
    pub tool: String,
    /// Banner lines discarded before any data
    pub preamble_lines: usize,
    /// Number of `-v` flags (0-3)
    pub verbosity: u8,
    pub stderr_policy: StderrPolicy,
    /// Directory holding firmware images; `~` is expanded
    pub images_dir: PathBuf,
}

impl Default for DfuSettings {
    fn default() -> Self {
        Self {
            tool: crate::dfu::command::DEFAULT_PROGRAM.to_string(),
            preamble_lines: Self::default_preamble_lines(),
            verbosity: 0,
            stderr_policy: StderrPolicy::default(),
            images_dir: Self::default_images_dir(),
        }
    }
}

impl DfuSettings {
    fn default_preamble_lines() -> usize {
        DEFAULT_PREAMBLE_LINES
    }

    fn default_images_dir() -> PathBuf {
        if let Some(data_dir) = dirs::data_local_dir() {
            data_dir.join("dfu-server").join("images")
        } else {
            PathBuf::from(".local/share/dfu-server/images")
        }
    }

    pub fn exec_options(&self) -> ExecOptions {
        ExecOptions {
            preamble_lines: self.preamble_lines,
            stderr_policy: self.stderr_policy,
        }
    }

    /// Image directory with `~` expanded
    pub fn images_dir(&self) -> PathBuf {
        let raw = self.images_dir.to_string_lossy();
        PathBuf::from(shellexpand::tilde(&raw).into_owned())
    }
}

/// Delivery behaviour for full subscriber queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryMode {
    #[default]
    BestEffort,
    Backpressure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HotplugSettings {
    pub enabled: bool,
    /// 4-digit hex vendor id, or `*` for all vendors
    pub vendor_id: String,
    pub poll_timeout_ms: u64,
    pub channel_capacity: usize,
    pub delivery: DeliveryMode,
    pub backpressure_timeout_ms: u64,
}

impl Default for HotplugSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            vendor_id: "0483".to_string(),
            poll_timeout_ms: Self::default_poll_timeout_ms(),
            channel_capacity: Self::default_channel_capacity(),
            delivery: DeliveryMode::default(),
            backpressure_timeout_ms: Self::default_backpressure_timeout_ms(),
        }
    }
}

impl HotplugSettings {
    fn default_poll_timeout_ms() -> u64 {
        100
    }

    fn default_channel_capacity() -> usize {
        32
    }

    fn default_backpressure_timeout_ms() -> u64 {
        250
    }

    /// Parsed vendor filter; `None` means no filtering
    pub fn vendor_filter(&self) -> Result<Option<u16>> {
        if self.vendor_id == "*" {
            return Ok(None);
        }
        if self.vendor_id.len() != 4 || !self.vendor_id.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(anyhow!(
                "Invalid vendor_id '{}', expected 4 hex digits (e.g., '0483') or '*'",
                self.vendor_id
            ));
        }
        u16::from_str_radix(&self.vendor_id, 16)
            .map(Some)
            .map_err(|e| anyhow!("Invalid vendor_id '{}': {}", self.vendor_id, e))
    }

    pub fn broadcaster_config(&self) -> Result<BroadcasterConfig> {
        let delivery = match self.delivery {
            DeliveryMode::BestEffort => DeliveryPolicy::BestEffort,
            DeliveryMode::Backpressure => DeliveryPolicy::Backpressure {
                timeout: Duration::from_millis(self.backpressure_timeout_ms),
            },
        };

        Ok(BroadcasterConfig {
            vendor_id: self.vendor_filter()?,
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            channel_capacity: self.channel_capacity,
            delivery,
        })
    }
}

impl ServerConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).into_owned())
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/dfu-server/server.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: ServerConfig = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

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
            config_dir.join("dfu-server").join("server.toml")
        } else {
            PathBuf::from(".config/dfu-server/server.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.server.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.server.log_level,
                valid_levels.join(", ")
            ));
        }

        self.server
            .bind_addr
            .parse::<std::net::SocketAddr>()
            .map_err(|e| anyhow!("Invalid bind_addr '{}': {}", self.server.bind_addr, e))?;

        if self.dfu.tool.trim().is_empty() {
            return Err(anyhow!("dfu.tool must not be empty"));
        }

        if self.dfu.verbosity > crate::dfu::command::MAX_VERBOSITY {
            return Err(anyhow!(
                "Invalid verbosity {}, must be at most {}",
                self.dfu.verbosity,
                crate::dfu::command::MAX_VERBOSITY
            ));
        }

        self.hotplug.vendor_filter()?;

        if self.hotplug.poll_timeout_ms == 0 {
            return Err(anyhow!("hotplug.poll_timeout_ms must be greater than 0"));
        }

        if self.hotplug.channel_capacity == 0 {
            return Err(anyhow!("hotplug.channel_capacity must be greater than 0"));
        }

        Ok(())
    }
}
