//! Driver configuration management

use crate::driver::{DEFAULT_STOP_TIMEOUT, InstallConfig};
use crate::hal::{Port, SignalId};
use crate::phy::PhyConfig;
use crate::task::TaskConfig;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_DIR: &str = "usbd-driver";
const CONFIG_FILE: &str = "driver.toml";
const SYSTEM_CONFIG_DIR: &str = "/etc";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverSettings {
    pub driver: GeneralSettings,
    #[serde(default)]
    pub phy: PhySettings,
    #[serde(default)]
    pub task: TaskSettings,
    /// Simulated target used by the CLI
    #[serde(default)]
    pub simulation: SimulationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    /// USB peripheral to install on
    #[serde(default)]
    pub port: Port,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "GeneralSettings::default_log_level")]
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            port: Port::default(),
            log_level: Self::default_log_level(),
        }
    }
}

impl GeneralSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhySettings {
    /// PHY is set up outside the driver
    #[serde(default)]
    pub skip_setup: bool,
    #[serde(default)]
    pub self_powered: bool,
    /// Pin carrying the VBUS level of a self-powered device
    #[serde(default)]
    pub vbus_monitor_pin: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSettings {
    #[serde(default = "TaskSettings::default_stack_size")]
    pub stack_size: usize,
    #[serde(default = "TaskSettings::default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub affinity: Option<usize>,
    #[serde(default = "TaskSettings::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long uninstall waits for the event task
    #[serde(default = "TaskSettings::default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            stack_size: Self::default_stack_size(),
            priority: Self::default_priority(),
            affinity: None,
            poll_interval_ms: Self::default_poll_interval_ms(),
            stop_timeout_ms: Self::default_stop_timeout_ms(),
        }
    }
}

impl TaskSettings {
    fn default_stack_size() -> usize {
        TaskConfig::default().stack_size
    }

    fn default_priority() -> u8 {
        TaskConfig::default().priority
    }

    fn default_poll_interval_ms() -> u64 {
        TaskConfig::default().poll_interval.as_millis() as u64
    }

    fn default_stop_timeout_ms() -> u64 {
        DEFAULT_STOP_TIMEOUT.as_millis() as u64
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSettings {
    /// Detach/attach rounds
    #[serde(default = "SimulationSettings::default_rounds")]
    pub rounds: u32,
    /// Pause between rounds in milliseconds
    #[serde(default = "SimulationSettings::default_round_delay_ms")]
    pub round_delay_ms: u64,
    /// How long to wait for each mount/unmount
    #[serde(default = "SimulationSettings::default_stage_timeout_ms")]
    pub stage_timeout_ms: u64,
    #[serde(default = "SimulationSettings::default_pin_count")]
    pub pin_count: u16,
    /// Simulate a part whose port 1 is high-speed capable
    #[serde(default)]
    pub high_speed: bool,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            rounds: Self::default_rounds(),
            round_delay_ms: Self::default_round_delay_ms(),
            stage_timeout_ms: Self::default_stage_timeout_ms(),
            pin_count: Self::default_pin_count(),
            high_speed: false,
        }
    }
}

impl SimulationSettings {
    fn default_rounds() -> u32 {
        10
    }

    fn default_round_delay_ms() -> u64 {
        10
    }

    fn default_stage_timeout_ms() -> u64 {
        1000
    }

    fn default_pin_count() -> u16 {
        49
    }
}

impl DriverSettings {
    /// Load settings from `path`, or from the first existing well-known
    /// location when `path` is `None`
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => Self::search_paths()
                .into_iter()
                .find(|candidate| candidate.is_file())
                .ok_or_else(|| anyhow!("No usbd-driver config file in the search path"))?,
        };

        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let settings: DriverSettings = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        settings.validate()?;

        tracing::info!("Driver settings loaded from {}", path.display());
        Ok(settings)
    }

    /// Like [`DriverSettings::load`] with no path, falling back to defaults
    pub fn load_or_default() -> Self {
        Self::load(None).unwrap_or_else(|e| {
            tracing::warn!("{:#}; using built-in driver settings", e);
            Self::default()
        })
    }

    /// Write these settings as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }
        fs::write(path, text)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Driver settings written to {}", path.display());
        Ok(())
    }

    /// Per-user settings file
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(CONFIG_DIR)
            .join(CONFIG_FILE)
    }

    fn search_paths() -> [PathBuf; 2] {
        [
            Self::default_path(),
            Path::new(SYSTEM_CONFIG_DIR).join(CONFIG_DIR).join(CONFIG_FILE),
        ]
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.driver.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.driver.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.task.stack_size == 0 {
            return Err(anyhow!("Task stack size must be greater than zero"));
        }
        if self.task.poll_interval_ms == 0 {
            return Err(anyhow!("Task poll interval must be greater than zero"));
        }
        if self.task.stop_timeout_ms == 0 {
            return Err(anyhow!("Task stop timeout must be greater than zero"));
        }

        if !self.phy.self_powered
            && !self.phy.skip_setup
            && let Some(pin) = self.phy.vbus_monitor_pin
        {
            tracing::warn!(
                "vbus_monitor_pin {} is ignored for a bus-powered device",
                pin
            );
        }

        Ok(())
    }

    /// Runtime install parameters, serving the build-time default descriptors
    pub fn install_config(&self) -> InstallConfig {
        InstallConfig {
            port: self.driver.port,
            phy: PhyConfig {
                skip_setup: self.phy.skip_setup,
                self_powered: self.phy.self_powered,
                vbus_monitor_signal: self.phy.vbus_monitor_pin.map(SignalId),
            },
            task: TaskConfig {
                stack_size: self.task.stack_size,
                priority: self.task.priority,
                affinity: self.task.affinity,
                poll_interval: Duration::from_millis(self.task.poll_interval_ms),
            },
            descriptors: None,
        }
    }
}

/// Load settings from a user-supplied path, expanding a leading `~`
pub fn load_config(path: &str) -> Result<DriverSettings> {
    let expanded = shellexpand::tilde(path);
    DriverSettings::load(Some(PathBuf::from(expanded.as_ref())))
}
