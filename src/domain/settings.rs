use crate::domain::models::{AddressType, IoCapability};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "warn".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "gatt_recon".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_adapter")]
    pub adapter: String,
    #[serde(default)]
    pub address_type: AddressType,
    #[serde(default)]
    pub io_capability: IoCapability,
    #[serde(default = "default_false")]
    pub include_descriptors: bool,

    // Timeouts
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_agent_registration_timeout_ms")]
    pub agent_registration_timeout_ms: u64,

    // Cleanup
    #[serde(default = "default_true")]
    pub revoke_trust: bool,

    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            adapter: default_adapter(),
            address_type: AddressType::default(),
            io_capability: IoCapability::default(),
            include_descriptors: false,
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            agent_registration_timeout_ms: default_agent_registration_timeout_ms(),
            revoke_trust: true,
            log_settings: LogSettings::default(),
        }
    }
}

fn default_adapter() -> String {
    "hci0".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    20_000
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_agent_registration_timeout_ms() -> u64 {
    5_000
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
    load_error: Option<String>,
}

impl SettingsService {
    /// Load from the user config directory, falling back to defaults.
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::from_path(settings_path))
    }

    pub fn from_path(settings_path: PathBuf) -> Self {
        let (settings, load_error) = match Self::load_from_file(&settings_path) {
            Ok(settings) => (settings, None),
            // A missing file is the first run, not an error.
            Err(_) if !settings_path.exists() => (Settings::default(), None),
            Err(e) => (Settings::default(), Some(e.to_string())),
        };

        Self {
            settings,
            settings_path,
            load_error,
        }
    }

    /// Why an existing settings file was replaced by defaults, if it was.
    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("gatt_recon");
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(dir) = self.settings_path.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}
