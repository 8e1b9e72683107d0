use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::infrastructure::bluetooth::protocol;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            console_logging_enabled: default_true(),
            file_logging_enabled: default_false(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
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
    "headware_link".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Helmet BLE identity
    #[serde(default = "default_service_uuid")]
    pub helmet_service_uuid: String,
    #[serde(default = "default_data_char_uuid")]
    pub helmet_data_char_uuid: String,
    #[serde(default = "default_name_prefix")]
    pub device_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_all_devices: bool,

    // Optional connect deadline in milliseconds. Unset leaves attempts
    // pending until the platform reports an outcome.
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,

    // Helmet memory
    #[serde(default)]
    pub known_device_addresses: Vec<String>,
    #[serde(default)]
    pub last_connected_address: Option<String>,

    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            helmet_service_uuid: default_service_uuid(),
            helmet_data_char_uuid: default_data_char_uuid(),
            device_name_prefix: default_name_prefix(),
            show_all_devices: false,
            connect_timeout_ms: None,
            known_device_addresses: Vec::new(),
            last_connected_address: None,
            log_settings: LogSettings::default(),
        }
    }
}

fn default_service_uuid() -> String {
    protocol::HELMET_SERVICE_UUID.to_string()
}
fn default_data_char_uuid() -> String {
    protocol::HELMET_DATA_CHAR_UUID.to_string()
}
fn default_name_prefix() -> String {
    protocol::HELMET_NAME_PREFIX.to_string()
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();

        Ok(Self {
            settings,
            settings_path,
        })
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("HeadwareLink");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &PathBuf) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Record a successful helmet registration so the next run can offer
    /// the same helmet without a fresh scan.
    pub fn remember_connection(&mut self, address: &str) -> anyhow::Result<()> {
        if !self
            .settings
            .known_device_addresses
            .iter()
            .any(|known| known == address)
        {
            self.settings
                .known_device_addresses
                .push(address.to_string());
        }
        self.settings.last_connected_address = Some(address.to_string());
        self.save()
    }
}
