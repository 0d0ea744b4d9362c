use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::env;
use crate::error::ConfigError;
use crate::i18n::Language;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChipType {
    #[default]
    Esp32,
    Esp32s3,
}

impl ChipType {
    pub const fn as_str(self) -> &'static str {
        match self {
            ChipType::Esp32 => "esp32",
            ChipType::Esp32s3 => "esp32s3",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "esp32" => Some(ChipType::Esp32),
            "esp32s3" => Some(ChipType::Esp32s3),
            _ => None,
        }
    }
}

impl fmt::Display for ChipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User preferences persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub firmware_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub send_tone_on_connect: bool,
    pub ask_firmware_path_each_time: bool,
    pub ask_backup_path_each_time: bool,
    pub chip_type: ChipType,
    pub graphic_progress: bool,
    pub language: Language,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            firmware_dir: env::firmware_dir(),
            backup_dir: env::backups_dir(),
            send_tone_on_connect: true,
            ask_firmware_path_each_time: false,
            ask_backup_path_each_time: false,
            chip_type: ChipType::Esp32,
            graphic_progress: true,
            language: Language::Russian,
        }
    }
}

pub const SETTING_KEYS: [&str; 8] = [
    "firmware_dir",
    "backup_dir",
    "send_tone_on_connect",
    "ask_firmware_path_each_time",
    "ask_backup_path_each_time",
    "chip_type",
    "graphic_progress",
    "language",
];

impl Settings {
    /// Overwrite fields from a JSON object, keeping the current value for any
    /// key that is absent or carries the wrong type.
    fn merge_json(&mut self, data: &Map<String, Value>) {
        if let Some(dir) = data.get("firmware_dir").and_then(Value::as_str) {
            self.firmware_dir = PathBuf::from(dir);
        }
        if let Some(dir) = data.get("backup_dir").and_then(Value::as_str) {
            self.backup_dir = PathBuf::from(dir);
        }
        if let Some(flag) = data.get("send_tone_on_connect").and_then(Value::as_bool) {
            self.send_tone_on_connect = flag;
        }
        if let Some(flag) = data
            .get("ask_firmware_path_each_time")
            .and_then(Value::as_bool)
        {
            self.ask_firmware_path_each_time = flag;
        }
        if let Some(flag) = data
            .get("ask_backup_path_each_time")
            .and_then(Value::as_bool)
        {
            self.ask_backup_path_each_time = flag;
        }
        if let Some(chip) = data
            .get("chip_type")
            .and_then(Value::as_str)
            .and_then(ChipType::from_name)
        {
            self.chip_type = chip;
        }
        if let Some(flag) = data.get("graphic_progress").and_then(Value::as_bool) {
            self.graphic_progress = flag;
        }
        if let Some(language) = data
            .get("language")
            .and_then(Value::as_str)
            .and_then(Language::from_code)
        {
            self.language = language;
        }
    }

    /// Apply a single `key = value` update coming from the user.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: key.to_owned(),
            value: value.to_owned(),
        };
        match key {
            "firmware_dir" | "backup_dir" => {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    return Err(invalid());
                }
                let path = PathBuf::from(trimmed);
                if key == "firmware_dir" {
                    self.firmware_dir = path;
                } else {
                    self.backup_dir = path;
                }
            }
            "send_tone_on_connect" => {
                self.send_tone_on_connect = parse_flag(value).ok_or_else(invalid)?;
            }
            "ask_firmware_path_each_time" => {
                self.ask_firmware_path_each_time = parse_flag(value).ok_or_else(invalid)?;
            }
            "ask_backup_path_each_time" => {
                self.ask_backup_path_each_time = parse_flag(value).ok_or_else(invalid)?;
            }
            "graphic_progress" => {
                self.graphic_progress = parse_flag(value).ok_or_else(invalid)?;
            }
            "chip_type" => {
                self.chip_type = ChipType::from_name(value).ok_or_else(invalid)?;
            }
            "language" => {
                self.language = Language::from_code(value).ok_or_else(invalid)?;
            }
            other => return Err(ConfigError::UnknownKey(other.to_owned())),
        }
        Ok(())
    }

    /// Render `key = value` lines in the persisted key order.
    pub fn describe(&self) -> Vec<(&'static str, String)> {
        vec![
            ("firmware_dir", self.firmware_dir.display().to_string()),
            ("backup_dir", self.backup_dir.display().to_string()),
            ("send_tone_on_connect", self.send_tone_on_connect.to_string()),
            (
                "ask_firmware_path_each_time",
                self.ask_firmware_path_each_time.to_string(),
            ),
            (
                "ask_backup_path_each_time",
                self.ask_backup_path_each_time.to_string(),
            ),
            ("chip_type", self.chip_type.to_string()),
            ("graphic_progress", self.graphic_progress.to_string()),
            ("language", self.language.code().to_owned()),
        ]
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Reads and writes the settings document at a fixed path.
#[derive(Clone, Debug)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new() -> Self {
        // Best-effort directory creation; failures are surfaced on write.
        let _ = env::ensure_base_dirs();
        Self::at(env::settings_path())
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Never fails: anything unreadable falls back to defaults.
    pub fn load(&self) -> Settings {
        let mut settings = Settings::default();
        match self.read_document() {
            Ok(Some(data)) => settings.merge_json(&data),
            Ok(None) => debug!("settings: no file at {}, using defaults", self.path.display()),
            Err(err) => warn!("settings: ignoring unreadable settings ({err})"),
        }
        settings
    }

    fn read_document(&self) -> Result<Option<Map<String, Value>>, ConfigError> {
        if !self.path.is_file() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
            path: self.path.clone(),
            source,
        })?;
        match serde_json::from_str::<Value>(&raw)? {
            Value::Object(map) => Ok(Some(map)),
            _ => Ok(None),
        }
    }

    fn try_save(&self, settings: &Settings) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let body = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, body).map_err(|source| ConfigError::Write {
            path: self.path.clone(),
            source,
        })
    }

    /// Replace the stored document with defaults.
    pub fn reset(&self) -> Settings {
        let defaults = Settings::default();
        self.save(&defaults);
        defaults
    }

    /// Persist the full document; failures are logged, not surfaced.
    pub fn save(&self, settings: &Settings) {
        if let Err(err) = self.try_save(settings) {
            warn!("settings: failed to persist ({err})");
        }
    }
}
