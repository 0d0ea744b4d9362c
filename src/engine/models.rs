use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Extension every flashable asset carries.
pub const FIRMWARE_EXTENSION: &str = ".bin";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub name: String,
    pub download_url: String,
}

impl Asset {
    pub fn is_firmware(&self) -> bool {
        self.name.to_lowercase().ends_with(FIRMWARE_EXTENSION)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub name: String,
    pub tag: String,
    pub prerelease: bool,
    pub assets: Vec<Asset>,
}

/// A serial port as reported by the OS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Port {
    pub device: String,
    pub description: String,
}

impl Port {
    pub fn label(&self) -> String {
        format!("{} - {}", self.device, self.description)
    }
}

/// Write a downloaded firmware image, optionally erasing first.
#[derive(Clone, Debug)]
pub struct FlashJob {
    pub port: String,
    pub firmware: PathBuf,
    pub erase: bool,
}

/// Read the whole flash into `destination`.
///
/// `size` is filled in by the probe when the job runs; a preset value skips
/// detection.
#[derive(Clone, Debug)]
pub struct BackupJob {
    pub port: String,
    pub size: Option<u64>,
    pub destination: PathBuf,
    pub offset: u64,
}

#[derive(Clone, Debug)]
pub struct RestoreJob {
    pub port: String,
    pub image: PathBuf,
}
