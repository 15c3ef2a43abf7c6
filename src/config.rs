use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    path::{Path, PathBuf},
    time::Duration,
};

use log::{debug, warn};

use crate::{
    errors::PitwallError,
    toast::DEFAULT_TOAST_DURATION_MS,
    view::{SkillLevel, UnitPreference, View},
};

const CONFIG_FILE_NAME: &str = "config.json";

pub const UPLOAD_DONE_RESET_MS: u64 = 1500;
pub const UPLOAD_ERROR_RESET_MS: u64 = 3000;
pub const REPORT_POLL_INTERVAL_MS: u64 = 2000;
pub const QUESTION_FOCUS_DELAY_MS: u64 = 100;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub skill_level: SkillLevel,
    pub units: UnitPreference,
    pub last_view: View,
    /// Directory used by the file backed data service
    pub data_dir: Option<PathBuf>,
    pub toast_duration_ms: u64,
    pub upload_done_reset_ms: u64,
    pub upload_error_reset_ms: u64,
    pub report_poll_interval_ms: u64,
    pub question_focus_delay_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            skill_level: SkillLevel::default(),
            units: UnitPreference::default(),
            last_view: View::default(),
            data_dir: None,
            toast_duration_ms: DEFAULT_TOAST_DURATION_MS,
            upload_done_reset_ms: UPLOAD_DONE_RESET_MS,
            upload_error_reset_ms: UPLOAD_ERROR_RESET_MS,
            report_poll_interval_ms: REPORT_POLL_INTERVAL_MS,
            question_focus_delay_ms: QUESTION_FOCUS_DELAY_MS,
        }
    }
}

impl AppConfig {
    pub fn default_path() -> Result<PathBuf, PitwallError> {
        Ok(dirs::config_dir()
            .ok_or(PitwallError::NoConfigDir)?
            .join("pitwall")
            .join(CONFIG_FILE_NAME))
    }

    /// Load the config from the user's config directory, if one was saved.
    pub fn from_local_file() -> Option<Self> {
        let config_path = Self::default_path().ok()?;
        Self::from_path(&config_path)
    }

    /// Load the config at `path`. A missing or unreadable file yields `None`.
    pub fn from_path(path: &Path) -> Option<Self> {
        if !path.exists() {
            debug!("No config file at {:?}", path);
            return None;
        }
        let file = File::open(path)
            .map_err(|e| warn!("Could not open config file {:?}: {}", path, e))
            .ok()?;
        serde_json::from_reader(file)
            .map_err(|e| warn!("Could not parse config file {:?}: {}", path, e))
            .ok()
    }

    pub fn save(&self) -> Result<(), PitwallError> {
        self.save_to(&Self::default_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), PitwallError> {
        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| PitwallError::ConfigIOError { source: e })?;
        }

        let file = File::create(path).map_err(|e| PitwallError::ConfigIOError { source: e })?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| PitwallError::ConfigSerializeError { source: e })
    }

    pub fn toast_duration(&self) -> Duration {
        Duration::from_millis(self.toast_duration_ms)
    }

    pub fn upload_done_reset(&self) -> Duration {
        Duration::from_millis(self.upload_done_reset_ms)
    }

    pub fn upload_error_reset(&self) -> Duration {
        Duration::from_millis(self.upload_error_reset_ms)
    }

    pub fn report_poll_interval(&self) -> Duration {
        Duration::from_millis(self.report_poll_interval_ms)
    }

    pub fn question_focus_delay(&self) -> Duration {
        Duration::from_millis(self.question_focus_delay_ms)
    }
}
