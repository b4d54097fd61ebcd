//! Configuration management for the charge monitor.
//!
//! This module handles loading and saving configuration from disk: where the
//! power-supply tree lives, how often to sample it and where to keep the
//! sample log.

use std::{
   env, fs,
   path::{Path, PathBuf},
   time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
   error::{ChargeMonError, Result},
   sensors::sample_log::SampleLog,
};

/// Main configuration structure for the service.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Config {
   #[serde(default = "default_sysfs_root")]
   pub sysfs_root: PathBuf,

   /// Tick period while charging or watched.
   #[serde(default = "default_fast_interval")]
   pub fast_interval_ms: u64,

   /// Tick period while idle on battery.
   #[serde(default = "default_slow_interval")]
   pub slow_interval_ms: u64,

   /// Status-only idle ticks between two full collections.
   #[serde(default = "default_full_sample_every")]
   pub full_sample_every: u32,

   /// Reads per averaged sysfs entry.
   #[serde(default = "default_averaging_samples")]
   pub averaging_samples: u32,

   #[serde(default = "default_sample_log")]
   pub sample_log: bool,

   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub sample_log_path: Option<PathBuf>,
}

fn default_sysfs_root() -> PathBuf {
   PathBuf::from("/sys/class/power_supply")
}

const fn default_fast_interval() -> u64 {
   1000
}

const fn default_slow_interval() -> u64 {
   5000
}

const fn default_full_sample_every() -> u32 {
   12
}

const fn default_averaging_samples() -> u32 {
   5
}

const fn default_sample_log() -> bool {
   true
}

impl Default for Config {
   fn default() -> Self {
      Self {
         sysfs_root: default_sysfs_root(),
         fast_interval_ms: default_fast_interval(),
         slow_interval_ms: default_slow_interval(),
         full_sample_every: default_full_sample_every(),
         averaging_samples: default_averaging_samples(),
         sample_log: default_sample_log(),
         sample_log_path: None,
      }
   }
}

impl Config {
   /// Loads configuration from disk or creates default if not exists.
   pub fn load() -> Result<Self> {
      Self::load_from(&Self::config_path()?)
   }

   pub fn load_from(path: &Path) -> Result<Self> {
      let config = if path.exists() {
         let contents = fs::read_to_string(path)?;
         toml::from_str::<Self>(&contents)?
      } else {
         // Create default config
         let config = Self::default();
         config.save_to(path)?;
         config
      };
      config.validate()?;
      Ok(config)
   }

   /// Saves the configuration to `path`.
   pub fn save_to(&self, path: &Path) -> Result<()> {
      // Ensure directory exists
      if let Some(parent) = path.parent() {
         fs::create_dir_all(parent)?;
      }

      let contents = toml::to_string_pretty(self)?;
      fs::write(path, contents)?;

      Ok(())
   }

   fn validate(&self) -> Result<()> {
      if self.fast_interval_ms == 0 || self.slow_interval_ms == 0 {
         return Err(ChargeMonError::InvalidConfig("tick intervals must be non-zero"));
      }
      if self.full_sample_every == 0 {
         return Err(ChargeMonError::InvalidConfig("full_sample_every must be non-zero"));
      }
      if self.averaging_samples == 0 {
         return Err(ChargeMonError::InvalidConfig("averaging_samples must be non-zero"));
      }
      Ok(())
   }

   fn config_path() -> Result<PathBuf> {
      let config_dir = if let Ok(chargemon_home) = env::var("CHARGEMON_HOME") {
         PathBuf::from(chargemon_home)
      } else if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
         PathBuf::from(config_home)
      } else if let Ok(home) = env::var("HOME") {
         PathBuf::from(home).join(".config")
      } else {
         return Err(ChargeMonError::ConfigDirNotFound);
      };

      Ok(config_dir.join("chargemon").join("config.toml"))
   }

   pub const fn fast_interval(&self) -> Duration {
      Duration::from_millis(self.fast_interval_ms)
   }

   pub const fn slow_interval(&self) -> Duration {
      Duration::from_millis(self.slow_interval_ms)
   }

   /// Sample log location, `None` when logging is disabled.
   pub fn sample_log_path(&self) -> Result<Option<PathBuf>> {
      if !self.sample_log {
         return Ok(None);
      }
      match &self.sample_log_path {
         Some(path) => Ok(Some(path.clone())),
         None => SampleLog::default_path().map(Some),
      }
   }
}
