//! Error types for the charge monitor service.
//!
//! This module defines the errors that can occur while running the
//! daemon: D-Bus, I/O, configuration and monitor lifecycle errors.
//! Estimator errors live in [`crate::model::ModelError`] and never leave a tick.

use thiserror::Error;

/// Main error type for the charge monitor service.
#[derive(Error, Debug)]
pub enum ChargeMonError {
   #[error("D-Bus error: {0}")]
   DBus(#[from] zbus::Error),

   #[error("D-Bus connection error: {0}")]
   DBusConnection(#[from] zbus::fdo::Error),

   #[error("I/O error: {0}")]
   Io(#[from] std::io::Error),

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("Could not determine local data directory")]
   DataDirNotFound,

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),

   #[error("Invalid configuration: {0}")]
   InvalidConfig(&'static str),

   #[error("Monitor has been shut down")]
   MonitorShutdown,
}

/// Convenience type alias for Results with `ChargeMonError`.
pub type Result<T> = std::result::Result<T, ChargeMonError>;
