//! Acquisition of power-supply readings from sysfs.
//!
//! Each [`Entry`] that is acquired (rather than derived) maps to one file
//! under the power-supply class directory. Values are read as the first line
//! of the file and scaled to SI units; anything unreadable becomes an absent
//! reading.

use std::{
   fmt, fs,
   path::{Path, PathBuf},
   time::SystemTime,
};

use log::debug;
use smol_str::{SmolStr, format_smolstr};

use crate::sensors::{ChargeStatus, Entry, Reading, SensorStore};

/// Placeholder written to the sample log for unreadable entries.
pub const NOT_AVAILABLE: &str = "n/a";

#[derive(Debug, Clone, Copy, PartialEq)]
enum Kind {
   Status,
   Flag,
   Numeric { scale: f64 },
   /// Read several times per collection and averaged before scaling.
   Averaged { scale: f64 },
}

#[derive(Debug, Clone, Copy)]
struct SysEntry {
   entry: Entry,
   path: &'static str,
   kind: Kind,
   logged: bool,
}

const fn entry(entry: Entry, path: &'static str, kind: Kind) -> SysEntry {
   SysEntry {
      entry,
      path,
      kind,
      logged: true,
   }
}

const MICRO: f64 = 1e-6;

/// Acquired entries in sample-log column order.
const SYSFS_TABLE: &[SysEntry] = &[
   entry(Entry::Status, "battery/status", Kind::Status),
   entry(
      Entry::BatteryCurrent,
      "battery/current_now",
      Kind::Averaged { scale: MICRO },
   ),
   entry(
      Entry::BatteryVoltage,
      "battery/voltage_now",
      Kind::Averaged { scale: MICRO },
   ),
   entry(
      Entry::BmsChargeCounter,
      "bms/charge_counter_shadow",
      Kind::Numeric { scale: MICRO },
   ),
   entry(
      Entry::BmsResistance,
      "bms/resistance",
      Kind::Numeric { scale: MICRO },
   ),
   entry(
      Entry::DcVoltage,
      "qpnp-dc/voltage_now",
      Kind::Averaged { scale: MICRO },
   ),
   entry(Entry::DcPresent, "qpnp-dc/present", Kind::Flag),
   entry(
      Entry::DcCurrentMax,
      "qpnp-dc/current_max",
      Kind::Numeric { scale: MICRO },
   ),
   entry(
      Entry::UsbVoltage,
      "usb/voltage_now",
      Kind::Averaged { scale: MICRO },
   ),
   entry(Entry::UsbPresent, "usb/present", Kind::Flag),
   entry(
      Entry::UsbCurrentMax,
      "usb/current_max",
      Kind::Numeric { scale: MICRO },
   ),
   entry(
      Entry::Temperature,
      "battery/temp",
      Kind::Numeric { scale: 0.1 },
   ),
   SysEntry {
      entry: Entry::BatteryCapacity,
      path: "battery/capacity",
      kind: Kind::Numeric { scale: 0.01 },
      logged: false,
   },
];

/// One full collection as it appears in the sample log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleLine {
   pub timestamp_ms: u64,
   pub columns: Vec<SmolStr>,
}

impl fmt::Display for SampleLine {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "{}", self.timestamp_ms)?;
      for column in &self.columns {
         write!(f, " {column}")?;
      }
      Ok(())
   }
}

/// Reads the power-supply class directory into a [`SensorStore`].
#[derive(Debug, Clone)]
pub struct SysfsCollector {
   root: PathBuf,
   averaging_samples: u32,
}

impl SysfsCollector {
   pub fn new(root: impl Into<PathBuf>, averaging_samples: u32) -> Self {
      Self {
         root: root.into(),
         averaging_samples: averaging_samples.max(1),
      }
   }

   pub fn root(&self) -> &Path {
      &self.root
   }

   /// Refreshes only the charger status. Used on low-power ticks.
   pub fn collect_status(&self, store: &mut SensorStore) -> Option<ChargeStatus> {
      let status = self
         .read_line(SYSFS_TABLE[0].path)
         .map(|line| ChargeStatus::parse(&line));
      store.set(Entry::Status, status.map(Reading::Status));
      status
   }

   /// Reads every acquired entry into `store` and returns the raw sample line.
   pub fn collect(&self, store: &mut SensorStore) -> SampleLine {
      let timestamp_ms = SystemTime::UNIX_EPOCH
         .elapsed()
         .map_or(0, |d| d.as_millis() as u64);
      let mut columns = Vec::with_capacity(SYSFS_TABLE.len());

      for sys in SYSFS_TABLE {
         let (raw, reading) = self.read_entry(sys);
         store.set(sys.entry, reading);
         if sys.logged {
            columns.push(raw.unwrap_or(SmolStr::new_static(NOT_AVAILABLE)));
         }
      }

      SampleLine {
         timestamp_ms,
         columns,
      }
   }

   fn read_entry(&self, sys: &SysEntry) -> (Option<SmolStr>, Option<Reading>) {
      match sys.kind {
         Kind::Status => {
            let raw = self.read_line(sys.path);
            let reading = raw
               .as_deref()
               .map(|s| Reading::Status(ChargeStatus::parse(s)));
            (raw, reading)
         },
         Kind::Flag => {
            let raw = self.read_line(sys.path);
            let reading = raw.as_deref().map(|s| Reading::Flag(s == "1"));
            (raw, reading)
         },
         Kind::Numeric { scale } => {
            let raw = self.read_line(sys.path);
            let reading = raw
               .as_deref()
               .and_then(|s| s.parse::<f64>().ok())
               .map(|v| Reading::Number(v * scale));
            (raw, reading)
         },
         Kind::Averaged { scale } => match self.read_averaged(sys.path) {
            Some(avg) => (
               Some(format_smolstr!("{avg}")),
               Some(Reading::Number(avg * scale)),
            ),
            None => (None, None),
         },
      }
   }

   fn read_averaged(&self, path: &str) -> Option<f64> {
      let mut sum = 0.0;
      for _ in 0..self.averaging_samples {
         let value: i64 = self.read_line(path)?.parse().ok()?;
         sum += value as f64;
      }
      Some(sum / f64::from(self.averaging_samples))
   }

   fn read_line(&self, path: &str) -> Option<SmolStr> {
      let full = self.root.join(path);
      match fs::read_to_string(&full) {
         Ok(contents) => Some(SmolStr::new(contents.lines().next().unwrap_or_default())),
         Err(e) => {
            debug!("Failed to read {}: {e}", full.display());
            None
         },
      }
   }
}
