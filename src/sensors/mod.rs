//! Named battery and charger readings.
//!
//! [`SensorStore`] is the key-value store shared between acquisition and the
//! charging model: collectors write raw readings into it, the model reads them
//! and writes its derived readings back for display.

pub mod sample_log;
pub mod sysfs;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use strum::{EnumCount, IntoEnumIterator};

/// Every reading known to the store.
#[derive(
   Debug,
   Clone,
   Copy,
   PartialEq,
   Eq,
   Hash,
   strum::Display,
   strum::EnumIter,
   strum::EnumCount,
   strum::IntoStaticStr,
)]
pub enum Entry {
   Status,
   BatteryCurrent,
   BatteryVoltage,
   BmsChargeCounter,
   BmsResistance,
   DcVoltage,
   DcPresent,
   DcCurrentMax,
   UsbVoltage,
   UsbPresent,
   UsbCurrentMax,
   Temperature,
   BatteryCapacity,
   InternalResistance,
   ExternalResistance,
   ActualBatteryVoltage,
}

impl Entry {
   /// Entries computed by the charging model rather than acquired.
   pub const fn is_derived(self) -> bool {
      matches!(
         self,
         Self::InternalResistance | Self::ExternalResistance | Self::ActualBatteryVoltage
      )
   }

   pub fn to_str(self) -> &'static str {
      self.into()
   }
}

/// Charger status as reported by the battery driver.
#[derive(
   Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::IntoStaticStr,
)]
pub enum ChargeStatus {
   Charging,
   Discharging,
   Full,
   Unknown,
}

impl ChargeStatus {
   /// Parses the kernel's status string. Anything unrecognised is `Unknown`.
   pub fn parse(raw: &str) -> Self {
      match raw.trim() {
         "Charging" => Self::Charging,
         "Discharging" => Self::Discharging,
         "Full" => Self::Full,
         _ => Self::Unknown,
      }
   }
}

/// A single reading. Numbers are in SI units (A, V, Ω, °C, fraction).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
   Number(f64),
   Flag(bool),
   Status(ChargeStatus),
}

impl Reading {
   fn to_json(self) -> Value {
      match self {
         Self::Number(v) => json!(v),
         Self::Flag(b) => json!(b),
         Self::Status(s) => json!(s.to_string()),
      }
   }
}

/// Fixed table of optional readings, one slot per [`Entry`].
#[derive(Debug, Clone, PartialEq)]
pub struct SensorStore {
   values: [Option<Reading>; Entry::COUNT],
}

impl Default for SensorStore {
   fn default() -> Self {
      Self::new()
   }
}

impl SensorStore {
   pub const fn new() -> Self {
      Self {
         values: [None; Entry::COUNT],
      }
   }

   pub const fn get(&self, entry: Entry) -> Option<Reading> {
      self.values[entry as usize]
   }

   pub fn number(&self, entry: Entry) -> Option<f64> {
      match self.get(entry)? {
         Reading::Number(v) => Some(v),
         _ => None,
      }
   }

   pub fn flag(&self, entry: Entry) -> Option<bool> {
      match self.get(entry)? {
         Reading::Flag(b) => Some(b),
         _ => None,
      }
   }

   pub fn status(&self) -> Option<ChargeStatus> {
      match self.get(Entry::Status)? {
         Reading::Status(s) => Some(s),
         _ => None,
      }
   }

   pub fn set(&mut self, entry: Entry, reading: Option<Reading>) {
      self.values[entry as usize] = reading;
   }

   pub fn set_number(&mut self, entry: Entry, value: f64) {
      self.set(entry, Some(Reading::Number(value)));
   }

   /// Drops the model's readings from the previous tick.
   pub fn clear_derived(&mut self) {
      for entry in Entry::iter().filter(|e| e.is_derived()) {
         self.set(entry, None);
      }
   }

   /// Returns every present reading keyed by entry name.
   pub fn to_json(&self) -> Value {
      let map: Map<String, Value> = Entry::iter()
         .filter_map(|entry| {
            self
               .get(entry)
               .map(|reading| (entry.to_str().to_owned(), reading.to_json()))
         })
         .collect();
      Value::Object(map)
   }
}
