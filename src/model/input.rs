//! Charging rails feeding the battery.

use crate::{
   model::{ModelError, filter::MovingAverageFilter},
   sensors::{Entry, SensorStore},
};

/// A physical charging input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
pub enum Rail {
   #[strum(serialize = "dc")]
   Dc,
   #[strum(serialize = "usb")]
   Usb,
}

/// Order in which rails are considered; the first present rail is active.
/// The dedicated DC input wins over USB when both report power.
pub const RAIL_PRIORITY: [Rail; 2] = [Rail::Dc, Rail::Usb];

impl Rail {
   const fn voltage_entry(self) -> Entry {
      match self {
         Self::Dc => Entry::DcVoltage,
         Self::Usb => Entry::UsbVoltage,
      }
   }

   const fn present_entry(self) -> Entry {
      match self {
         Self::Dc => Entry::DcPresent,
         Self::Usb => Entry::UsbPresent,
      }
   }

   const fn current_max_entry(self) -> Entry {
      match self {
         Self::Dc => Entry::DcCurrentMax,
         Self::Usb => Entry::UsbCurrentMax,
      }
   }

   /// Lowest input voltage the charger tolerates before it starts
   /// throttling, given the negotiated current limit.
   fn voltage_min(self, current_max: f64) -> f64 {
      match self {
         Self::Dc => 4.35,
         // High-current USB ports are allowed to sag further
         Self::Usb if current_max > 0.5 => 4.5,
         Self::Usb => 4.9,
      }
   }
}

/// Smoothed state of one rail.
#[derive(Debug, Clone, Copy)]
pub struct InputSource {
   rail: Rail,
   pub voltage_min: f64,
   pub current_max: f64,
   pub present: bool,
   voltage_now: MovingAverageFilter,
}

impl InputSource {
   pub const fn new(rail: Rail) -> Self {
      Self {
         rail,
         voltage_min: 0.0,
         current_max: 0.0,
         present: false,
         voltage_now: MovingAverageFilter::new(),
      }
   }

   pub const fn rail(&self) -> Rail {
      self.rail
   }

   /// Smoothed input voltage. Missing until this rail's voltage has been read
   /// at least once.
   pub fn voltage(&self) -> Result<f64, ModelError> {
      self
         .voltage_now
         .average()
         .ok_or(ModelError::MissingReading(self.rail.voltage_entry()))
   }

   /// Pulls this rail's readings from the store. The voltage is smoothed on
   /// every call, whether or not the rail is present.
   pub fn update(&mut self, store: &SensorStore) -> Result<(), ModelError> {
      let voltage_entry = self.rail.voltage_entry();
      let voltage = store
         .number(voltage_entry)
         .ok_or(ModelError::MissingReading(voltage_entry))?;
      self.voltage_now.integrate(voltage);

      let present_entry = self.rail.present_entry();
      self.present = store
         .flag(present_entry)
         .ok_or(ModelError::MissingReading(present_entry))?;

      let current_max_entry = self.rail.current_max_entry();
      self.current_max = store
         .number(current_max_entry)
         .ok_or(ModelError::MissingReading(current_max_entry))?;

      self.voltage_min = self.rail.voltage_min(self.current_max);
      Ok(())
   }
}
