//! Charging model: which constraint limits the charge current and how long
//! until the battery is full.
//!
//! [`ChargingModel`] is updated once per tick from a [`SensorStore`]. It keeps
//! all smoothing state between ticks and writes the derived readings
//! (actual battery voltage, internal and external resistance) back into the
//! store.

pub mod classifier;
pub mod curve;
pub mod estimator;
pub mod filter;
pub mod input;

use log::{debug, info};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::{
   model::{
      classifier::LimitScores,
      estimator::TimeRemainingEstimator,
      filter::MovingAverageFilter,
      input::{InputSource, RAIL_PRIORITY},
   },
   sensors::{ChargeStatus, Entry, SensorStore},
};

/// Charger regulation ceiling for the battery terminal voltage.
pub const MAX_OUTPUT_VOLTAGE: f64 = 4.25;
/// Nominal resistance of the charge path inside the device (shunt, traces).
pub const NOMINAL_INTERNAL_RESISTANCE: f64 = 0.33;
pub const INTERNAL_RESISTANCE_THRESHOLD: f64 = NOMINAL_INTERNAL_RESISTANCE * 1.5;

/// Errors that abort a model tick. The tick is reported as
/// [`ChargingState::Exception`] and the next one starts over.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelError {
   #[error("Missing reading: {0}")]
   MissingReading(Entry),

   #[error("Charge current is zero, resistance is undefined")]
   DegenerateCurrent,
}

/// The physical constraint currently governing the charge current.
#[derive(
   Debug,
   Clone,
   Copy,
   PartialEq,
   Eq,
   Default,
   Serialize,
   strum::Display,
   strum::IntoStaticStr,
)]
pub enum ChargingState {
   #[default]
   NotCharging,
   NoSource,
   Exception,
   /// Charging, but no constraint is near its limit.
   Unconstrained,
   InputVoltageLimit,
   InputCurrentLimit,
   InternalResistanceLimit,
   BatteryVoltageLimit,
}

impl ChargingState {
   /// States with a time-to-full estimate.
   pub const fn is_limited(self) -> bool {
      matches!(
         self,
         Self::InputVoltageLimit
            | Self::InputCurrentLimit
            | Self::InternalResistanceLimit
            | Self::BatteryVoltageLimit
      )
   }

   pub fn to_str(self) -> &'static str {
      self.into()
   }

   pub const fn description(self) -> &'static str {
      match self {
         Self::NotCharging => "not charging",
         Self::NoSource => "no power supply detected",
         Self::Exception => "charger readings unavailable",
         Self::Unconstrained => "charging unconstrained",
         Self::InputVoltageLimit => "limited by supply voltage",
         Self::InputCurrentLimit => "limited by supply current",
         Self::InternalResistanceLimit => "limited by cable resistance",
         Self::BatteryVoltageLimit => "topping off",
      }
   }
}

/// Result of the latest tick. `-1` marks an unknown duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelOutput {
   pub state: ChargingState,
   pub seconds_remaining: i32,
   pub seconds_remaining_uncertainty: i32,
}

impl Default for ModelOutput {
   fn default() -> Self {
      Self::unknown(ChargingState::NotCharging)
   }
}

impl ModelOutput {
   pub const fn unknown(state: ChargingState) -> Self {
      Self {
         state,
         seconds_remaining: -1,
         seconds_remaining_uncertainty: -1,
      }
   }

   pub fn to_json(self) -> serde_json::Value {
      json!({
         "state": self.state.to_str(),
         "seconds_remaining": self.seconds_remaining,
         "uncertainty": self.seconds_remaining_uncertainty,
      })
   }
}

/// Smoothed electrical state of one tick, shared by classifier and estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OperatingPoint {
   /// Smoothed battery current, A. Positive while charging.
   pub current: f64,
   /// Smoothed voltage at the battery terminals, V.
   pub output_voltage: f64,
   /// Output voltage less the drop across the BMS resistance, V.
   pub battery_voltage: f64,
   pub bms_resistance: f64,
   /// Smoothed voltage of the active input, V.
   pub input_voltage: f64,
   pub input_voltage_min: f64,
   pub input_current_max: f64,
   /// Resistance between the active input and the battery terminals, Ω.
   pub internal_resistance: f64,
}

/// Truncates a duration to whole seconds. Non-finite values are unknown.
fn whole_seconds(value: f64) -> i32 {
   if value.is_finite() { value as i32 } else { -1 }
}

fn require(store: &SensorStore, entry: Entry) -> Result<f64, ModelError> {
   store
      .number(entry)
      .ok_or(ModelError::MissingReading(entry))
}

/// Per-process charging model.
#[derive(Debug, Clone)]
pub struct ChargingModel {
   current: MovingAverageFilter,
   voltage: MovingAverageFilter,
   inputs: [InputSource; RAIL_PRIORITY.len()],
   estimator: TimeRemainingEstimator,
   output: ModelOutput,
}

impl Default for ChargingModel {
   fn default() -> Self {
      Self::new()
   }
}

impl ChargingModel {
   pub fn new() -> Self {
      Self {
         current: MovingAverageFilter::new(),
         voltage: MovingAverageFilter::new(),
         inputs: RAIL_PRIORITY.map(InputSource::new),
         estimator: TimeRemainingEstimator::default(),
         output: ModelOutput::default(),
      }
   }

   pub const fn state(&self) -> ChargingState {
      self.output.state
   }

   pub const fn seconds_remaining(&self) -> i32 {
      self.output.seconds_remaining
   }

   pub const fn seconds_remaining_uncertainty(&self) -> i32 {
      self.output.seconds_remaining_uncertainty
   }

   pub const fn output(&self) -> ModelOutput {
      self.output
   }

   /// Runs one tick against the latest readings.
   pub fn update(&mut self, store: &mut SensorStore) -> ModelOutput {
      let output = match self.evaluate(store) {
         Ok(output) => output,
         Err(e) => {
            debug!("Charging model tick failed: {e}");
            ModelOutput::unknown(ChargingState::Exception)
         },
      };

      if output.state != self.output.state {
         info!("Charging state: {} -> {}", self.output.state, output.state);
      }
      self.output = output;
      output
   }

   fn evaluate(&mut self, store: &mut SensorStore) -> Result<ModelOutput, ModelError> {
      self.current.integrate(require(store, Entry::BatteryCurrent)?);
      self.voltage.integrate(require(store, Entry::BatteryVoltage)?);

      let current = self
         .current
         .average()
         .ok_or(ModelError::MissingReading(Entry::BatteryCurrent))?;
      let output_voltage = self
         .voltage
         .average()
         .ok_or(ModelError::MissingReading(Entry::BatteryVoltage))?;
      let bms_resistance = require(store, Entry::BmsResistance)?;

      let battery_voltage = output_voltage - current * bms_resistance;
      store.set_number(Entry::ActualBatteryVoltage, battery_voltage);

      // Discharging
      if current < 0.0 {
         return Ok(ModelOutput::unknown(ChargingState::NotCharging));
      }
      if store.status() != Some(ChargeStatus::Charging) {
         return Ok(ModelOutput::unknown(ChargingState::NotCharging));
      }

      let Some(active) = self.select_input(store)? else {
         return Ok(ModelOutput::unknown(ChargingState::NoSource));
      };
      let input = &self.inputs[active];
      let input_voltage = input.voltage()?;

      let internal_resistance = (input_voltage - output_voltage) / current;
      if !internal_resistance.is_finite() {
         return Err(ModelError::DegenerateCurrent);
      }
      store.set_number(Entry::InternalResistance, internal_resistance);

      let point = OperatingPoint {
         current,
         output_voltage,
         battery_voltage,
         bms_resistance,
         input_voltage,
         input_voltage_min: input.voltage_min,
         input_current_max: input.current_max,
         internal_resistance,
      };
      let scores = LimitScores::new(&point);
      let state = scores.binding_state();
      debug!("Limit scores via {}: {scores:?} -> {state}", input.rail());

      if !state.is_limited() {
         return Ok(ModelOutput::unknown(state));
      }

      let estimate = self.estimator.estimate(state, &point);
      debug!(
         "Estimate: {:.0}s ± {:.0}s, external resistance floor {:.3}Ω",
         estimate.seconds,
         estimate.uncertainty,
         self.estimator.min_external_resistance()
      );
      if let Some(external_resistance) = estimate.external_resistance {
         store.set_number(Entry::ExternalResistance, external_resistance);
      }

      Ok(ModelOutput {
         state,
         seconds_remaining: whole_seconds(estimate.seconds),
         seconds_remaining_uncertainty: whole_seconds(estimate.uncertainty),
      })
   }

   /// Updates every rail up to the first present one, in priority order.
   fn select_input(&mut self, store: &SensorStore) -> Result<Option<usize>, ModelError> {
      for (i, input) in self.inputs.iter_mut().enumerate() {
         input.update(store)?;
         if input.present {
            return Ok(Some(i));
         }
      }
      Ok(None)
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   use crate::{
      model::{estimator::TailCurve, input::Rail},
      sensors::Reading,
   };

   struct Readings {
      current: f64,
      voltage: f64,
      resistance: f64,
      status: ChargeStatus,
      dc: Option<(f64, bool, f64)>,
      usb: Option<(f64, bool, f64)>,
   }

   impl Default for Readings {
      fn default() -> Self {
         Self {
            current: 1.0,
            voltage: 4.0,
            resistance: 0.1,
            status: ChargeStatus::Charging,
            dc: Some((5.0, false, 0.0)),
            usb: Some((5.0, false, 0.5)),
         }
      }
   }

   impl Readings {
      fn store(&self) -> SensorStore {
         let mut store = SensorStore::new();
         store.set_number(Entry::BatteryCurrent, self.current);
         store.set_number(Entry::BatteryVoltage, self.voltage);
         store.set_number(Entry::BmsResistance, self.resistance);
         store.set(Entry::Status, Some(Reading::Status(self.status)));
         for (rail, values) in [(Rail::Dc, self.dc), (Rail::Usb, self.usb)] {
            let Some((voltage, present, current_max)) = values else {
               continue;
            };
            let (v, p, c) = match rail {
               Rail::Dc => (Entry::DcVoltage, Entry::DcPresent, Entry::DcCurrentMax),
               Rail::Usb => (Entry::UsbVoltage, Entry::UsbPresent, Entry::UsbCurrentMax),
            };
            store.set_number(v, voltage);
            store.set(p, Some(Reading::Flag(present)));
            store.set_number(c, current_max);
         }
         store
      }
   }

   fn run(readings: &Readings) -> (ChargingModel, SensorStore) {
      let mut model = ChargingModel::new();
      let mut store = readings.store();
      model.update(&mut store);
      (model, store)
   }

   #[test]
   fn test_initial_state() {
      let model = ChargingModel::new();
      assert_eq!(model.state(), ChargingState::NotCharging);
      assert_eq!(model.seconds_remaining(), -1);
      assert_eq!(model.seconds_remaining_uncertainty(), -1);
   }

   #[test]
   fn test_discharging_current() {
      let (model, store) = run(&Readings {
         current: -0.01,
         ..Default::default()
      });
      assert_eq!(model.state(), ChargingState::NotCharging);
      assert_eq!(model.seconds_remaining(), -1);
      assert_eq!(model.seconds_remaining_uncertainty(), -1);
      // Battery voltage is still published
      let expected = 4.0 + 0.01 * 0.1;
      assert!((store.number(Entry::ActualBatteryVoltage).unwrap() - expected).abs() < 1e-12);
      assert_eq!(store.number(Entry::InternalResistance), None);
   }

   #[test]
   fn test_discharging_status() {
      for current in [1.0, -1.0] {
         let (model, _) = run(&Readings {
            current,
            status: ChargeStatus::Discharging,
            ..Default::default()
         });
         assert_eq!(model.state(), ChargingState::NotCharging);
         assert_eq!(model.output(), ModelOutput::unknown(ChargingState::NotCharging));
      }
   }

   #[test]
   fn test_full_status_not_charging() {
      let (model, _) = run(&Readings {
         status: ChargeStatus::Full,
         ..Default::default()
      });
      assert_eq!(model.state(), ChargingState::NotCharging);
   }

   #[test]
   fn test_no_source() {
      let (model, _) = run(&Readings::default());
      assert_eq!(model.state(), ChargingState::NoSource);
      assert_eq!(model.seconds_remaining(), -1);
      assert_eq!(model.seconds_remaining_uncertainty(), -1);
   }

   #[test]
   fn test_missing_current() {
      let mut model = ChargingModel::new();
      let mut store = Readings::default().store();
      store.set(Entry::BatteryCurrent, None);
      model.update(&mut store);
      assert_eq!(model.state(), ChargingState::Exception);
      assert_eq!(model.seconds_remaining(), -1);
      assert_eq!(model.seconds_remaining_uncertainty(), -1);
      assert_eq!(store.number(Entry::ActualBatteryVoltage), None);
   }

   #[test]
   fn test_missing_rail_reading() {
      // USB is present, but DC is checked first and its readings are missing
      let (model, _) = run(&Readings {
         dc: None,
         usb: Some((5.0, true, 1.5)),
         ..Default::default()
      });
      assert_eq!(model.state(), ChargingState::Exception);
   }

   #[test]
   fn test_exception_recovers() {
      let mut model = ChargingModel::new();
      let mut store = Readings::default().store();
      store.set(Entry::BmsResistance, None);
      model.update(&mut store);
      assert_eq!(model.state(), ChargingState::Exception);

      let mut store = Readings::default().store();
      model.update(&mut store);
      assert_eq!(model.state(), ChargingState::NoSource);
   }

   #[test]
   fn test_dc_preferred_over_usb() {
      let (model, store) = run(&Readings {
         voltage: 4.1,
         current: 1.95,
         dc: Some((5.0, true, 2.0)),
         usb: Some((4.4, true, 0.5)),
         ..Default::default()
      });
      // USB at 4.4 V would be deep in its voltage limit
      assert_eq!(model.state(), ChargingState::InputCurrentLimit);
      let r = store.number(Entry::InternalResistance).unwrap();
      assert!((r - (5.0 - 4.1) / 1.95).abs() < 1e-12);
   }

   #[test]
   fn test_input_current_limit() {
      let (model, store) = run(&Readings {
         voltage: 4.1,
         current: 1.95,
         dc: Some((5.0, true, 2.0)),
         ..Default::default()
      });
      assert_eq!(model.state(), ChargingState::InputCurrentLimit);
      assert!(model.seconds_remaining() > 0);
      assert!(model.seconds_remaining_uncertainty() > 0);
      assert!(store.number(Entry::ExternalResistance).is_some());
   }

   #[test]
   fn test_input_voltage_limit() {
      // USB sagging to its 4.5 V floor at 1.5 A
      let (model, _) = run(&Readings {
         voltage: 3.9,
         current: 1.0,
         usb: Some((4.5, true, 1.5)),
         ..Default::default()
      });
      assert_eq!(model.state(), ChargingState::InputVoltageLimit);
      assert!(model.seconds_remaining() > 0);
   }

   #[test]
   fn test_internal_resistance_limit() {
      // 0.7 V dropped at 2 A is 0.35 Ω, close to the nominal path resistance
      let (model, store) = run(&Readings {
         voltage: 4.0,
         current: 2.0,
         dc: Some((4.7, true, 3.0)),
         ..Default::default()
      });
      assert_eq!(model.state(), ChargingState::InternalResistanceLimit);
      assert!(model.seconds_remaining() > 0);
      let r = store.number(Entry::ExternalResistance).unwrap();
      assert!((r - 0.2).abs() < 1e-9, "r={r}");
   }

   #[test]
   fn test_unconstrained() {
      let (model, store) = run(&Readings {
         voltage: 3.7,
         current: 0.5,
         dc: Some((5.0, true, 3.0)),
         ..Default::default()
      });
      assert_eq!(model.state(), ChargingState::Unconstrained);
      assert_eq!(model.seconds_remaining(), -1);
      assert!(store.number(Entry::InternalResistance).is_some());
      assert_eq!(store.number(Entry::ExternalResistance), None);
   }

   #[test]
   fn test_zero_current_is_exception() {
      let (model, store) = run(&Readings {
         current: 0.0,
         dc: Some((5.0, true, 2.0)),
         ..Default::default()
      });
      assert_eq!(model.state(), ChargingState::Exception);
      assert_eq!(store.number(Entry::InternalResistance), None);
   }

   #[test]
   fn test_battery_voltage_tail_sequence() {
      let tail = TailCurve::default();
      let mut model = ChargingModel::new();
      let mut reference = MovingAverageFilter::new();

      for i in 0..40 {
         let current = 1.0 - f64::from(i) * 0.015;
         let mut store = Readings {
            current,
            voltage: 4.2,
            dc: Some((5.0, true, 2.0)),
            ..Default::default()
         }
         .store();
         model.update(&mut store);
         reference.integrate(current);
         let smoothed = reference.average().unwrap();

         assert_eq!(model.state(), ChargingState::BatteryVoltageLimit, "tick {i}");
         assert_eq!(
            model.seconds_remaining(),
            tail.seconds(smoothed) as i32,
            "tick {i}"
         );
         assert_eq!(
            model.seconds_remaining_uncertainty(),
            tail.uncertainty(smoothed) as i32,
            "tick {i}"
         );
      }
   }

   #[test]
   fn test_smoothing_across_ticks() {
      let mut model = ChargingModel::new();
      let mut store = Readings {
         current: -1.0,
         ..Default::default()
      }
      .store();
      model.update(&mut store);
      assert_eq!(model.state(), ChargingState::NotCharging);

      // Average of -1.0 and 1.5 is still charging
      let mut store = Readings {
         current: 1.5,
         ..Default::default()
      }
      .store();
      model.update(&mut store);
      assert_eq!(model.state(), ChargingState::NoSource);
   }

   #[test]
   fn test_whole_seconds() {
      assert_eq!(whole_seconds(12.9), 12);
      assert_eq!(whole_seconds(-0.5), 0);
      assert_eq!(whole_seconds(f64::NAN), -1);
      assert_eq!(whole_seconds(f64::INFINITY), -1);
   }
}
