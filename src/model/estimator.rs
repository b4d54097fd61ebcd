//! Time-to-full estimation.
//!
//! Charging is modelled as up to three consecutive phases, entered at the one
//! matching the current binding constraint:
//!
//! 1. Input limited: the supply holds the input at its voltage or current
//!    limit until the battery voltage has risen far enough that the path
//!    resistance takes over.
//! 2. Resistance limited: supply, cable and shunt behave as a fixed total
//!    resistance, so current falls linearly until the output reaches its
//!    maximum voltage.
//! 3. Battery voltage limited: the charger holds the output voltage and the
//!    current tails off. This phase uses a fitted logarithmic curve.
//!
//! Each phase hands its end point (accumulated charge and current) to the next.

use log::debug;

use crate::model::{
   ChargingState, MAX_OUTPUT_VOLTAGE, NOMINAL_INTERNAL_RESISTANCE, OperatingPoint,
   curve::ChargeCurve,
};

/// Assumed open-circuit voltage of the supply.
const SUPPLY_VOLTAGE: f64 = 5.1;
/// Relative uncertainty attributed to the first two phases.
const PHASE_UNCERTAINTY: f64 = 0.1;
const INITIAL_EXTERNAL_RESISTANCE: f64 = 1000.0;
/// EMA weight of a new external resistance sample that is above the minimum.
const EXTERNAL_RESISTANCE_WEIGHT: f64 = 0.05;

/// Logarithmic fit of the constant-voltage tail duration and its uncertainty
/// over the charge current.
#[derive(Debug, Clone, Copy)]
pub struct TailCurve {
   pub a: f64,
   pub b: f64,
   pub c: f64,
   pub d: f64,
   pub e: f64,
   pub sa: f64,
   pub sb: f64,
   pub sc: f64,
}

impl Default for TailCurve {
   fn default() -> Self {
      Self {
         a: -0.1306617894347005,
         b: 0.0008832210812982429,
         c: 3154.701435969582,
         d: -0.6222642285814441,
         e: 0.01873177112731897,
         sa: -0.1184127445856138,
         sb: 0.03418389946467427,
         sc: 188.0148041614768,
      }
   }
}

impl TailCurve {
   /// Seconds until full while the output voltage is held.
   pub fn seconds(&self, current: f64) -> f64 {
      current.powf(self.d).mul_add(self.e, current + self.a).ln() / self.b + self.c
   }

   pub fn uncertainty(&self, current: f64) -> f64 {
      (current + self.sa).ln() / self.sb + self.sc
   }
}

/// Unrounded estimate for one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
   pub seconds: f64,
   pub uncertainty: f64,
   /// Cable and connector resistance seen this tick, when it could be measured.
   pub external_resistance: Option<f64>,
}

/// Phase integrator. Keeps the long-term external resistance estimate
/// between ticks.
#[derive(Debug, Clone)]
pub struct TimeRemainingEstimator {
   curve: ChargeCurve,
   tail: TailCurve,
   min_external_resistance: f64,
}

impl Default for TimeRemainingEstimator {
   fn default() -> Self {
      Self::new(ChargeCurve::default(), TailCurve::default())
   }
}

impl TimeRemainingEstimator {
   pub const fn new(curve: ChargeCurve, tail: TailCurve) -> Self {
      Self {
         curve,
         tail,
         min_external_resistance: INITIAL_EXTERNAL_RESISTANCE,
      }
   }

   pub const fn min_external_resistance(&self) -> f64 {
      self.min_external_resistance
   }

   /// Estimates the remaining charge time. Only meaningful for the four
   /// limit states; any other state contributes no phase and yields zero.
   pub fn estimate(&mut self, state: ChargingState, point: &OperatingPoint) -> Estimate {
      use ChargingState::{
         BatteryVoltageLimit, InputCurrentLimit, InputVoltageLimit, InternalResistanceLimit,
      };

      let mut accumulated = self.curve.invert(point.battery_voltage);
      let mut current = point.current;
      let mut input_voltage = point.input_voltage;
      let mut seconds = 0.0;
      let mut uncertainty = 0.0;
      let mut external_resistance = None;

      if matches!(state, InputVoltageLimit | InputCurrentLimit) {
         if state == InputVoltageLimit {
            input_voltage = point.input_voltage_min;
         } else {
            current = point.input_current_max;
         }
         let target = self.curve.invert(
            input_voltage - NOMINAL_INTERNAL_RESISTANCE * current - current * point.bms_resistance,
         );
         // Otherwise the resistance limit is already reached
         if accumulated > target {
            let delta = (accumulated - target) / current;
            debug!("Input limited phase: {delta:.0}s");
            seconds += delta;
            uncertainty += delta * PHASE_UNCERTAINTY;
            accumulated = target;
         }
      }

      if matches!(
         state,
         InputVoltageLimit | InputCurrentLimit | InternalResistanceLimit
      ) {
         let measured = (SUPPLY_VOLTAGE - input_voltage) / current;
         if measured.is_finite() {
            self.track_external_resistance(measured);
            external_resistance = Some(measured);
         }

         let current_end = (SUPPLY_VOLTAGE - MAX_OUTPUT_VOLTAGE)
            / (point.internal_resistance + self.min_external_resistance);
         let battery_voltage_end = MAX_OUTPUT_VOLTAGE - current_end * point.bms_resistance;
         let target = self.curve.invert(battery_voltage_end);

         // Current falls linearly, so integrate at the mean of both ends
         let delta = (accumulated - target) / (current_end + current) * 2.0;
         debug!("Resistance limited phase: {delta:.0}s, ending at {current_end:.3}A");
         seconds += delta;
         uncertainty += delta * PHASE_UNCERTAINTY;
         current = current_end;
      }

      if matches!(
         state,
         InputVoltageLimit | InputCurrentLimit | InternalResistanceLimit | BatteryVoltageLimit
      ) {
         seconds += self.tail.seconds(current);
         uncertainty += self.tail.uncertainty(current);
      }

      Estimate {
         seconds,
         uncertainty,
         external_resistance,
      }
   }

   /// Follows drops immediately, rises slowly.
   fn track_external_resistance(&mut self, measured: f64) {
      if measured < self.min_external_resistance {
         self.min_external_resistance = measured;
      } else {
         self.min_external_resistance = self
            .min_external_resistance
            .mul_add(1.0 - EXTERNAL_RESISTANCE_WEIGHT, measured * EXTERNAL_RESISTANCE_WEIGHT);
      }
   }
}
