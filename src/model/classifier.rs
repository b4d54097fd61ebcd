//! Selection of the constraint currently limiting charge current.
//!
//! Each candidate constraint gets a severity score: how far the governing
//! measurement has moved from its "clearly inactive" point towards its limit,
//! mapped linearly so that the limit itself scores 1 and the inactive point
//! scores 0. Scores are not clamped, so they also order constraints that are
//! all well past (or short of) their limits.

use crate::model::{
   ChargingState, INTERNAL_RESISTANCE_THRESHOLD, MAX_OUTPUT_VOLTAGE, NOMINAL_INTERNAL_RESISTANCE,
   OperatingPoint, curve::map,
};

/// Input voltage margin above `voltage_min` at which the constraint is inactive.
const INPUT_VOLTAGE_MARGIN: f64 = 0.5;
const INPUT_CURRENT_ONSET: f64 = 0.95;
const OUTPUT_VOLTAGE_ONSET: f64 = 0.95;

/// Severity of each candidate constraint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimitScores {
   pub input_voltage: f64,
   pub input_current: f64,
   pub resistance: f64,
   pub output_voltage: f64,
}

impl LimitScores {
   pub fn new(point: &OperatingPoint) -> Self {
      Self {
         input_voltage: map(
            point.input_voltage,
            point.input_voltage_min + INPUT_VOLTAGE_MARGIN,
            point.input_voltage_min,
            0.0,
            1.0,
         ),
         input_current: map(
            point.current,
            point.input_current_max * INPUT_CURRENT_ONSET,
            point.input_current_max,
            0.0,
            1.0,
         ),
         resistance: map(
            point.internal_resistance,
            INTERNAL_RESISTANCE_THRESHOLD,
            NOMINAL_INTERNAL_RESISTANCE,
            0.0,
            1.0,
         ),
         output_voltage: map(
            point.output_voltage,
            MAX_OUTPUT_VOLTAGE * OUTPUT_VOLTAGE_ONSET,
            MAX_OUTPUT_VOLTAGE,
            0.0,
            1.0,
         ),
      }
   }

   /// Picks the binding constraint. Ties between input voltage and input
   /// current go to input voltage; every other comparison is strict. When no
   /// score is positive the charger is running unconstrained.
   pub fn binding_state(&self) -> ChargingState {
      let Self {
         input_voltage: iv,
         input_current: ic,
         resistance: r,
         output_voltage: ov,
      } = *self;

      if iv >= ic && iv > r && iv > ov && iv > 0.0 {
         ChargingState::InputVoltageLimit
      } else if ic > r && ic > ov && ic > 0.0 {
         ChargingState::InputCurrentLimit
      } else if r > ov && r > 0.0 {
         ChargingState::InternalResistanceLimit
      } else if ov > 0.0 {
         ChargingState::BatteryVoltageLimit
      } else {
         ChargingState::Unconstrained
      }
   }
}
