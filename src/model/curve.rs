//! Empirical battery charge curve.
//!
//! The curve gives terminal voltage as a function of the charge already
//! delivered (accumulated current, A·s) as a sum of three generalized
//! logistic terms. It has no closed-form inverse, so [`ChargeCurve::invert`]
//! bisects.

/// Upper end of the curve's domain: 20 Ah in A·s.
pub const MAX_ACCUMULATED: f64 = 20.0 * 3600.0;
/// Voltages below this are treated as an empty battery.
const EMPTY_VOLTAGE: f64 = 2.0;
const MAX_ITERATIONS: u32 = 20;
const TOLERANCE: f64 = 0.1;

/// One `K / (C + Q·exp(−B·x))^(1/v)` term.
#[derive(Debug, Clone, Copy)]
pub struct LogisticTerm {
   pub k: f64,
   pub q: f64,
   pub b: f64,
   pub c: f64,
   pub v: f64,
}

impl LogisticTerm {
   fn eval(&self, ah: f64) -> f64 {
      self.k / (self.c + self.q * (-self.b * ah).exp()).powf(1.0 / self.v)
   }
}

/// Fitted curve constants.
#[derive(Debug, Clone, Copy)]
pub struct ChargeCurve {
   pub a: f64,
   pub terms: [LogisticTerm; 3],
}

impl Default for ChargeCurve {
   fn default() -> Self {
      Self {
         a: 2.757999217707216,
         terms: [
            LogisticTerm {
               k: 1.530360471158158,
               q: 0.8463802381765331,
               b: -26.37423386088393,
               c: 26.72967605233235,
               v: 80.151191309598,
            },
            LogisticTerm {
               k: -2.000037807436383e-05,
               q: 109.4126705439222,
               b: 5.504432933925919,
               c: 3.049771481255989e-06,
               v: 1.064738856093674,
            },
            LogisticTerm {
               k: 0.01191318206002477,
               q: 0.6711461584708354,
               b: 3.515529492653092,
               c: 0.0003672617713806172,
               v: 2.535084711091006,
            },
         ],
      }
   }
}

impl ChargeCurve {
   /// Battery voltage after `accumulated` A·s of charge.
   pub fn voltage_at(&self, accumulated: f64) -> f64 {
      let ah = accumulated / 3600.0;
      self.a + self.terms.iter().map(|t| t.eval(ah)).sum::<f64>()
   }

   /// Accumulated charge (A·s) at which the curve reaches `voltage`.
   pub fn invert(&self, voltage: f64) -> f64 {
      if voltage < EMPTY_VOLTAGE {
         return MAX_ACCUMULATED;
      }
      if voltage > self.voltage_at(0.0) {
         return 0.0;
      }

      let mut lo = 0.0;
      let mut hi = MAX_ACCUMULATED;
      let mut mid = 0.0;
      for _ in 0..MAX_ITERATIONS {
         if hi - lo <= TOLERANCE {
            break;
         }
         mid = (lo + hi) / 2.0;
         let m = self.voltage_at(mid);
         if m > voltage {
            lo = mid;
         }
         if m < voltage {
            hi = mid;
         }
      }
      mid
   }
}

/// Affine map taking `in1` to `out1` and `in2` to `out2`, unclamped.
pub fn map(value: f64, in1: f64, in2: f64, out1: f64, out2: f64) -> f64 {
   (out1 * (value - in2) - out2 * (value - in1)) / (in1 - in2)
}
