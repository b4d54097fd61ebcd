//! Human-readable charge status.

use std::fmt::Write;

use crate::model::ModelOutput;

/// Display granularity for a given uncertainty, both in seconds.
const GRANULARITY: [(i32, i32); 7] = [
   (10, 1),
   (30, 5),
   (60, 15),
   (10 * 60, 60),
   (30 * 60, 5 * 60),
   (60 * 60, 15 * 60),
   (10 * 3600, 3600),
];
const COARSEST_GRANULARITY: i32 = 5 * 3600;

/// Rounds `seconds` to a step no finer than its uncertainty warrants.
pub fn round_to_granularity(seconds: i32, uncertainty: i32) -> i32 {
   let granularity = GRANULARITY
      .iter()
      .find(|&&(below, _)| uncertainty < below)
      .map_or(COARSEST_GRANULARITY, |&(_, g)| g);
   seconds.saturating_add(granularity / 2) / granularity * granularity
}

/// `H:MM`, `H:MM:SSs` or `Ss`.
pub fn format_remaining(seconds: i32) -> String {
   let hours = seconds / 3600;
   let minutes = seconds % 3600 / 60;
   let secs = seconds % 60;

   if hours == 0 && minutes == 0 {
      return format!("{secs}s");
   }
   let mut out = format!("{hours}:{minutes:02}");
   if secs != 0 {
      let _ = write!(out, ":{secs:02}s");
   }
   out
}

/// Remaining time, rounded for display, when the estimate is usable.
pub fn remaining(output: &ModelOutput) -> Option<String> {
   (output.seconds_remaining > 0 && output.seconds_remaining_uncertainty >= 0).then(|| {
      format_remaining(round_to_granularity(
         output.seconds_remaining,
         output.seconds_remaining_uncertainty,
      ))
   })
}

/// One-line status, e.g. `"75% charged, topping off, 0:35 remaining"`.
/// `capacity` is the state of charge as a fraction.
pub fn summary(output: &ModelOutput, capacity: Option<f64>) -> String {
   let mut out = String::new();
   if let Some(capacity) = capacity {
      let _ = write!(out, "{}% charged, ", (capacity * 100.0).round() as i32);
   }
   out.push_str(output.state.description());
   if let Some(time) = remaining(output) {
      let _ = write!(out, ", {time} remaining");
   }
   out
}
