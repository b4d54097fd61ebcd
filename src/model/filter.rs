//! Moving-average smoothing of raw readings.

/// Number of samples averaged by every filter in the model.
pub const HISTORY_LENGTH: usize = 20;

/// Fixed-capacity moving average with a running sum.
#[derive(Debug, Clone, Copy)]
pub struct MovingAverageFilter {
   history: [f64; HISTORY_LENGTH],
   head: usize,
   count: usize,
   sum: f64,
}

impl Default for MovingAverageFilter {
   fn default() -> Self {
      Self::new()
   }
}

impl MovingAverageFilter {
   pub const fn new() -> Self {
      Self {
         history: [0.0; HISTORY_LENGTH],
         head: 0,
         count: 0,
         sum: 0.0,
      }
   }

   /// Adds a sample, evicting the oldest one once the buffer is full.
   pub fn integrate(&mut self, value: f64) {
      if self.count == HISTORY_LENGTH {
         self.sum -= self.history[self.head];
      } else {
         self.count += 1;
      }
      self.sum += value;
      self.history[self.head] = value;
      self.head = (self.head + 1) % HISTORY_LENGTH;
   }

   /// Mean of the retained samples, `None` before the first sample.
   pub fn average(&self) -> Option<f64> {
      (self.count > 0).then(|| self.sum / self.count as f64)
   }
}
