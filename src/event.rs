//! Event handling system for charge status updates.
//!
//! This module provides the event infrastructure for notifying about
//! charging state transitions, new time-to-full estimates and the battery
//! reaching full charge.

use std::{sync::Arc, time::Duration};

use crossbeam::queue::SegQueue;
use tokio::{sync::Notify, time};

use crate::model::{ChargingState, ModelOutput};

/// How often an idle consumer checks whether the producers are gone.
const IDLE_CHECK: Duration = Duration::from_secs(1);

/// Events that can be emitted by the monitor.
#[derive(Debug, Clone, PartialEq)]
pub enum ChargeEvent {
   StateChanged(ChargingState),
   /// The estimate changed; carries the new output and a one-line summary.
   EstimateUpdated { output: ModelOutput, summary: String },
   BatteryFull,
}

impl ChargeEvent {
   const fn is_estimate(&self) -> bool {
      matches!(self, Self::EstimateUpdated { .. })
   }
}

/// Trait for implementing event emission.
pub trait EventBus: Send + Sync {
   /// Emits an event to all registered listeners.
   fn emit(&self, event: ChargeEvent);
}

/// Type alias for a thread-safe event sender.
pub type EventSender = Arc<dyn EventBus>;

/// Lock-free queue between the monitor and a single consumer.
///
/// The consumer takes events in batches. A batch keeps every state change and
/// full-battery event in order, but only the newest estimate: an older one is
/// stale by the time it could be sent.
pub struct EventQueue {
   queue: SegQueue<ChargeEvent>,
   notifier: Notify,
}

impl EventQueue {
   pub fn new() -> Arc<Self> {
      Arc::new(Self {
         queue: SegQueue::new(),
         notifier: Notify::new(),
      })
   }

   /// Takes everything queued so far.
   pub fn drain(&self) -> Vec<ChargeEvent> {
      let mut events = Vec::with_capacity(self.queue.len());
      while let Some(event) = self.queue.pop() {
         events.push(event);
      }
      coalesce(events)
   }

   /// Waits for the next non-empty batch. Returns `None` once the queue is
   /// drained and no producer holds it any more.
   pub async fn next_batch(self: &Arc<Self>) -> Option<Vec<ChargeEvent>> {
      loop {
         // Register before draining so an emit in between still wakes us
         let notified = self.notifier.notified();
         let batch = self.drain();
         if !batch.is_empty() {
            return Some(batch);
         }
         if Arc::strong_count(self) == 1 {
            return None;
         }
         let _ = time::timeout(IDLE_CHECK, notified).await;
      }
   }
}

impl EventBus for EventQueue {
   fn emit(&self, event: ChargeEvent) {
      self.queue.push(event);
      self.notifier.notify_waiters();
   }
}

/// Drops every estimate but the last one, keeping the order of the rest.
fn coalesce(events: Vec<ChargeEvent>) -> Vec<ChargeEvent> {
   let Some(last) = events.iter().rposition(ChargeEvent::is_estimate) else {
      return events;
   };
   events
      .into_iter()
      .enumerate()
      .filter(|(i, event)| *i == last || !event.is_estimate())
      .map(|(_, event)| event)
      .collect()
}
