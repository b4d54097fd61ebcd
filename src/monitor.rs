//! Sampling loop and owner of the charging model.
//!
//! A single actor task owns the sensor store, the model and the sample log.
//! It ticks on a cadence that follows the charger status and the number of
//! watching clients, and is queried through the [`Monitor`] handle.

use std::time::Duration;

use log::{debug, info, warn};
use serde_json::json;
use tokio::{
   select,
   sync::{mpsc, oneshot},
   time::{self, Instant},
};

use crate::{
   config::Config,
   error::{ChargeMonError, Result},
   event::{ChargeEvent, EventSender},
   model::{ChargingModel, ModelOutput},
   report,
   sensors::{
      ChargeStatus, Entry, SensorStore, sample_log::SampleLog, sysfs::SysfsCollector,
   },
};

/// Channel buffer size
const CHANNEL_BUFFER_SIZE: usize = 64;

/// Latest model output with the state of charge it was computed at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusReport {
   pub output: ModelOutput,
   /// State of charge as a fraction.
   pub capacity: Option<f64>,
}

impl StatusReport {
   pub fn summary(&self) -> String {
      report::summary(&self.output, self.capacity)
   }

   pub fn to_json(&self) -> serde_json::Value {
      json!({
         "state": self.output.state.to_str(),
         "seconds_remaining": self.output.seconds_remaining,
         "uncertainty": self.output.seconds_remaining_uncertainty,
         "summary": self.summary(),
         "capacity": self.capacity,
      })
   }
}

#[derive(Debug)]
enum MonitorCommand {
   GetStatus(oneshot::Sender<StatusReport>),
   GetReadings(oneshot::Sender<SensorStore>),
   Watch,
   Unwatch,
}

/// Handle to the monitor actor.
#[derive(Clone)]
pub struct Monitor {
   inbox: mpsc::Sender<MonitorCommand>,
}

impl Monitor {
   pub fn new(config: &Config, event_tx: EventSender) -> Result<Self> {
      let (command_tx, command_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
      let actor = MonitorActor::new(config, event_tx, command_rx)?;
      tokio::spawn(actor.run());
      Ok(Self { inbox: command_tx })
   }

   pub async fn status(&self) -> Result<StatusReport> {
      let (tx, rx) = oneshot::channel();
      self.send(MonitorCommand::GetStatus(tx)).await?;
      rx.await.map_err(|_| ChargeMonError::MonitorShutdown)
   }

   pub async fn readings(&self) -> Result<SensorStore> {
      let (tx, rx) = oneshot::channel();
      self.send(MonitorCommand::GetReadings(tx)).await?;
      rx.await.map_err(|_| ChargeMonError::MonitorShutdown)
   }

   /// Registers a client showing the estimate; sampling speeds up while any
   /// client watches.
   pub async fn watch(&self) -> Result<()> {
      self.send(MonitorCommand::Watch).await
   }

   pub async fn unwatch(&self) -> Result<()> {
      self.send(MonitorCommand::Unwatch).await
   }

   async fn send(&self, cmd: MonitorCommand) -> Result<()> {
      self
         .inbox
         .send(cmd)
         .await
         .map_err(|_| ChargeMonError::MonitorShutdown)
   }
}

/// Whether the device draws from an external supply, as far as sampling is
/// concerned. Only a readable `Discharging` status counts as battery.
fn on_external_power(status: Option<ChargeStatus>) -> bool {
   status != Some(ChargeStatus::Discharging)
}

fn wants_fast_ticks(status: Option<ChargeStatus>, watchers: u32) -> bool {
   watchers > 0 || on_external_power(status)
}

/// Tick period for the current conditions.
pub fn cadence(
   status: Option<ChargeStatus>,
   watchers: u32,
   fast: Duration,
   slow: Duration,
) -> Duration {
   if wants_fast_ticks(status, watchers) { fast } else { slow }
}

struct MonitorActor {
   event_tx: EventSender,
   command_rx: mpsc::Receiver<MonitorCommand>,
   collector: SysfsCollector,
   sample_log: Option<SampleLog>,
   fast_interval: Duration,
   slow_interval: Duration,
   full_sample_every: u32,

   // State
   store: SensorStore,
   model: ChargingModel,
   watchers: u32,
   slow_ticks: u32,
   full_armed: bool,
}

impl MonitorActor {
   fn new(
      config: &Config,
      event_tx: EventSender,
      command_rx: mpsc::Receiver<MonitorCommand>,
   ) -> Result<Self> {
      let sample_log = config.sample_log_path()?.map(SampleLog::new);
      Ok(Self {
         event_tx,
         command_rx,
         collector: SysfsCollector::new(&config.sysfs_root, config.averaging_samples),
         sample_log,
         fast_interval: config.fast_interval(),
         slow_interval: config.slow_interval(),
         full_sample_every: config.full_sample_every.max(1),
         store: SensorStore::new(),
         model: ChargingModel::new(),
         watchers: 0,
         slow_ticks: 0,
         full_armed: true,
      })
   }

   async fn run(mut self) {
      info!(
         "Charge monitor starting up, reading {}",
         self.collector.root().display()
      );

      // Start from a complete picture
      self.full_tick();
      let mut next_tick = Instant::now() + self.period();

      loop {
         select! {
            () = time::sleep_until(next_tick) => {
               self.tick();
               next_tick = Instant::now() + self.period();
            }
            cmd = self.command_rx.recv() => {
               let Some(cmd) = cmd else {
                  info!("Charge monitor shutting down");
                  break;
               };
               self.handle_command(cmd);
               // A new watcher should not wait out a slow period
               next_tick = next_tick.min(Instant::now() + self.period());
            }
         }
      }
   }

   fn period(&self) -> Duration {
      cadence(
         self.store.status(),
         self.watchers,
         self.fast_interval,
         self.slow_interval,
      )
   }

   fn handle_command(&mut self, cmd: MonitorCommand) {
      match cmd {
         MonitorCommand::GetStatus(reply) => {
            let _ = reply.send(self.status_report());
         },
         MonitorCommand::GetReadings(reply) => {
            let _ = reply.send(self.store.clone());
         },
         MonitorCommand::Watch => {
            self.watchers += 1;
            debug!("Watchers: {}", self.watchers);
         },
         MonitorCommand::Unwatch => {
            self.watchers = self.watchers.saturating_sub(1);
            debug!("Watchers: {}", self.watchers);
         },
      }
   }

   fn status_report(&self) -> StatusReport {
      StatusReport {
         output: self.model.output(),
         capacity: self.store.number(Entry::BatteryCapacity),
      }
   }

   fn tick(&mut self) {
      if wants_fast_ticks(self.store.status(), self.watchers) {
         self.slow_ticks = 0;
         self.full_tick();
         return;
      }

      if self.slow_ticks >= self.full_sample_every {
         self.slow_ticks = 0;
         self.full_tick();
      } else {
         self.slow_ticks += 1;
         let status = self.collector.collect_status(&mut self.store);
         self.check_full(status);
      }
   }

   /// Reads every sensor, logs the raw sample and runs the model.
   fn full_tick(&mut self) {
      let line = self.collector.collect(&mut self.store);
      if let Some(log) = &mut self.sample_log
         && let Err(e) = log.append(&line)
      {
         warn!("Failed to write sample log {}: {e}", log.path().display());
      }

      let previous = self.model.output();
      self.store.clear_derived();
      let output = self.model.update(&mut self.store);
      debug!(
         "Model: {} {}s ± {}s",
         self.model.state(),
         self.model.seconds_remaining(),
         self.model.seconds_remaining_uncertainty()
      );
      self.publish(previous, output);
      self.check_full(self.store.status());
   }

   fn publish(&self, previous: ModelOutput, output: ModelOutput) {
      if output.state != previous.state {
         self.event_tx.emit(ChargeEvent::StateChanged(output.state));
      }
      if output != previous {
         self.event_tx.emit(ChargeEvent::EstimateUpdated {
            output,
            summary: self.status_report().summary(),
         });
      }
   }

   /// Fires once per transition into `Full`.
   fn check_full(&mut self, status: Option<ChargeStatus>) {
      match status {
         Some(ChargeStatus::Full) => {
            if self.full_armed {
               info!("Battery full");
               self.event_tx.emit(ChargeEvent::BatteryFull);
               self.full_armed = false;
            }
         },
         Some(_) => self.full_armed = true,
         None => {},
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   use std::{
      fs,
      path::Path,
      sync::{Arc, Mutex},
   };

   use tempfile::TempDir;

   use crate::{event::EventBus, model::ChargingState};

   const FAST: Duration = Duration::from_millis(1000);
   const SLOW: Duration = Duration::from_millis(5000);

   #[derive(Default)]
   struct Recorder {
      events: Mutex<Vec<ChargeEvent>>,
   }

   impl Recorder {
      fn take(&self) -> Vec<ChargeEvent> {
         std::mem::take(&mut *self.events.lock().unwrap())
      }
   }

   impl EventBus for Recorder {
      fn emit(&self, event: ChargeEvent) {
         self.events.lock().unwrap().push(event);
      }
   }

   fn write(root: &Path, path: &str, contents: &str) {
      let full = root.join(path);
      fs::create_dir_all(full.parent().unwrap()).unwrap();
      fs::write(full, contents).unwrap();
   }

   /// Charging from DC at 1.95 A of a 2 A limit.
   fn charger_tree(root: &Path, status: &str) {
      write(root, "battery/status", status);
      write(root, "battery/current_now", "1950000\n");
      write(root, "battery/voltage_now", "4100000\n");
      write(root, "bms/charge_counter_shadow", "1200000\n");
      write(root, "bms/resistance", "100000\n");
      write(root, "qpnp-dc/voltage_now", "5000000\n");
      write(root, "qpnp-dc/present", "1\n");
      write(root, "qpnp-dc/current_max", "2000000\n");
      write(root, "usb/voltage_now", "0\n");
      write(root, "usb/present", "0\n");
      write(root, "usb/current_max", "500000\n");
      write(root, "battery/temp", "285\n");
      write(root, "battery/capacity", "50\n");
   }

   fn actor(dir: &TempDir, log: bool) -> (MonitorActor, Arc<Recorder>) {
      let config = Config {
         sysfs_root: dir.path().join("power_supply"),
         full_sample_every: 3,
         averaging_samples: 1,
         sample_log: log,
         sample_log_path: Some(dir.path().join("samples.log")),
         ..Config::default()
      };
      let recorder = Arc::new(Recorder::default());
      let (_tx, rx) = mpsc::channel(1);
      let actor = MonitorActor::new(&config, recorder.clone(), rx).unwrap();
      (actor, recorder)
   }

   #[test]
   fn test_cadence() {
      use ChargeStatus::*;
      assert_eq!(cadence(Some(Charging), 0, FAST, SLOW), FAST);
      assert_eq!(cadence(Some(Full), 0, FAST, SLOW), FAST);
      assert_eq!(cadence(Some(Unknown), 0, FAST, SLOW), FAST);
      assert_eq!(cadence(Some(Discharging), 0, FAST, SLOW), SLOW);
      assert_eq!(cadence(None, 0, FAST, SLOW), FAST);
      assert_eq!(cadence(Some(Discharging), 1, FAST, SLOW), FAST);
      assert_eq!(cadence(None, 2, FAST, SLOW), FAST);
   }

   #[test]
   fn test_full_tick_runs_model_and_logs() {
      let dir = TempDir::new().unwrap();
      charger_tree(&dir.path().join("power_supply"), "Charging\n");
      let (mut actor, recorder) = actor(&dir, true);

      actor.full_tick();
      assert_eq!(actor.model.state(), ChargingState::InputCurrentLimit);

      let events = recorder.take();
      assert_eq!(events.len(), 2);
      assert_eq!(
         events[0],
         ChargeEvent::StateChanged(ChargingState::InputCurrentLimit)
      );
      let ChargeEvent::EstimateUpdated { output, summary } = &events[1] else {
         panic!("unexpected event {:?}", events[1]);
      };
      assert_eq!(*output, actor.model.output());
      assert!(summary.starts_with("50% charged, limited by supply current"));

      let log = fs::read_to_string(dir.path().join("samples.log")).unwrap();
      let columns: Vec<&str> = log.trim_end().split(' ').collect();
      // Timestamp plus every logged entry, capacity excluded
      assert_eq!(columns.len(), 13);
      assert_eq!(columns[1], "Charging");
      assert_eq!(columns[2], "1950000");
   }

   #[test]
   fn test_unchanged_output_is_quiet() {
      let dir = TempDir::new().unwrap();
      charger_tree(&dir.path().join("power_supply"), "Discharging\n");
      let (mut actor, recorder) = actor(&dir, false);

      // Discharging keeps the initial NotCharging output
      actor.full_tick();
      actor.full_tick();
      assert!(recorder.take().is_empty());
      assert!(!dir.path().join("samples.log").exists());
   }

   #[test]
   fn test_slow_ticks_sample_periodically() {
      let dir = TempDir::new().unwrap();
      let root = dir.path().join("power_supply");
      charger_tree(&root, "Discharging\n");
      let (mut actor, _recorder) = actor(&dir, true);
      let log_path = dir.path().join("samples.log");
      actor.collector.collect_status(&mut actor.store);

      // Every third status-only tick is followed by a full one
      for _ in 0..3 {
         actor.tick();
      }
      assert!(!log_path.exists());
      assert_eq!(actor.store.status(), Some(ChargeStatus::Discharging));
      assert_eq!(actor.store.number(Entry::BatteryCurrent), None);
      assert_eq!(actor.slow_ticks, 3);

      actor.tick();
      assert_eq!(fs::read_to_string(&log_path).unwrap().lines().count(), 1);
      assert!(actor.store.number(Entry::BatteryCurrent).is_some());
      assert_eq!(actor.slow_ticks, 0);

      actor.tick();
      assert_eq!(fs::read_to_string(&log_path).unwrap().lines().count(), 1);
      assert_eq!(actor.slow_ticks, 1);
   }

   #[test]
   fn test_plugging_in_switches_to_fast_ticks() {
      let dir = TempDir::new().unwrap();
      let root = dir.path().join("power_supply");
      charger_tree(&root, "Discharging\n");
      let (mut actor, recorder) = actor(&dir, false);
      actor.collector.collect_status(&mut actor.store);

      actor.tick();
      assert_eq!(actor.period(), SLOW);

      write(&root, "battery/status", "Charging\n");
      // Status-only tick notices the charger
      actor.tick();
      assert_eq!(actor.period(), FAST);
      assert!(recorder.take().is_empty());

      actor.tick();
      assert_eq!(actor.model.state(), ChargingState::InputCurrentLimit);
      assert_eq!(actor.slow_ticks, 0);
   }

   #[test]
   fn test_unreadable_status_samples_fast() {
      let dir = TempDir::new().unwrap();
      let root = dir.path().join("power_supply");
      charger_tree(&root, "Discharging\n");
      fs::remove_file(root.join("battery/status")).unwrap();
      let (mut actor, _recorder) = actor(&dir, true);
      let log_path = dir.path().join("samples.log");

      assert_eq!(actor.period(), FAST);
      actor.tick();
      actor.tick();
      assert_eq!(actor.store.status(), None);
      assert_eq!(actor.period(), FAST);
      assert_eq!(fs::read_to_string(&log_path).unwrap().lines().count(), 2);
      assert_eq!(actor.slow_ticks, 0);
   }

   #[test]
   fn test_battery_full_fires_once() {
      let dir = TempDir::new().unwrap();
      let root = dir.path().join("power_supply");
      charger_tree(&root, "Full\n");
      let (mut actor, recorder) = actor(&dir, false);

      let full_events = |events: Vec<ChargeEvent>| {
         events
            .into_iter()
            .filter(|e| *e == ChargeEvent::BatteryFull)
            .count()
      };

      actor.full_tick();
      actor.full_tick();
      assert_eq!(full_events(recorder.take()), 1);

      write(&root, "battery/status", "Charging\n");
      actor.full_tick();
      write(&root, "battery/status", "Full\n");
      actor.full_tick();
      assert_eq!(full_events(recorder.take()), 1);
   }

   #[test]
   fn test_watchers() {
      let dir = TempDir::new().unwrap();
      charger_tree(&dir.path().join("power_supply"), "Discharging\n");
      let (mut actor, _recorder) = actor(&dir, false);
      actor.full_tick();
      assert_eq!(actor.period(), SLOW);

      actor.handle_command(MonitorCommand::Watch);
      assert_eq!(actor.period(), FAST);
      actor.handle_command(MonitorCommand::Unwatch);
      actor.handle_command(MonitorCommand::Unwatch);
      assert_eq!(actor.watchers, 0);
      assert_eq!(actor.period(), SLOW);
   }

   #[test]
   fn test_status_report_json() {
      let report = StatusReport {
         output: ModelOutput {
            state: ChargingState::BatteryVoltageLimit,
            seconds_remaining: 2111,
            seconds_remaining_uncertainty: 160,
         },
         capacity: Some(0.75),
      };
      let json = report.to_json();
      assert_eq!(json["state"], "BatteryVoltageLimit");
      assert_eq!(json["seconds_remaining"], 2111);
      assert_eq!(json["uncertainty"], 160);
      assert_eq!(json["capacity"], 0.75);
      assert_eq!(json["summary"], "75% charged, topping off, 0:35 remaining");
   }

   #[tokio::test]
   async fn test_handle_queries_actor() -> Result<()> {
      let dir = TempDir::new().unwrap();
      charger_tree(&dir.path().join("power_supply"), "Charging\n");
      let config = Config {
         sysfs_root: dir.path().join("power_supply"),
         sample_log: false,
         ..Config::default()
      };
      let monitor = Monitor::new(&config, Arc::new(Recorder::default()))?;

      monitor.watch().await?;
      let status = monitor.status().await?;
      assert_eq!(status.output.state, ChargingState::InputCurrentLimit);
      assert_eq!(status.capacity, Some(0.5));

      let readings = monitor.readings().await?;
      assert!(readings.number(Entry::InternalResistance).is_some());
      monitor.unwatch().await?;
      Ok(())
   }
}
