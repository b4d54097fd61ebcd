use log::info;
use zbus::{interface, object_server::SignalEmitter};

use crate::monitor::Monitor;

pub struct ChargeMonitorService {
   monitor: Monitor,
}

impl ChargeMonitorService {
   pub const fn new(monitor: Monitor) -> Self {
      Self { monitor }
   }
}

#[interface(name = "org.chargemon.Monitor")]
impl ChargeMonitorService {
   async fn get_status(&self) -> zbus::fdo::Result<String> {
      let status = self
         .monitor
         .status()
         .await
         .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
      Ok(status.to_json().to_string())
   }

   async fn get_readings(&self) -> zbus::fdo::Result<String> {
      let readings = self
         .monitor
         .readings()
         .await
         .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
      Ok(readings.to_json().to_string())
   }

   async fn watch(&self) -> zbus::fdo::Result<()> {
      self
         .monitor
         .watch()
         .await
         .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
      info!("Client started watching");
      Ok(())
   }

   async fn unwatch(&self) -> zbus::fdo::Result<()> {
      self
         .monitor
         .unwatch()
         .await
         .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
      info!("Client stopped watching");
      Ok(())
   }

   // Signals
   #[zbus(signal)]
   pub async fn state_changed(emitter: &SignalEmitter<'_>, state: &str) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn estimate_updated(emitter: &SignalEmitter<'_>, estimate: &str)
   -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn battery_full(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

   // Properties for polling-free updates
   #[zbus(property)]
   async fn charging_state(&self) -> String {
      self
         .monitor
         .status()
         .await
         .map(|s| s.output.state.to_str().to_owned())
         .unwrap_or_default()
   }

   #[zbus(property)]
   async fn seconds_remaining(&self) -> i32 {
      self
         .monitor
         .status()
         .await
         .map_or(-1, |s| s.output.seconds_remaining)
   }
}
