//! Charge monitor D-Bus service
//!
//! This service samples the Linux power-supply class, works out which
//! physical limit is governing the charge current and estimates the time
//! until the battery is full, publishing both over D-Bus.

use std::sync::Arc;

use log::{info, warn};
use tokio::signal;
use zbus::{Connection, connection, object_server::InterfaceRef};

use dbus::ChargeMonitorService;
use event::{ChargeEvent, EventQueue};
use monitor::Monitor;

mod config;
mod dbus;
mod error;
mod event;
mod model;
mod monitor;
mod report;
mod sensors;

use crate::{dbus::ChargeMonitorServiceSignals, error::Result};

const BUS_NAME: &str = "org.chargemon";
const OBJECT_PATH: &str = "/org/chargemon/monitor";

#[tokio::main]
async fn main() -> Result<()> {
   env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

   info!("Starting charge monitor D-Bus service...");

   // Load configuration
   let config = config::Config::load()?;
   info!(
      "Loaded configuration, sampling {} every {}ms/{}ms",
      config.sysfs_root.display(),
      config.fast_interval_ms,
      config.slow_interval_ms
   );

   // Monitor events reach D-Bus through this queue
   let events = EventQueue::new();

   // Start sampling
   let monitor = Monitor::new(&config, events.clone())?;

   // Create D-Bus service
   let service = ChargeMonitorService::new(monitor);

   // Build D-Bus connection
   let connection = connection::Builder::session()?
      .name(BUS_NAME)?
      .serve_at(OBJECT_PATH, service)?
      .build()
      .await?;

   info!("Charge monitor D-Bus service started at {BUS_NAME}");

   spawn_dispatcher(events, connection).await?;

   // Wait for shutdown signal
   signal::ctrl_c().await?;
   info!("Shutting down charge monitor...");

   Ok(())
}

/// Forwards monitor events as D-Bus signals until the monitor goes away.
async fn spawn_dispatcher(events: Arc<EventQueue>, connection: Connection) -> Result<()> {
   let iface = connection
      .object_server()
      .interface::<_, ChargeMonitorService>(OBJECT_PATH)
      .await?;
   tokio::spawn(async move {
      while let Some(batch) = events.next_batch().await {
         for event in batch {
            if let Err(e) = dispatch(&iface, event).await {
               warn!("Error dispatching event: {e}");
            }
         }
      }
   });

   Ok(())
}

async fn dispatch(iface: &InterfaceRef<ChargeMonitorService>, event: ChargeEvent) -> Result<()> {
   match event {
      ChargeEvent::StateChanged(state) => {
         iface.state_changed(state.to_str()).await?;
      },
      ChargeEvent::EstimateUpdated { output, summary } => {
         let mut estimate = output.to_json();
         estimate["summary"] = summary.into();
         iface.estimate_updated(&estimate.to_string()).await?;
      },
      ChargeEvent::BatteryFull => {
         iface.battery_full().await?;
      },
   }
   Ok(())
}
