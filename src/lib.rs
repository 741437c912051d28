pub mod config;
pub mod database;
pub mod geo;
pub mod handler;
pub mod journal;
pub mod listener;
pub mod models;
pub mod report;
pub mod scan;
pub mod sink;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use config::Config;
use geo::{GeoClient, Locator};
use handler::HandlerContext;
use listener::ListenerManager;
use models::{Event, EventFilter};
use sink::EventSink;

/// Core decoyd instance
pub struct Sensor {
    config: Config,
    sink: Arc<EventSink>,
    locator: Arc<dyn Locator>,
}

impl Sensor {
    /// Create a new sensor instance
    pub fn new(config: Config) -> Result<Self> {
        let locator: Arc<dyn Locator> = Arc::new(GeoClient::new(&config.geo)?);
        let sink = Arc::new(EventSink::open(&config)?);

        Ok(Self {
            config,
            sink,
            locator,
        })
    }

    /// Create instance with a custom location resolver
    pub fn with_locator(config: Config, locator: Arc<dyn Locator>) -> Result<Self> {
        let sink = Arc::new(EventSink::open(&config)?);

        Ok(Self {
            config,
            sink,
            locator,
        })
    }

    /// Get configuration reference
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get event sink reference
    pub fn sink(&self) -> &Arc<EventSink> {
        &self.sink
    }

    /// Run all listeners until the shutdown signal fires.
    ///
    /// Connections still in flight when the signal arrives are allowed
    /// to finish recording before this returns.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let manager = ListenerManager::bind(&self.config.listener).await?;

        let failed = manager.failed_ports();
        if !failed.is_empty() {
            warn!("Continuing without unavailable ports: {:?}", failed);
        }

        let ctx = Arc::new(HandlerContext {
            sink: self.sink.clone(),
            locator: self.locator.clone(),
            read_timeout: Duration::from_secs(self.config.listener.read_timeout_secs),
            max_read_bytes: self.config.listener.max_read_bytes,
            payload_cap_chars: self.config.listener.payload_cap_chars,
        });

        manager.serve(ctx, shutdown).await;

        info!("All listeners stopped");
        Ok(())
    }

    /// Query recorded events from the structured store
    pub fn events(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        self.sink.query(filter)
    }

    /// Re-run location lookups for addresses recorded without a usable
    /// location. Returns (addresses updated, addresses attempted).
    pub async fn backfill_locations(&self, delay: Duration) -> Result<(usize, usize)> {
        let pending = self.sink.database().addresses_lacking_location()?;
        let total = pending.len();
        let mut updated = 0;

        for (idx, addr) in pending.iter().enumerate() {
            let location = self.locator.locate(*addr).await;

            if location == "Unknown" {
                debug!("Location for {} is still unresolved", addr);
            } else {
                let rows = self.sink.database().update_location(addr, &location)?;
                info!("Set location for {} on {} event(s): {}", addr, rows, location);
                updated += 1;
            }

            if idx + 1 < total {
                tokio::time::sleep(delay).await;
            }
        }

        Ok((updated, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_creation() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.general.journal_path = dir
            .path()
            .join("events.jsonl")
            .to_string_lossy()
            .into_owned();
        config.general.db_path = dir.path().join("decoyd.db").to_string_lossy().into_owned();

        let sensor = Sensor::new(config).unwrap();
        assert_eq!(sensor.config().detector.port_threshold, 5);
        assert_eq!(sensor.sink().database().count_events().unwrap(), 0);
    }
}
