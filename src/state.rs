use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::config::Config;
use crate::engine::Dispatcher;
use crate::gateway::bus::{InProcessBus, MessageBus};
use crate::models::event::DeadLetter;
use crate::observability::metrics::Metrics;

pub struct AppState {
    pub config: Config,
    pub dispatcher: Dispatcher,
    pub bus: Arc<dyn MessageBus>,
    pub dead_letters: DashMap<Uuid, DeadLetter>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let bus = Arc::new(InProcessBus::new(config.event_buffer_size));
        Self::with_bus(config, bus)
    }

    pub fn with_bus(config: Config, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            dispatcher: Dispatcher::new(&config),
            config,
            bus,
            dead_letters: DashMap::new(),
            metrics: Metrics::new(),
        }
    }

    /// Recomputes gauges by scanning drivers and listings. Run from the
    /// sweeper tick and on scrape, never per request.
    pub fn refresh_gauges(&self) {
        let now = chrono::Utc::now();
        self.metrics
            .grab_pool_size
            .set(self.dispatcher.marketplace.open_count(now) as i64);
        self.metrics
            .drivers_available
            .set(self.dispatcher.directory.available_count() as i64);
    }
}
