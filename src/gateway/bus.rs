use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::DispatchError;
use crate::models::event::{
    DispatchEvent, TOPIC_DRIVER_STATUS, TOPIC_RIDE_CANCELLED, TOPIC_RIDE_REQUESTED,
};

/// Topics whose events are work for the gateway. Publishing to one of these
/// never evicts an unread event; a full topic refuses the publish instead.
pub const WORK_TOPICS: [&str; 3] = [TOPIC_RIDE_REQUESTED, TOPIC_RIDE_CANCELLED, TOPIC_DRIVER_STATUS];

/// Topic-addressed message channel. The only way events enter or leave the
/// dispatch core; a broker-backed implementation reports outages as
/// `DispatchError::Unavailable`.
pub trait MessageBus: Send + Sync {
    fn publish(&self, topic: &str, event: DispatchEvent) -> Result<(), DispatchError>;

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<DispatchEvent>;
}

/// In-process bus: one broadcast channel per topic, created on first use.
///
/// Work topics apply backpressure: once the slowest subscriber has
/// `capacity` unread events, `publish` fails with `Unavailable` and the
/// caller retries. Other topics fan out to observers, and an observer that
/// falls behind loses the oldest events.
pub struct InProcessBus {
    capacity: usize,
    topics: DashMap<String, broadcast::Sender<DispatchEvent>>,
}

impl InProcessBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: DashMap::new(),
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<DispatchEvent> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl MessageBus for InProcessBus {
    fn publish(&self, topic: &str, event: DispatchEvent) -> Result<(), DispatchError> {
        if !WORK_TOPICS.contains(&topic) {
            if self.sender(topic).send(event).is_err() {
                debug!(topic, "published with no subscribers");
            }
            return Ok(());
        }

        // Holding the topic entry makes the fullness check and the send one step.
        let sender = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        if sender.len() >= self.capacity {
            warn!(topic, capacity = self.capacity, "work topic full, refusing publish");
            return Err(DispatchError::Unavailable(format!("topic {topic} is full")));
        }
        if sender.send(event).is_err() {
            debug!(topic, "published with no subscribers");
        }
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<DispatchEvent> {
        self.sender(topic).subscribe()
    }
}
