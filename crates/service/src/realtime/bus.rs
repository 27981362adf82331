//! Per-session publish/subscribe

use super::events::ProgressEvent;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::debug;

/// Publishing side of the event channel
pub trait ProgressSink: Send + Sync {
    fn publish(&self, event: ProgressEvent);
}

/// One broadcast topic per session id.
///
/// Events on a topic reach its subscribers in publish order; topics never
/// see each other's events.
#[derive(Debug)]
pub struct EventBus {
    capacity: usize,
    topics: RwLock<HashMap<String, broadcast::Sender<ProgressEvent>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: RwLock::new(HashMap::new()),
        }
    }

    fn sender(&self, session_id: &str) -> broadcast::Sender<ProgressEvent> {
        if let Some(tx) = self
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
        {
            return tx.clone();
        }
        self.topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Receive every event published for `session_id` from now on
    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<ProgressEvent> {
        self.sender(session_id).subscribe()
    }

    /// Drop a topic; existing receivers see the channel close
    pub fn remove_topic(&self, session_id: &str) -> bool {
        self.topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
            .is_some()
    }

    /// Drop a topic only if nobody is listening on it
    pub fn remove_idle_topic(&self, session_id: &str) -> bool {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        match topics.get(session_id) {
            Some(tx) if tx.receiver_count() == 0 => topics.remove(session_id).is_some(),
            _ => false,
        }
    }

    /// Drop every topic without receivers unless `keep` claims it; returns how many went
    pub fn sweep_idle(&self, keep: impl Fn(&str) -> bool) -> usize {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        let before = topics.len();
        topics.retain(|id, tx| tx.receiver_count() > 0 || keep(id));
        before - topics.len()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl ProgressSink for EventBus {
    fn publish(&self, event: ProgressEvent) {
        let tx = self.sender(&event.session_id);
        if let Err(broadcast::error::SendError(event)) = tx.send(event) {
            debug!(session_id = %event.session_id, stage = %event.stage, "no subscribers for event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::events::Stage;

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = EventBus::new(16);
        let mut a = bus.subscribe("a");
        let mut b = bus.subscribe("b");

        bus.publish(ProgressEvent::new("a", Stage::Loading, 0, "a0"));
        bus.publish(ProgressEvent::new("b", Stage::Loading, 0, "b0"));
        bus.publish(ProgressEvent::new("a", Stage::Loading, 50, "a1"));

        assert_eq!(a.recv().await.unwrap().message, "a0");
        assert_eq!(a.recv().await.unwrap().message, "a1");
        assert_eq!(b.recv().await.unwrap().message, "b0");
        assert!(b.try_recv().is_err());
    }

    #[tokio::test]
    async fn removed_topic_closes_receivers() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe("gone");
        assert!(bus.remove_topic("gone"));
        assert_eq!(bus.topic_count(), 0);
        assert!(matches!(rx.recv().await, Err(broadcast::error::RecvError::Closed)));
    }

    #[tokio::test]
    async fn idle_removal_spares_listened_topics() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe("busy");
        bus.subscribe("idle");
        bus.publish(ProgressEvent::new("orphan", Stage::Loading, 0, "nobody"));
        assert_eq!(bus.topic_count(), 3);

        assert!(!bus.remove_idle_topic("busy"));
        assert!(bus.remove_idle_topic("idle"));
        assert_eq!(bus.sweep_idle(|id| id == "keep"), 1);
        assert_eq!(bus.topic_count(), 1);

        bus.publish(ProgressEvent::new("busy", Stage::Loading, 10, "still here"));
        assert_eq!(rx.recv().await.unwrap().message, "still here");
    }
}
