use crate::metrics::RelayMetrics;
use crate::position::{canonical_entity_id, PositionUpdate};
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

/// Default per-topic buffer. A subscriber that falls further behind than
/// this sees a Lagged gap; it never blocks the publisher or its peers.
pub const DEFAULT_TOPIC_CAPACITY: usize = 256;

/// Publisher fans accepted position writes out to per-entity topics.
///
/// One topic carries all updates for one entity, delivered to each
/// subscriber in the order `publish` was called for that entity. The relay
/// is not a durable log: with no subscribers an update is dropped, and
/// durability stays with the Position Store.
pub struct Publisher {
    /// Lock-free topic registry, keyed by canonical entity id
    topics: DashMap<String, broadcast::Sender<PositionUpdate>>,

    /// Per-topic broadcast buffer size
    topic_capacity: usize,

    metrics: RelayMetrics,
}

impl Publisher {
    pub fn new(metrics: RelayMetrics) -> Self {
        Self::with_capacity(DEFAULT_TOPIC_CAPACITY, metrics)
    }

    pub fn with_capacity(topic_capacity: usize, metrics: RelayMetrics) -> Self {
        Self {
            topics: DashMap::new(),
            topic_capacity,
            metrics,
        }
    }

    /// Publish one update to its entity topic.
    ///
    /// Never fails for the caller. Delivery failures to individual
    /// subscribers are isolated: a lagging receiver skips, everyone else
    /// and the publisher are unaffected.
    pub fn publish(&self, update: PositionUpdate) {
        let key = canonical_entity_id(&update.entity_id);
        self.metrics.record_published();

        let mut dead_topic = false;
        if let Some(tx) = self.topics.get(&key) {
            if tx.send(update).is_err() {
                // All receivers are gone; drop the update and the topic.
                dead_topic = true;
            }
        } else {
            debug!(entity_id = %key, "No subscribers for topic, dropping update");
        }

        if dead_topic {
            self.topics.remove_if(&key, |_, tx| tx.receiver_count() == 0);
        }
    }

    /// Subscribe to the topic for one entity, creating it lazily.
    pub fn subscribe_topic(&self, entity_id: &str) -> broadcast::Receiver<PositionUpdate> {
        let key = canonical_entity_id(entity_id);
        self.topics
            .entry(key)
            .or_insert_with(|| broadcast::channel(self.topic_capacity).0)
            .subscribe()
    }

    /// Number of live subscribers on an entity topic.
    pub fn subscriber_count(&self, entity_id: &str) -> usize {
        self.topics
            .get(&canonical_entity_id(entity_id))
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Number of topics currently registered.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn make_update(entity_id: &str, seq: i64) -> PositionUpdate {
        PositionUpdate::new(
            entity_id,
            12.97,
            77.59,
            Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap() + chrono::Duration::seconds(seq),
        )
    }

    #[tokio::test]
    async fn test_fanout_preserves_per_entity_order() {
        let publisher = Publisher::new(RelayMetrics::new());
        let mut rx = publisher.subscribe_topic("sur009");

        publisher.publish(make_update("sur009", 0));
        publisher.publish(make_update("sur009", 1));

        assert_eq!(rx.recv().await.unwrap().observed_at, make_update("x", 0).observed_at);
        assert_eq!(rx.recv().await.unwrap().observed_at, make_update("x", 1).observed_at);
    }

    #[tokio::test]
    async fn test_no_subscribers_drops_update() {
        let publisher = Publisher::new(RelayMetrics::new());
        // Must not panic or error
        publisher.publish(make_update("sur009", 0));
        assert_eq!(publisher.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let publisher = Publisher::new(RelayMetrics::new());
        let mut rx_a = publisher.subscribe_topic("sur-a");
        let mut rx_b = publisher.subscribe_topic("sur-b");

        publisher.publish(make_update("sur-a", 0));

        assert_eq!(rx_a.recv().await.unwrap().entity_id, "sur-a");
        assert!(matches!(
            rx_b.try_recv(),
            Err(tokio::sync::broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_topic_key_is_case_insensitive() {
        let publisher = Publisher::new(RelayMetrics::new());
        let mut rx = publisher.subscribe_topic("SUR009");

        publisher.publish(make_update("sur009", 0));
        assert!(rx.recv().await.is_ok());
        assert_eq!(publisher.topic_count(), 1);
    }

    #[tokio::test]
    async fn test_dead_topic_removed_on_publish() {
        let publisher = Publisher::new(RelayMetrics::new());
        let rx = publisher.subscribe_topic("sur009");
        drop(rx);

        publisher.publish(make_update("sur009", 0));
        assert_eq!(publisher.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_count() {
        let publisher = Publisher::new(RelayMetrics::new());
        assert_eq!(publisher.subscriber_count("sur009"), 0);

        let _rx1 = publisher.subscribe_topic("sur009");
        let _rx2 = publisher.subscribe_topic("SUR009");
        assert_eq!(publisher.subscriber_count("sur009"), 2);
    }
}
