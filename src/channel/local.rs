use super::{ChannelError, ChannelFactory, PushChannel, TopicStream};
use crate::publisher::Publisher;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

/// In-process push channel over a [`Publisher`].
///
/// Used when the publisher and its observers share a process (tests,
/// embedded deployments). Updates cross the channel as JSON payloads so the
/// wire contract is identical to a networked broker.
pub struct LocalChannel {
    publisher: Arc<Publisher>,
}

#[async_trait]
impl PushChannel for LocalChannel {
    async fn subscribe_topic(&self, entity_id: &str) -> Result<TopicStream, ChannelError> {
        let rx = self.publisher.subscribe_topic(entity_id);
        let entity = entity_id.to_string();
        let stream = BroadcastStream::new(rx).filter_map(move |item| {
            let entity = entity.clone();
            async move {
                match item {
                    Ok(update) => serde_json::to_value(&update).ok(),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(entity_id = %entity, skipped, "Local channel lagged, skipped updates");
                        None
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

/// Factory handing out [`LocalChannel`]s bound to one publisher.
#[derive(Clone)]
pub struct LocalChannelFactory {
    publisher: Arc<Publisher>,
}

impl LocalChannelFactory {
    pub fn new(publisher: Arc<Publisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl ChannelFactory for LocalChannelFactory {
    async fn connect(&self, _observer_id: &str) -> Result<Arc<dyn PushChannel>, ChannelError> {
        Ok(Arc::new(LocalChannel {
            publisher: Arc::clone(&self.publisher),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RelayMetrics;
    use crate::position::PositionUpdate;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn test_local_channel_delivers_json_payloads() {
        let publisher = Arc::new(Publisher::new(RelayMetrics::new()));
        let factory = LocalChannelFactory::new(Arc::clone(&publisher));

        let channel = factory.connect("dashboard-1").await.unwrap();
        let mut stream = channel.subscribe_topic("sur009").await.unwrap();

        publisher.publish(PositionUpdate::new(
            "sur009",
            12.97,
            77.59,
            Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap(),
        ));

        let payload = stream.next().await.unwrap();
        assert_eq!(payload["entityId"], "sur009");
        assert_eq!(payload["latitude"], 12.97);
    }

    #[tokio::test]
    async fn test_stream_ends_when_publisher_dropped() {
        let publisher = Arc::new(Publisher::new(RelayMetrics::new()));
        let factory = LocalChannelFactory::new(Arc::clone(&publisher));

        let channel = factory.connect("dashboard-1").await.unwrap();
        let mut stream = channel.subscribe_topic("sur009").await.unwrap();

        drop(factory);
        drop(channel);
        drop(publisher);

        assert!(stream.next().await.is_none());
    }
}
