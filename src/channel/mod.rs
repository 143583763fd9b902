use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

pub mod local;

pub use local::{LocalChannel, LocalChannelFactory};

/// Raw JSON payloads for one topic. The stream ending (or erroring into an
/// end) means the channel dropped for that topic.
pub type TopicStream = Pin<Box<dyn Stream<Item = Value> + Send>>;

/// Push channel errors
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelError {
    ConnectFailed(String),
    SubscribeRejected(String),
    HandshakeTimeout,
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::ConnectFailed(msg) => write!(f, "channel connect failed: {}", msg),
            ChannelError::SubscribeRejected(msg) => {
                write!(f, "topic subscribe rejected: {}", msg)
            }
            ChannelError::HandshakeTimeout => write!(f, "no acknowledgment within handshake window"),
        }
    }
}

impl std::error::Error for ChannelError {}

/// One physical push connection, shared by all of an observer's
/// subscriptions and multiplexing topic subscriptions over it.
///
/// Push channels are not assumed reliable: a returned stream may end at any
/// time, and the subscription layer falls back to polling when it does.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Subscribe to the topic for one entity.
    ///
    /// Resolving successfully is the broker's topic acknowledgment; the
    /// caller bounds the wait with its handshake timeout.
    async fn subscribe_topic(&self, entity_id: &str) -> Result<TopicStream, ChannelError>;
}

/// Establishes push connections, one per observer process.
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    async fn connect(&self, observer_id: &str) -> Result<Arc<dyn PushChannel>, ChannelError>;
}
