use crate::position::PositionUpdate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Client → Server message types
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "subscribe")]
    Subscribe { entity_id: String },
    #[serde(rename = "unsubscribe")]
    Unsubscribe { entity_id: String },
}

/// Server → Client: topic acknowledgment
///
/// Sent once per subscribe/unsubscribe. The subscribe ack is the handshake
/// acknowledgment observers wait on before treating the topic as live.
#[derive(Debug, Clone, Serialize)]
pub struct AckMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub entity_id: String,
}

impl AckMessage {
    pub fn subscribed(entity_id: String) -> Self {
        Self {
            msg_type: "subscribed".to_string(),
            entity_id,
        }
    }

    pub fn unsubscribed(entity_id: String) -> Self {
        Self {
            msg_type: "unsubscribed".to_string(),
            entity_id,
        }
    }
}

/// Server → Client: position update notification
#[derive(Debug, Clone, Serialize)]
pub struct PositionMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub entity_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl From<PositionUpdate> for PositionMessage {
    fn from(update: PositionUpdate) -> Self {
        Self {
            msg_type: "position".to_string(),
            entity_id: update.entity_id,
            latitude: update.latitude,
            longitude: update.longitude,
            timestamp: update.observed_at,
        }
    }
}

/// Server → Client: error message
#[derive(Debug, Clone, Serialize)]
pub struct ErrorMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub error: String,
}

impl ErrorMessage {
    pub fn new(error: String) -> Self {
        Self {
            msg_type: "error".to_string(),
            error,
        }
    }
}
