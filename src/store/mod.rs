use crate::position::PositionUpdate;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

pub mod http;

pub use http::HttpPositionStore;

/// Position store query errors.
///
/// A failed query is a skippable condition for the polling loop: it logs,
/// counts and retries on the next tick. Nothing here terminates a
/// subscription.
#[derive(Debug)]
pub enum StoreError {
    Request(String),
    Status(u16),
    Parse(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Request(msg) => write!(f, "store request failed: {}", msg),
            StoreError::Status(code) => write!(f, "store returned status {}", code),
            StoreError::Parse(msg) => write!(f, "store response parse failed: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// The Position Store collaborator: accepts location writes (out of scope
/// here) and answers latest-position and track queries.
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Latest accepted fix for an entity, None when the store has no fix yet.
    async fn latest_position(&self, entity_id: &str)
        -> Result<Option<PositionUpdate>, StoreError>;

    /// Fixes between two timestamps, oldest first.
    async fn track(
        &self,
        entity_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PositionUpdate>, StoreError>;
}
