use super::{PositionStore, StoreError};
use crate::position::{canonical_entity_id, PositionUpdate};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::StatusCode;
use serde::Deserialize;

/// Position store reached over HTTP.
///
/// Endpoints:
/// - `GET {base}/location/{entityId}/latest`
/// - `GET {base}/location/{entityId}/track?from=<ISO8601>&to=<ISO8601>`
#[derive(Clone)]
pub struct HttpPositionStore {
    client: reqwest::Client,
    base_url: String,
}

/// Wire shape of a stored fix. The store always stamps its fixes, so a
/// missing timestamp is a parse failure here, unlike push payloads.
#[derive(Deserialize)]
struct StoredFix {
    latitude: f64,
    longitude: f64,
    timestamp: DateTime<Utc>,
}

impl HttpPositionStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn fix_to_update(&self, entity_id: &str, fix: StoredFix) -> PositionUpdate {
        PositionUpdate::new(entity_id, fix.latitude, fix.longitude, fix.timestamp)
    }
}

#[async_trait]
impl PositionStore for HttpPositionStore {
    async fn latest_position(
        &self,
        entity_id: &str,
    ) -> Result<Option<PositionUpdate>, StoreError> {
        let entity = canonical_entity_id(entity_id);
        let url = format!("{}/location/{}/latest", self.base_url, entity);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(StoreError::Status(response.status().as_u16()));
        }

        let fix: StoredFix = response
            .json()
            .await
            .map_err(|e| StoreError::Parse(e.to_string()))?;

        Ok(Some(self.fix_to_update(&entity, fix)))
    }

    async fn track(
        &self,
        entity_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PositionUpdate>, StoreError> {
        let entity = canonical_entity_id(entity_id);
        let url = format!("{}/location/{}/track", self.base_url, entity);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("from", from.to_rfc3339_opts(SecondsFormat::Secs, true)),
                ("to", to.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ])
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StoreError::Status(response.status().as_u16()));
        }

        let fixes: Vec<StoredFix> = response
            .json()
            .await
            .map_err(|e| StoreError::Parse(e.to_string()))?;

        Ok(fixes
            .into_iter()
            .map(|fix| self.fix_to_update(&entity, fix))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let store = HttpPositionStore::new("http://localhost:8081/");
        assert_eq!(store.base_url, "http://localhost:8081");
    }

    #[test]
    fn test_stored_fix_parses_wire_shape() {
        let fix: StoredFix = serde_json::from_str(
            r#"{"latitude": 12.97, "longitude": 77.59, "timestamp": "2024-06-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(fix.latitude, 12.97);
        assert_eq!(fix.longitude, 77.59);
    }

    #[test]
    fn test_stored_fix_missing_timestamp_is_parse_failure() {
        let result: Result<StoredFix, _> =
            serde_json::from_str(r#"{"latitude": 12.97, "longitude": 77.59}"#);
        assert!(result.is_err());
    }
}
