use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

mod validation;
#[cfg(test)]
mod tests;

pub use validation::{canonical_entity_id, validate_and_prepare, ValidationError};

/// PositionUpdate represents one accepted GPS fix for one entity.
///
/// Updates are immutable once created. The relay forwards them and drops
/// them; retention for historical query is the Position Store's job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    /// Entity the fix belongs to. Canonical form: trimmed, ASCII-lowercase.
    #[serde(rename = "entityId")]
    pub entity_id: String,

    /// Decimal degrees, [-90, 90]
    pub latitude: f64,

    /// Decimal degrees, [-180, 180]
    pub longitude: f64,

    /// Producer-side fix time. Dedup key together with entity_id.
    #[serde(rename = "observedAt")]
    pub observed_at: DateTime<Utc>,
}

impl PositionUpdate {
    pub fn new(
        entity_id: impl Into<String>,
        latitude: f64,
        longitude: f64,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_id: canonical_entity_id(&entity_id.into()),
            latitude,
            longitude,
            observed_at,
        }
    }

    /// Validates this update and canonicalizes its entity id in place.
    ///
    /// Returns Ok(()) if valid, Err(ValidationError) otherwise.
    pub fn validate_and_prepare(&mut self) -> Result<(), ValidationError> {
        validation::validate_and_prepare(self)
    }

    /// Parse a raw push payload into an update for `entity_id`.
    ///
    /// The push wire contract only enforces numeric latitude/longitude;
    /// anything else yields None and the message is dropped. A `timestamp`
    /// field is honored when present, otherwise the receive time stands in
    /// as the observation time.
    pub fn from_push_payload(entity_id: &str, payload: &Value) -> Option<Self> {
        let latitude = payload.get("latitude")?.as_f64()?;
        let longitude = payload.get("longitude")?.as_f64()?;
        if !latitude.is_finite() || !longitude.is_finite() {
            return None;
        }

        let observed_at = payload
            .get("timestamp")
            .or_else(|| payload.get("observedAt"))
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Some(Self::new(entity_id, latitude, longitude, observed_at))
    }
}
