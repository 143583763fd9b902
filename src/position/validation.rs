use super::PositionUpdate;
use std::fmt;

/// Validation errors for PositionUpdate
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    MissingEntityId,
    InvalidEntityId(String),
    InvalidLatitude(f64),
    InvalidLongitude(f64),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingEntityId => write!(f, "entityId is required"),
            ValidationError::InvalidEntityId(id) => {
                write!(f, "invalid entityId '{}': must not contain whitespace", id)
            }
            ValidationError::InvalidLatitude(lat) => {
                write!(f, "latitude must be finite and within [-90, 90], got {}", lat)
            }
            ValidationError::InvalidLongitude(lon) => {
                write!(f, "longitude must be finite and within [-180, 180], got {}", lon)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Canonical form of an entity id: trimmed, ASCII-lowercased.
///
/// Applied once at ingestion and at subscribe time so every map key in the
/// relay agrees on casing. Case-mismatched ids from producers and observers
/// land on the same topic.
pub fn canonical_entity_id(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Validates a PositionUpdate and canonicalizes its entity id in place.
///
/// Validation rules:
/// - entityId: required, non-blank, no interior whitespace
/// - latitude: finite, within [-90, 90]
/// - longitude: finite, within [-180, 180]
pub fn validate_and_prepare(update: &mut PositionUpdate) -> Result<(), ValidationError> {
    let canonical = canonical_entity_id(&update.entity_id);
    if canonical.is_empty() {
        return Err(ValidationError::MissingEntityId);
    }
    if canonical.chars().any(|c| c.is_whitespace()) {
        return Err(ValidationError::InvalidEntityId(update.entity_id.clone()));
    }

    if !update.latitude.is_finite() || update.latitude.abs() > 90.0 {
        return Err(ValidationError::InvalidLatitude(update.latitude));
    }
    if !update.longitude.is_finite() || update.longitude.abs() > 180.0 {
        return Err(ValidationError::InvalidLongitude(update.longitude));
    }

    update.entity_id = canonical;
    Ok(())
}

#[cfg(test)]
mod validation_tests {
    use super::*;

    #[test]
    fn test_canonical_entity_id() {
        assert_eq!(canonical_entity_id("SUR009"), "sur009");
        assert_eq!(canonical_entity_id("  sur009  "), "sur009");
        assert_eq!(canonical_entity_id("Sur-009"), "sur-009");
        assert_eq!(canonical_entity_id(""), "");
    }
}
