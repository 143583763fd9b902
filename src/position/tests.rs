use super::*;
use chrono::TimeZone;
use serde_json::json;

fn observed() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()
}

#[test]
fn test_valid_update_passes_validation() {
    let mut update = PositionUpdate {
        entity_id: "SUR009".to_string(),
        latitude: 12.97,
        longitude: 77.59,
        observed_at: observed(),
    };

    let result = update.validate_and_prepare();
    assert!(result.is_ok());
    // Entity id was canonicalized in place
    assert_eq!(update.entity_id, "sur009");
}

#[test]
fn test_blank_entity_id_fails() {
    let mut update = PositionUpdate {
        entity_id: "   ".to_string(),
        latitude: 12.97,
        longitude: 77.59,
        observed_at: observed(),
    };

    let result = update.validate_and_prepare();
    assert_eq!(result.unwrap_err(), ValidationError::MissingEntityId);
}

#[test]
fn test_entity_id_with_interior_whitespace_fails() {
    let mut update = PositionUpdate {
        entity_id: "sur 009".to_string(),
        latitude: 12.97,
        longitude: 77.59,
        observed_at: observed(),
    };

    let result = update.validate_and_prepare();
    match result.unwrap_err() {
        ValidationError::InvalidEntityId(_) => {}
        other => panic!("Expected InvalidEntityId error, got {:?}", other),
    }
}

#[test]
fn test_out_of_range_latitude_fails() {
    let mut update = PositionUpdate {
        entity_id: "sur009".to_string(),
        latitude: 91.0,
        longitude: 77.59,
        observed_at: observed(),
    };

    let result = update.validate_and_prepare();
    assert_eq!(result.unwrap_err(), ValidationError::InvalidLatitude(91.0));
}

#[test]
fn test_non_finite_longitude_fails() {
    let mut update = PositionUpdate {
        entity_id: "sur009".to_string(),
        latitude: 12.97,
        longitude: f64::NAN,
        observed_at: observed(),
    };

    let result = update.validate_and_prepare();
    match result.unwrap_err() {
        ValidationError::InvalidLongitude(_) => {}
        other => panic!("Expected InvalidLongitude error, got {:?}", other),
    }
}

#[test]
fn test_serde_wire_names() {
    let update = PositionUpdate::new("sur009", 12.97, 77.59, observed());
    let value = serde_json::to_value(&update).unwrap();

    assert_eq!(value["entityId"], "sur009");
    assert_eq!(value["latitude"], 12.97);
    assert_eq!(value["longitude"], 77.59);
    assert_eq!(value["observedAt"], "2024-06-01T10:00:00Z");
}

#[test]
fn test_push_payload_with_timestamp() {
    let payload = json!({
        "latitude": 12.97,
        "longitude": 77.59,
        "timestamp": "2024-06-01T10:00:00Z"
    });

    let update = PositionUpdate::from_push_payload("SUR009", &payload).unwrap();
    assert_eq!(update.entity_id, "sur009");
    assert_eq!(update.latitude, 12.97);
    assert_eq!(update.observed_at, observed());
}

#[test]
fn test_push_payload_without_timestamp_uses_receive_time() {
    let before = Utc::now();
    let payload = json!({ "latitude": 1.0, "longitude": 2.0 });

    let update = PositionUpdate::from_push_payload("sur009", &payload).unwrap();
    assert!(update.observed_at >= before);
    assert!(update.observed_at <= Utc::now());
}

#[test]
fn test_push_payload_non_numeric_coordinates_dropped() {
    // Non-numeric latitude/longitude is ignored, not errored
    let payload = json!({ "latitude": "12.97", "longitude": 77.59 });
    assert!(PositionUpdate::from_push_payload("sur009", &payload).is_none());

    let payload = json!({ "longitude": 77.59 });
    assert!(PositionUpdate::from_push_payload("sur009", &payload).is_none());

    let payload = json!("not an object");
    assert!(PositionUpdate::from_push_payload("sur009", &payload).is_none());
}

#[test]
fn test_push_payload_extra_fields_ignored() {
    let payload = json!({
        "latitude": 12.97,
        "longitude": 77.59,
        "timestamp": "2024-06-01T10:00:00Z",
        "surveyorId": "SUR009",
        "accuracy": 4.5
    });

    assert!(PositionUpdate::from_push_payload("sur009", &payload).is_some());
}
