//! Location types: live samples, snapshot entries and persisted GPS samples

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Last known position of a registered user (held in memory only)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    pub user_id: String,
    pub lat: f64,
    pub lng: f64,
    pub speed: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    /// Client-declared time in Unix milliseconds
    pub timestamp: i64,
}

/// One entry of the location snapshot sent to (re)joining clients
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationSnapshot {
    pub user_id: String,
    pub lat: f64,
    pub lng: f64,
    pub speed: f64,
    pub timestamp: i64,
}

impl From<&LocationSample> for LocationSnapshot {
    fn from(sample: &LocationSample) -> Self {
        Self {
            user_id: sample.user_id.clone(),
            lat: sample.lat,
            lng: sample.lng,
            speed: sample.speed,
            timestamp: sample.timestamp,
        }
    }
}

/// GPS sample to be persisted by the store
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewLocationSample {
    pub user_id: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub accuracy: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// GPS sample as stored, with its assigned id
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredSample {
    pub id: i64,
    pub user_id: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub accuracy: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Check that a coordinate pair is finite and within WGS84 bounds
pub fn is_valid_coordinate(lat: f64, lng: f64) -> bool {
    lat.is_finite() && lng.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_bounds() {
        assert!(is_valid_coordinate(0.0, 0.0));
        assert!(is_valid_coordinate(-90.0, 180.0));
        assert!(!is_valid_coordinate(90.5, 10.0));
        assert!(!is_valid_coordinate(10.0, -181.0));
        assert!(!is_valid_coordinate(f64::NAN, 10.0));
    }

    #[test]
    fn test_snapshot_drops_accuracy() {
        let sample = LocationSample {
            user_id: "B1".to_string(),
            lat: 10.0,
            lng: 20.0,
            speed: 3.5,
            accuracy: Some(4.0),
            timestamp: 1_700_000_000_000,
        };
        let json = serde_json::to_value(LocationSnapshot::from(&sample)).unwrap();
        assert_eq!(json["userId"], "B1");
        assert!(json.get("accuracy").is_none());
    }
}
