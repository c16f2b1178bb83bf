//! Map marker (shared annotation) types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Marker category
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum MarkerCategory {
    Alert,
    Danger,
    Info,
}

impl MarkerCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerCategory::Alert => "alert",
            MarkerCategory::Danger => "danger",
            MarkerCategory::Info => "info",
        }
    }
}

impl fmt::Display for MarkerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarkerCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alert" => Ok(MarkerCategory::Alert),
            "danger" => Ok(MarkerCategory::Danger),
            "info" => Ok(MarkerCategory::Info),
            other => Err(format!("Invalid category '{}'", other)),
        }
    }
}

/// A persisted map marker
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    pub id: String,
    pub user_id: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub category: MarkerCategory,
    pub description: String,
    /// Public URL of the uploaded attachment
    pub attachment: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated input for creating a marker
#[derive(Clone, Debug, PartialEq)]
pub struct NewMarker {
    pub user_id: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub category: MarkerCategory,
    pub description: String,
    pub attachment: Option<String>,
}

/// Validated input for updating a marker. `None` keeps the current value.
#[derive(Clone, Debug, PartialEq)]
pub struct MarkerUpdate {
    pub lat: f64,
    pub lng: f64,
    pub category: Option<MarkerCategory>,
    pub description: Option<String>,
    pub attachment: Option<String>,
}

/// Per-category marker statistics
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CategoryStats {
    pub category: MarkerCategory,
    pub total: usize,
    pub first_timestamp: DateTime<Utc>,
    pub last_timestamp: DateTime<Utc>,
}
