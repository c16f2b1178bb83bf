//! User profile types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Platform recorded when a client does not report one
pub const DEFAULT_PLATFORM: &str = "web";

/// Registration payload sent by a client on connect
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserRegistration {
    /// Stable user identity chosen by the client
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_model: Option<String>,
}

impl UserRegistration {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }
}

/// Persisted user profile
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    /// Sequential number assigned on first registration, never reused
    pub sequence_number: u64,
    pub name: Option<String>,
    pub platform: String,
    pub device_model: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Profile snapshot captured at registration time and kept with the session.
///
/// Leave notifications are built from this snapshot, never from the store.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeerProfile {
    pub sequence_number: u64,
    pub name: Option<String>,
    pub platform: String,
    pub device_model: Option<String>,
}

impl From<&UserProfile> for PeerProfile {
    fn from(profile: &UserProfile) -> Self {
        Self {
            sequence_number: profile.sequence_number,
            name: profile.name.clone(),
            platform: profile.platform.clone(),
            device_model: profile.device_model.clone(),
        }
    }
}
