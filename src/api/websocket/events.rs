//! WebSocket message types for presence and map updates
//!
//! Every frame is `{"event": <name>, "data": <payload>}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{LocationSnapshot, Marker, PeerProfile, UserProfile, UserRegistration};

/// Messages sent by clients
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Bind this connection to a user identity
    Register(UserRegistration),

    /// Live position report
    LocationUpdate(LocationUpdate),

    /// Legacy GPS sample, persisted before it is forwarded
    GpsSample(GpsSample),

    /// Heartbeat
    Ping,
}

/// Payload of `location-update`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    #[serde(default)]
    pub user_id: Option<String>,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub accuracy: Option<f64>,
    /// Client time in Unix milliseconds
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Payload of `gps-sample`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GpsSample {
    #[serde(default)]
    pub user_id: Option<String>,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
}

/// Messages sent by the server
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Reply to `register`
    Registered(RegisteredReply),

    /// Every cached live location, sent after each registration
    LocationSnapshot(Vec<LocationSnapshot>),

    /// Another user came online
    PeerJoined(PeerPresence),

    /// Another user moved
    PeerLocation(LocationSnapshot),

    /// A GPS sample was recorded
    SampleAdded(SampleAdded),

    /// Another user went offline
    PeerLeft(PeerPresence),

    MarkerCreated(Marker),
    MarkerUpdated(Marker),
    MarkerDeleted(MarkerRef),

    /// All persisted markers, sent once on connect
    MarkersInitial(Vec<Marker>),

    Pong,

    /// Problem with a frame sent by this client
    Error(ErrorPayload),
}

impl ServerEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Registered(_) => "registered",
            ServerEvent::LocationSnapshot(_) => "location-snapshot",
            ServerEvent::PeerJoined(_) => "peer-joined",
            ServerEvent::PeerLocation(_) => "peer-location",
            ServerEvent::SampleAdded(_) => "sample-added",
            ServerEvent::PeerLeft(_) => "peer-left",
            ServerEvent::MarkerCreated(_) => "marker-created",
            ServerEvent::MarkerUpdated(_) => "marker-updated",
            ServerEvent::MarkerDeleted(_) => "marker-deleted",
            ServerEvent::MarkersInitial(_) => "markers-initial",
            ServerEvent::Pong => "pong",
            ServerEvent::Error(_) => "error",
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorPayload {
            code: code.into(),
            message: message.into(),
        })
    }
}

/// Reply to a registration attempt
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredReply {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<UserProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RegisteredReply {
    pub fn success(profile: UserProfile) -> Self {
        Self {
            success: true,
            user_id: Some(profile.id.clone()),
            profile: Some(profile),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            user_id: None,
            profile: None,
            error: Some(error.into()),
        }
    }
}

/// Join/leave notification payload
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeerPresence {
    pub user_id: String,
    pub sequence_number: u64,
    pub name: Option<String>,
    pub platform: String,
    /// RFC 3339
    pub timestamp: String,
}

impl PeerPresence {
    pub fn new(user_id: &str, profile: &PeerProfile) -> Self {
        Self {
            user_id: user_id.to_string(),
            sequence_number: profile.sequence_number,
            name: profile.name.clone(),
            platform: profile.platform.clone(),
            timestamp: crate::utils::now_rfc3339(),
        }
    }
}

/// Payload of `sample-added`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SampleAdded {
    /// Store id, absent when persistence failed
    pub id: Option<i64>,
    pub lat: f64,
    pub lng: f64,
    pub accuracy: Option<f64>,
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Reference to a deleted marker
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MarkerRef {
    pub id: String,
}

/// Error details sent to a single client
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}
