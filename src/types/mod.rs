//! Data types for the fleet tracking server
//!
//! This module contains the core data structures shared by the presence
//! core, the store and the API layer.

mod location;
mod marker;
mod profile;

pub use location::{
    is_valid_coordinate, LocationSample, LocationSnapshot, NewLocationSample, StoredSample,
};
pub use marker::{CategoryStats, Marker, MarkerCategory, MarkerUpdate, NewMarker};
pub use profile::{PeerProfile, UserProfile, UserRegistration, DEFAULT_PLATFORM};

/// Connection identity assigned to every live WebSocket session
pub type ConnId = uuid::Uuid;

/// Result type for the server entry point
pub type ServerResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;
