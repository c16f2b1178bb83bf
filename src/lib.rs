//! Fleet Presence Server
//!
//! Real-time coordination for a fleet GPS tracking map: which users are
//! online, where they last were, and the shared markers placed on the map.
//!
//! # Features
//!
//! - **Presence**: One live session per user, join/leave announced exactly once
//! - **Live Locations**: Latest position per user, replayed as a snapshot on register
//! - **Selective Broadcast**: Events fan out to every connection except the originator
//! - **Markers & Samples**: REST endpoints that persist and broadcast map changes
//!
//! # Modules
//!
//! - `types`: Core data structures (profiles, locations, markers)
//! - `presence`: Connection registry, location cache and the presence tracker
//! - `store`: Persistence collaborator trait and the journaled memory store
//! - `attachments`: Files uploaded with markers, served under `/api/files`
//! - `api`: WebSocket gateway and REST endpoints over Axum
//! - `config`: Environment configuration
//! - `error`: Store and configuration errors
//! - `utils`: Utility functions (timestamps)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fleet_presence::{create_router, AppState, MemoryStore, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let state = Arc::new(AppState::new(
//!         Arc::new(MemoryStore::new()),
//!         ServerConfig::default(),
//!     ));
//!     let app = create_router(state);
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

pub mod api;
pub mod attachments;
pub mod config;
pub mod error;
pub mod presence;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used items at crate root
pub use api::http::create_router;
pub use api::websocket::{AppState, EventGateway, ServerEvent};
pub use config::ServerConfig;
pub use attachments::AttachmentStore;
pub use error::{AttachmentError, ConfigError, StoreError, StoreResult};
pub use presence::{PresenceTracker, SessionLease};
pub use store::{MemoryStore, Store};
pub use types::{
    LocationSample, LocationSnapshot, Marker, MarkerCategory, PeerProfile, ServerResult,
    UserProfile, UserRegistration,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
