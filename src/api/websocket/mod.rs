//! WebSocket module for real-time presence and map updates
//!
//! Provides the WebSocket endpoint at `/ws`.
//!
//! ## Flow
//! - On connect the client receives every persisted marker
//! - `register` binds the connection to a user and returns the live location snapshot
//! - `location-update` / `gps-sample` fan out to every other user
//! - Closing the socket announces `peer-left` unless a newer connection took over

pub mod broadcaster;
pub mod events;
pub mod gateway;
pub mod handler;
pub mod state;

pub use broadcaster::{BroadcastRouter, ClientConnection};
pub use events::{ClientMessage, ServerEvent};
pub use gateway::EventGateway;
pub use state::AppState;
