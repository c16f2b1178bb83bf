//! Presence core
//!
//! Maps user identities to live connections, keeps each user's last known
//! location and decides when join/leave notifications fire.
//!
//! - `registry`: user identity to connection binding with generation leases
//! - `location_cache`: last-write-wins location per registered user
//! - `tracker`: registration and disconnection protocols over both

mod location_cache;
mod registry;
mod tracker;

pub use location_cache::LocationCache;
pub use registry::{ConnectionRegistry, Registered, SessionLease, UserSession};
pub use tracker::{PresenceTracker, RegisterError, Registration};
