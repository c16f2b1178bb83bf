//! Persistence collaborator
//!
//! The presence core only needs the user and sample operations; the marker
//! and query operations back the REST layer.

mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use crate::types::{
    CategoryStats, Marker, MarkerUpdate, NewLocationSample, NewMarker, StoredSample, UserProfile,
    UserRegistration,
};

pub use memory::{MemoryStore, StoreRecord};

/// Persistence operations used by the server
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a user or refresh an existing one.
    ///
    /// New users get the next sequence number. Existing users keep theirs and
    /// only have fields overwritten for which `registration` carries a value.
    async fn upsert_user(&self, registration: &UserRegistration) -> StoreResult<UserProfile>;

    async fn get_user(&self, id: &str) -> StoreResult<Option<UserProfile>>;

    /// Users seen after `since`, most recent first
    async fn recent_users(&self, since: DateTime<Utc>) -> StoreResult<Vec<UserProfile>>;

    /// Persist a GPS sample and return its id
    async fn save_location_sample(&self, sample: &NewLocationSample) -> StoreResult<i64>;

    /// Latest samples, newest first
    async fn recent_samples(&self, limit: usize) -> StoreResult<Vec<StoredSample>>;

    /// Samples with `from <= timestamp <= to`, oldest first
    async fn samples_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<StoredSample>>;

    /// All markers, newest first
    async fn list_markers(&self) -> StoreResult<Vec<Marker>>;

    async fn get_marker(&self, id: &str) -> StoreResult<Option<Marker>>;

    async fn create_marker(&self, marker: NewMarker) -> StoreResult<Marker>;

    /// Returns `None` if no marker has this id
    async fn update_marker(&self, id: &str, update: MarkerUpdate) -> StoreResult<Option<Marker>>;

    /// Returns whether a marker was deleted
    async fn delete_marker(&self, id: &str) -> StoreResult<bool>;

    async fn marker_stats(&self) -> StoreResult<Vec<CategoryStats>>;
}
