//! Last known location per registered user

use std::collections::HashMap;

use crate::types::{LocationSample, LocationSnapshot};

/// Last-write-wins cache of live locations
#[derive(Debug, Default)]
pub struct LocationCache {
    samples: HashMap<String, LocationSample>,
}

impl LocationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `sample` for its user, replacing whatever was there.
    /// The declared timestamp is not compared: the latest message wins.
    pub fn put(&mut self, sample: LocationSample) {
        self.samples.insert(sample.user_id.clone(), sample);
    }

    #[cfg(test)]
    pub fn get(&self, user_id: &str) -> Option<&LocationSample> {
        self.samples.get(user_id)
    }

    pub fn remove(&mut self, user_id: &str) -> Option<LocationSample> {
        self.samples.remove(user_id)
    }

    /// Materialized copy of every cached location (order is unspecified)
    pub fn snapshot(&self) -> Vec<LocationSnapshot> {
        self.samples.values().map(LocationSnapshot::from).collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
