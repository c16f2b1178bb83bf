//! In-memory store with an optional append-only JSONL journal
//!
//! Every mutation is appended to the journal before it is applied, and the
//! journal is replayed on startup to rebuild the in-memory state.

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::Store;
use crate::error::StoreResult;
use crate::types::{
    CategoryStats, Marker, MarkerUpdate, NewLocationSample, NewMarker, StoredSample, UserProfile,
    UserRegistration, DEFAULT_PLATFORM,
};

/// One journal line
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreRecord {
    UserUpserted { user: UserProfile },
    MarkerSaved { marker: Marker },
    MarkerDeleted { id: String },
    SampleSaved { sample: StoredSample },
}

#[derive(Debug, Default)]
struct StoreData {
    users: HashMap<String, UserProfile>,
    markers: HashMap<String, Marker>,
    samples: Vec<StoredSample>,
    next_sample_id: i64,
}

impl StoreData {
    fn apply(&mut self, record: StoreRecord) {
        match record {
            StoreRecord::UserUpserted { user } => {
                self.users.insert(user.id.clone(), user);
            }
            StoreRecord::MarkerSaved { marker } => {
                self.markers.insert(marker.id.clone(), marker);
            }
            StoreRecord::MarkerDeleted { id } => {
                self.markers.remove(&id);
            }
            StoreRecord::SampleSaved { sample } => {
                self.next_sample_id = self.next_sample_id.max(sample.id + 1);
                self.samples.push(sample);
            }
        }
    }

    fn next_sequence_number(&self) -> u64 {
        self.users.values().map(|u| u.sequence_number).max().unwrap_or(0) + 1
    }
}

/// Store keeping everything in memory, journaled to disk when a path is given
pub struct MemoryStore {
    data: RwLock<StoreData>,
    journal: Option<Mutex<File>>,
    journal_path: Option<PathBuf>,
}

impl MemoryStore {
    /// Create a store without a journal
    pub fn new() -> Self {
        Self {
            data: RwLock::new(StoreData {
                next_sample_id: 1,
                ..Default::default()
            }),
            journal: None,
            journal_path: None,
        }
    }

    /// Create a store journaled to `path`, replaying any existing journal
    pub fn with_file_path<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut data = StoreData {
            next_sample_id: 1,
            ..Default::default()
        };

        if path.exists() {
            let replayed = Self::replay(&path, &mut data)?;
            info!(path = %path.display(), records = replayed, "replayed store journal");
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            data: RwLock::new(data),
            journal: Some(Mutex::new(file)),
            journal_path: Some(path),
        })
    }

    pub fn journal_path(&self) -> Option<&Path> {
        self.journal_path.as_deref()
    }

    fn replay(path: &Path, data: &mut StoreData) -> StoreResult<usize> {
        let reader = BufReader::new(File::open(path)?);
        let mut replayed = 0;

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<StoreRecord>(line) {
                Ok(record) => {
                    data.apply(record);
                    replayed += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), line = index + 1, error = %e, "skipping unreadable journal line");
                }
            }
        }

        Ok(replayed)
    }

    /// Append a record to the journal (no-op for memory-only stores)
    fn append(&self, record: &StoreRecord) -> StoreResult<()> {
        if let Some(journal) = &self.journal {
            let mut line = serde_json::to_string(record)?;
            line.push('\n');
            let mut file = journal.lock();
            file.write_all(line.as_bytes())?;
            file.flush()?;
        }
        Ok(())
    }

    /// Journal then apply, under the caller's write lock
    fn commit(&self, data: &mut StoreData, record: StoreRecord) -> StoreResult<()> {
        self.append(&record)?;
        data.apply(record);
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.trim().is_empty()).cloned()
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_user(&self, registration: &UserRegistration) -> StoreResult<UserProfile> {
        let now = Utc::now();
        let mut data = self.data.write();

        let user = match data.users.get(&registration.id) {
            Some(existing) => UserProfile {
                id: existing.id.clone(),
                sequence_number: existing.sequence_number,
                name: non_empty(&registration.name).or_else(|| existing.name.clone()),
                platform: non_empty(&registration.platform)
                    .unwrap_or_else(|| existing.platform.clone()),
                device_model: non_empty(&registration.device_model)
                    .or_else(|| existing.device_model.clone()),
                registered_at: existing.registered_at,
                last_seen: now,
            },
            None => UserProfile {
                id: registration.id.clone(),
                sequence_number: data.next_sequence_number(),
                name: non_empty(&registration.name),
                platform: non_empty(&registration.platform)
                    .unwrap_or_else(|| DEFAULT_PLATFORM.to_string()),
                device_model: non_empty(&registration.device_model),
                registered_at: now,
                last_seen: now,
            },
        };

        self.commit(&mut data, StoreRecord::UserUpserted { user: user.clone() })?;
        Ok(user)
    }

    async fn get_user(&self, id: &str) -> StoreResult<Option<UserProfile>> {
        Ok(self.data.read().users.get(id).cloned())
    }

    async fn recent_users(&self, since: DateTime<Utc>) -> StoreResult<Vec<UserProfile>> {
        let data = self.data.read();
        let mut users: Vec<UserProfile> = data
            .users
            .values()
            .filter(|u| u.last_seen > since)
            .cloned()
            .collect();
        users.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        Ok(users)
    }

    async fn save_location_sample(&self, sample: &NewLocationSample) -> StoreResult<i64> {
        let mut data = self.data.write();
        let id = data.next_sample_id;
        let stored = StoredSample {
            id,
            user_id: sample.user_id.clone(),
            lat: sample.lat,
            lng: sample.lng,
            accuracy: sample.accuracy,
            timestamp: sample.timestamp,
        };
        self.commit(&mut data, StoreRecord::SampleSaved { sample: stored })?;
        Ok(id)
    }

    async fn recent_samples(&self, limit: usize) -> StoreResult<Vec<StoredSample>> {
        let data = self.data.read();
        let mut samples = data.samples.clone();
        samples.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        samples.truncate(limit);
        Ok(samples)
    }

    async fn samples_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<StoredSample>> {
        let data = self.data.read();
        let mut samples: Vec<StoredSample> = data
            .samples
            .iter()
            .filter(|s| s.timestamp >= from && s.timestamp <= to)
            .cloned()
            .collect();
        samples.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(samples)
    }

    async fn list_markers(&self) -> StoreResult<Vec<Marker>> {
        let data = self.data.read();
        let mut markers: Vec<Marker> = data.markers.values().cloned().collect();
        markers.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(markers)
    }

    async fn get_marker(&self, id: &str) -> StoreResult<Option<Marker>> {
        Ok(self.data.read().markers.get(id).cloned())
    }

    async fn create_marker(&self, marker: NewMarker) -> StoreResult<Marker> {
        let now = Utc::now();
        let marker = Marker {
            id: Uuid::new_v4().to_string(),
            user_id: marker.user_id,
            lat: marker.lat,
            lng: marker.lng,
            category: marker.category,
            description: marker.description,
            attachment: marker.attachment,
            timestamp: now,
            created_at: now,
            updated_at: now,
        };

        let mut data = self.data.write();
        self.commit(&mut data, StoreRecord::MarkerSaved { marker: marker.clone() })?;
        Ok(marker)
    }

    async fn update_marker(&self, id: &str, update: MarkerUpdate) -> StoreResult<Option<Marker>> {
        let mut data = self.data.write();
        let Some(current) = data.markers.get(id) else {
            return Ok(None);
        };

        let marker = Marker {
            lat: update.lat,
            lng: update.lng,
            category: update.category.unwrap_or(current.category),
            description: update.description.unwrap_or_else(|| current.description.clone()),
            attachment: update.attachment.or_else(|| current.attachment.clone()),
            updated_at: Utc::now(),
            ..current.clone()
        };

        self.commit(&mut data, StoreRecord::MarkerSaved { marker: marker.clone() })?;
        Ok(Some(marker))
    }

    async fn delete_marker(&self, id: &str) -> StoreResult<bool> {
        let mut data = self.data.write();
        if !data.markers.contains_key(id) {
            return Ok(false);
        }
        self.commit(&mut data, StoreRecord::MarkerDeleted { id: id.to_string() })?;
        Ok(true)
    }

    async fn marker_stats(&self) -> StoreResult<Vec<CategoryStats>> {
        let data = self.data.read();
        let mut stats: BTreeMap<_, CategoryStats> = BTreeMap::new();

        for marker in data.markers.values() {
            stats
                .entry(marker.category)
                .and_modify(|s| {
                    s.total += 1;
                    s.first_timestamp = s.first_timestamp.min(marker.timestamp);
                    s.last_timestamp = s.last_timestamp.max(marker.timestamp);
                })
                .or_insert(CategoryStats {
                    category: marker.category,
                    total: 1,
                    first_timestamp: marker.timestamp,
                    last_timestamp: marker.timestamp,
                });
        }

        Ok(stats.into_values().collect())
    }
}
