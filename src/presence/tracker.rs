//! Presence tracker: registration, reconnect detection and teardown
//!
//! Registry, location cache and notified-set share a single lock so that the
//! race guard in [`PresenceTracker::disconnect`] is one atomic check-and-remove.
//! The lock is never held across the store call. Join and leave notices are
//! queued while it is held; queuing never blocks.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::location_cache::LocationCache;
use super::registry::{ConnectionRegistry, SessionLease, UserSession};
use crate::api::websocket::broadcaster::BroadcastRouter;
use crate::api::websocket::events::{PeerPresence, RegisteredReply, ServerEvent};
use crate::error::StoreError;
use crate::store::Store;
use crate::types::{
    ConnId, LocationSample, LocationSnapshot, PeerProfile, UserProfile, UserRegistration,
    DEFAULT_PLATFORM,
};

/// Why a registration did not take effect
#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("User id is required")]
    MissingId,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Connection closed during registration")]
    ConnectionClosed,
}

/// Successful registration
#[derive(Clone, Debug, PartialEq)]
pub struct Registration {
    pub lease: SessionLease,
    pub profile: UserProfile,
    /// Whether a `peer-joined` was broadcast
    pub fresh_join: bool,
}

#[derive(Default)]
struct PresenceState {
    registry: ConnectionRegistry,
    locations: LocationCache,
    /// Users whose join has been announced during the current session
    notified: HashSet<String>,
}

impl PresenceState {
    /// Race-guarded removal of everything held for `lease.user_id`
    fn teardown(&mut self, lease: &SessionLease) -> Option<UserSession> {
        let session = self.registry.unregister_if_current(lease)?;
        self.locations.remove(&lease.user_id);
        self.notified.remove(&lease.user_id);
        Some(session)
    }

    /// Forget the join announcement and location of a binding whose
    /// connection is gone. The binding itself stays until a registration
    /// replaces it or the old lease is torn down.
    fn clear_stale(&mut self, user_id: &str) {
        self.locations.remove(user_id);
        self.notified.remove(user_id);
    }
}

/// What the registry held for a user before a registration
enum Previous {
    Absent,
    SameConnection,
    Live(ConnId),
    Stale(ConnId),
}

/// Owns all presence state for one server instance
pub struct PresenceTracker {
    state: Mutex<PresenceState>,
    store: Arc<dyn Store>,
    router: Arc<BroadcastRouter>,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn Store>, router: Arc<BroadcastRouter>) -> Self {
        Self {
            state: Mutex::new(PresenceState::default()),
            store,
            router,
        }
    }

    /// Handle a `register` message from `conn_id`.
    ///
    /// Replies to the connection in every case. On success the connection also
    /// receives the full location snapshot, and other users receive
    /// `peer-joined` if this is a fresh join. A store failure leaves the
    /// registry untouched so the client can simply retry.
    pub async fn register(
        &self,
        conn_id: ConnId,
        request: UserRegistration,
    ) -> Result<Registration, RegisterError> {
        let user_id = request.id.trim().to_string();
        if user_id.is_empty() {
            warn!(conn_id = %conn_id, "registration without user id");
            self.reply(conn_id, RegisteredReply::failure(RegisterError::MissingId.to_string()));
            return Err(RegisterError::MissingId);
        }
        let request = UserRegistration {
            id: user_id.clone(),
            ..request
        };

        let previous = {
            let mut state = self.state.lock();
            match state.registry.lookup(&user_id) {
                None => Previous::Absent,
                Some(prev) if prev == conn_id => Previous::SameConnection,
                Some(prev) if self.router.is_open(prev) => Previous::Live(prev),
                Some(prev) => {
                    state.clear_stale(&user_id);
                    Previous::Stale(prev)
                }
            }
        };

        let profile = match self.store.upsert_user(&request).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(user_id = %user_id, conn_id = %conn_id, error = %e, "failed to persist user profile");
                self.reply(conn_id, RegisteredReply::failure(e.to_string()));
                return Err(e.into());
            }
        };

        let peer = PeerProfile::from(&profile);
        // Join notices carry what the client just announced, not the merged
        // store profile.
        let announced = PeerProfile {
            name: request.name.clone().filter(|n| !n.trim().is_empty()),
            platform: request
                .platform
                .clone()
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_PLATFORM.to_string()),
            ..peer.clone()
        };

        // Notices are queued under the lock so peers see them in registry order.
        let (lease, fresh_join, snapshot) = {
            let mut state = self.state.lock();

            if !self.router.is_open(conn_id) {
                debug!(user_id = %user_id, conn_id = %conn_id, "connection closed before registration completed");
                return Err(RegisterError::ConnectionClosed);
            }

            let old_lease = self.router.lease_of(conn_id);
            let registered = state.registry.register(&user_id, conn_id, peer.clone());
            let lease = registered.lease.clone();

            // Closed between the check above and the bind: the transport
            // teardown owns whatever lease the connection held before.
            if !self.router.bind(conn_id, lease.clone()) {
                state.registry.rollback(registered);
                debug!(user_id = %user_id, conn_id = %conn_id, "connection closed before registration completed");
                return Err(RegisterError::ConnectionClosed);
            }

            // The connection was bound to a different identity before.
            let superseded = match old_lease {
                Some(old) if old.user_id != user_id => {
                    state.teardown(&old).map(|session| (old.user_id, session.profile))
                }
                _ => None,
            };

            if let Some((old_user, old_profile)) = superseded {
                info!(user_id = %old_user, conn_id = %conn_id, "connection re-registered as another user");
                self.router.broadcast_except(
                    Some(&old_user),
                    &ServerEvent::PeerLeft(PeerPresence::new(&old_user, &old_profile)),
                );
            }

            let fresh_join = state.notified.insert(user_id.clone());
            if fresh_join {
                self.router.broadcast_except(
                    Some(&user_id),
                    &ServerEvent::PeerJoined(PeerPresence::new(&user_id, &announced)),
                );
            }

            (lease, fresh_join, state.locations.snapshot())
        };

        match (&previous, fresh_join) {
            (Previous::Stale(stale), _) => {
                info!(user_id = %user_id, conn_id = %conn_id, stale_conn = %stale, platform = %profile.platform, sequence_number = profile.sequence_number, "user reconnected");
            }
            (Previous::Live(_) | Previous::SameConnection, false) => {
                debug!(user_id = %user_id, conn_id = %conn_id, "duplicate registration on live session");
            }
            _ => {
                info!(user_id = %user_id, conn_id = %conn_id, platform = %profile.platform, sequence_number = profile.sequence_number, "user registered");
            }
        }

        self.reply(conn_id, RegisteredReply::success(profile.clone()));
        let sent = snapshot.len();
        self.router.send_to(conn_id, &ServerEvent::LocationSnapshot(snapshot));
        debug!(user_id = %user_id, locations = sent, "sent location snapshot");

        Ok(Registration {
            lease,
            profile,
            fresh_join,
        })
    }

    /// Tear down the session `lease` was issued for.
    ///
    /// Returns true if the session was removed and `peer-left` broadcast.
    /// A lease superseded by a newer registration is a silent no-op, which
    /// also makes repeated calls for the same lease harmless.
    pub fn disconnect(&self, lease: &SessionLease) -> bool {
        let mut state = self.state.lock();

        match state.teardown(lease) {
            Some(session) => {
                info!(
                    user_id = %lease.user_id,
                    conn_id = %lease.conn_id,
                    platform = %session.profile.platform,
                    sequence_number = session.profile.sequence_number,
                    "user disconnected"
                );
                self.router.broadcast_except(
                    Some(&lease.user_id),
                    &ServerEvent::PeerLeft(PeerPresence::new(&lease.user_id, &session.profile)),
                );
                true
            }
            None => {
                debug!(
                    user_id = %lease.user_id,
                    conn_id = %lease.conn_id,
                    generation = lease.generation,
                    "race guard skip: session already superseded"
                );
                false
            }
        }
    }

    /// Cache a live location. Only registered users are cached; returns
    /// whether the sample was stored.
    pub fn record_location(&self, sample: LocationSample) -> bool {
        let mut state = self.state.lock();
        if !state.registry.contains(&sample.user_id) {
            return false;
        }
        state.locations.put(sample);
        true
    }

    /// Copy of every cached live location
    pub fn snapshot(&self) -> Vec<LocationSnapshot> {
        self.state.lock().locations.snapshot()
    }

    /// Identities of all registered users, sorted
    pub fn present_users(&self) -> Vec<String> {
        self.state.lock().registry.users()
    }

    pub fn lookup(&self, user_id: &str) -> Option<ConnId> {
        self.state.lock().registry.lookup(user_id)
    }

    pub fn is_present(&self, user_id: &str) -> bool {
        self.state.lock().registry.contains(user_id)
    }

    fn reply(&self, conn_id: ConnId, reply: RegisteredReply) {
        self.router.send_to(conn_id, &ServerEvent::Registered(reply));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::websocket::broadcaster::ClientConnection;
    use crate::store::testing::FlakyStore;
    use serde_json::Value;
    use tokio::sync::mpsc;

    struct Harness {
        store: Arc<FlakyStore>,
        router: Arc<BroadcastRouter>,
        tracker: PresenceTracker,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(FlakyStore::default());
            let router = Arc::new(BroadcastRouter::new());
            let tracker = PresenceTracker::new(store.clone(), router.clone());
            Self { store, router, tracker }
        }

        fn connect(&self) -> (ConnId, mpsc::Receiver<Arc<str>>) {
            let (tx, rx) = mpsc::channel(64);
            let conn = Arc::new(ClientConnection::new(tx));
            let id = conn.id;
            self.router.add(conn);
            (id, rx)
        }
    }

    fn drain(rx: &mut mpsc::Receiver<Arc<str>>) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(serde_json::from_str(&frame).unwrap());
        }
        frames
    }

    fn named<'a>(frames: &'a [Value], event: &str) -> Vec<&'a Value> {
        frames.iter().filter(|f| f["event"] == event).collect()
    }

    fn sample(user: &str) -> LocationSample {
        LocationSample {
            user_id: user.to_string(),
            lat: 10.0,
            lng: 20.0,
            speed: 0.0,
            accuracy: None,
            timestamp: 1,
        }
    }

    #[tokio::test]
    async fn test_fresh_join_notifies_others_only() {
        let h = Harness::new();
        let (a, mut rx_a) = h.connect();
        let (b, mut rx_b) = h.connect();

        h.tracker.register(a, UserRegistration::new("A1")).await.unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        let reg = h.tracker.register(b, UserRegistration::new("B1")).await.unwrap();
        assert!(reg.fresh_join);

        let to_a = drain(&mut rx_a);
        let joined = named(&to_a, "peer-joined");
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0]["data"]["userId"], "B1");
        assert_eq!(joined[0]["data"]["sequenceNumber"], 2);

        let to_b = drain(&mut rx_b);
        assert!(named(&to_b, "peer-joined").is_empty());
        assert_eq!(named(&to_b, "registered")[0]["data"]["success"], true);
        assert_eq!(named(&to_b, "location-snapshot")[0]["data"], Value::Array(vec![]));
    }

    #[tokio::test]
    async fn test_duplicate_registration_does_not_rejoin() {
        let h = Harness::new();
        let (a, mut rx_a) = h.connect();
        let (b, _rx_b) = h.connect();
        h.tracker.register(a, UserRegistration::new("A1")).await.unwrap();
        drain(&mut rx_a);

        h.tracker.register(b, UserRegistration::new("B1")).await.unwrap();
        let again = h.tracker.register(b, UserRegistration::new("B1")).await.unwrap();

        assert!(!again.fresh_join);
        assert_eq!(named(&drain(&mut rx_a), "peer-joined").len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_registration_still_sends_snapshot() {
        let h = Harness::new();
        let (a, _rx_a) = h.connect();
        let (b, mut rx_b) = h.connect();
        h.tracker.register(a, UserRegistration::new("A1")).await.unwrap();
        h.tracker.record_location(sample("A1"));

        h.tracker.register(b, UserRegistration::new("B1")).await.unwrap();
        h.tracker.register(b, UserRegistration::new("B1")).await.unwrap();

        let frames = drain(&mut rx_b);
        let snapshots = named(&frames, "location-snapshot");
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[1]["data"][0]["userId"], "A1");
    }

    #[tokio::test]
    async fn test_superseded_disconnect_is_noop() {
        let h = Harness::new();
        let (watcher, mut rx_w) = h.connect();
        h.tracker.register(watcher, UserRegistration::new("W1")).await.unwrap();

        let (old, _rx_old) = h.connect();
        let (new, _rx_new) = h.connect();
        let old_lease = h.tracker.register(old, UserRegistration::new("B1")).await.unwrap().lease;
        let reconnect = h.tracker.register(new, UserRegistration::new("B1")).await.unwrap();
        assert!(!reconnect.fresh_join);
        drain(&mut rx_w);

        h.router.remove(old);
        assert!(!h.tracker.disconnect(&old_lease));

        assert_eq!(h.tracker.lookup("B1"), Some(new));
        assert!(named(&drain(&mut rx_w), "peer-left").is_empty());
    }

    #[tokio::test]
    async fn test_stale_binding_counts_as_fresh_join() {
        let h = Harness::new();
        let (watcher, mut rx_w) = h.connect();
        h.tracker.register(watcher, UserRegistration::new("W1")).await.unwrap();

        let (old, _rx_old) = h.connect();
        h.tracker.register(old, UserRegistration::new("B1")).await.unwrap();
        h.tracker.record_location(sample("B1"));
        drain(&mut rx_w);

        // transport dropped the socket but teardown has not run yet
        h.router.remove(old);

        let (new, mut rx_new) = h.connect();
        let reg = h.tracker.register(new, UserRegistration::new("B1")).await.unwrap();

        assert!(reg.fresh_join);
        assert_eq!(named(&drain(&mut rx_w), "peer-joined").len(), 1);
        let frames = drain(&mut rx_new);
        assert_eq!(named(&frames, "location-snapshot")[0]["data"], Value::Array(vec![]));
    }

    #[tokio::test]
    async fn test_disconnect_twice_broadcasts_once() {
        let h = Harness::new();
        let (watcher, mut rx_w) = h.connect();
        h.tracker.register(watcher, UserRegistration::new("W1")).await.unwrap();
        let (b, _rx_b) = h.connect();
        let lease = h.tracker.register(b, UserRegistration::new("B1")).await.unwrap().lease;
        h.tracker.record_location(sample("B1"));
        drain(&mut rx_w);

        assert!(h.tracker.disconnect(&lease));
        assert!(!h.tracker.disconnect(&lease));

        let left = drain(&mut rx_w);
        let left = named(&left, "peer-left");
        assert_eq!(left.len(), 1);
        assert_eq!(left[0]["data"]["userId"], "B1");
        assert!(!h.tracker.is_present("B1"));
        assert!(h.tracker.snapshot().iter().all(|s| s.user_id != "B1"));
    }

    #[tokio::test]
    async fn test_store_failure_leaves_registry_untouched() {
        let h = Harness::new();
        let (watcher, mut rx_w) = h.connect();
        h.tracker.register(watcher, UserRegistration::new("W1")).await.unwrap();
        drain(&mut rx_w);

        let (b, mut rx_b) = h.connect();
        h.store.fail_users(true);
        let err = h.tracker.register(b, UserRegistration::new("B1")).await.unwrap_err();
        assert!(matches!(err, RegisterError::Store(_)));
        assert!(!h.tracker.is_present("B1"));

        let frames = drain(&mut rx_b);
        assert_eq!(named(&frames, "registered")[0]["data"]["success"], false);
        assert!(named(&frames, "location-snapshot").is_empty());
        assert!(drain(&mut rx_w).is_empty());

        h.store.fail_users(false);
        let retry = h.tracker.register(b, UserRegistration::new("B1")).await.unwrap();
        assert!(retry.fresh_join);
    }

    #[tokio::test]
    async fn test_missing_id_rejected() {
        let h = Harness::new();
        let (a, mut rx_a) = h.connect();

        let err = h.tracker.register(a, UserRegistration::new("  ")).await.unwrap_err();

        assert!(matches!(err, RegisterError::MissingId));
        assert_eq!(named(&drain(&mut rx_a), "registered")[0]["data"]["success"], false);
        assert!(h.tracker.present_users().is_empty());
    }

    #[tokio::test]
    async fn test_closed_connection_not_registered() {
        let h = Harness::new();
        let (a, _rx_a) = h.connect();
        h.router.remove(a);

        let err = h.tracker.register(a, UserRegistration::new("A1")).await.unwrap_err();

        assert!(matches!(err, RegisterError::ConnectionClosed));
        assert!(!h.tracker.is_present("A1"));
    }

    #[tokio::test]
    async fn test_reregister_as_other_user_releases_old_identity() {
        let h = Harness::new();
        let (watcher, mut rx_w) = h.connect();
        h.tracker.register(watcher, UserRegistration::new("W1")).await.unwrap();
        let (c, _rx_c) = h.connect();
        h.tracker.register(c, UserRegistration::new("B1")).await.unwrap();
        drain(&mut rx_w);

        h.tracker.register(c, UserRegistration::new("B2")).await.unwrap();

        let frames = drain(&mut rx_w);
        assert_eq!(named(&frames, "peer-left")[0]["data"]["userId"], "B1");
        assert_eq!(named(&frames, "peer-joined")[0]["data"]["userId"], "B2");
        assert_eq!(h.tracker.present_users(), vec!["B2".to_string(), "W1".to_string()]);
    }

    #[tokio::test]
    async fn test_record_location_requires_registration() {
        let h = Harness::new();
        let (a, _rx_a) = h.connect();

        assert!(!h.tracker.record_location(sample("A1")));
        h.tracker.register(a, UserRegistration::new("A1")).await.unwrap();
        assert!(h.tracker.record_location(sample("A1")));
        assert!(h.tracker.record_location(sample("A1")));
        assert_eq!(h.tracker.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_reconnect_keeps_stale_binding_for_teardown() {
        let h = Harness::new();
        let (watcher, mut rx_w) = h.connect();
        h.tracker.register(watcher, UserRegistration::new("W1")).await.unwrap();
        let (old, _rx_old) = h.connect();
        let old_lease = h.tracker.register(old, UserRegistration::new("B1")).await.unwrap().lease;
        drain(&mut rx_w);

        // socket gone, teardown still pending
        h.router.remove(old);

        let (new, _rx_new) = h.connect();
        h.store.fail_users(true);
        assert!(h.tracker.register(new, UserRegistration::new("B1")).await.is_err());
        assert_eq!(h.tracker.lookup("B1"), Some(old));

        assert!(h.tracker.disconnect(&old_lease));
        let left = drain(&mut rx_w);
        assert_eq!(named(&left, "peer-left").len(), 1);
        assert!(!h.tracker.is_present("B1"));
    }

    #[tokio::test]
    async fn test_join_notice_uses_announced_profile() {
        let h = Harness::new();
        let (watcher, mut rx_w) = h.connect();
        h.tracker.register(watcher, UserRegistration::new("W1")).await.unwrap();

        let (first, _rx_first) = h.connect();
        let lease = h
            .tracker
            .register(first, UserRegistration::new("B1").with_name("Truck 7").with_platform("android"))
            .await
            .unwrap()
            .lease;
        h.tracker.disconnect(&lease);
        drain(&mut rx_w);

        // returning without a name: the store keeps "Truck 7", the notice does not
        let (second, _rx_second) = h.connect();
        let reg = h.tracker.register(second, UserRegistration::new("B1")).await.unwrap();
        assert_eq!(reg.profile.name.as_deref(), Some("Truck 7"));

        let frames = drain(&mut rx_w);
        let joined = named(&frames, "peer-joined");
        assert_eq!(joined[0]["data"]["name"], Value::Null);
        assert_eq!(joined[0]["data"]["platform"], "web");
        assert_eq!(joined[0]["data"]["sequenceNumber"], 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_teardown_of_one_lease_removes_once() {
        let h = Arc::new(Harness::new());
        let (watcher, mut rx_w) = h.connect();
        h.tracker.register(watcher, UserRegistration::new("W1")).await.unwrap();

        for _ in 0..50 {
            let (b, _rx_b) = h.connect();
            let lease = h.tracker.register(b, UserRegistration::new("B1")).await.unwrap().lease;
            drain(&mut rx_w);

            let tasks: Vec<_> = (0..8)
                .map(|_| {
                    let h = Arc::clone(&h);
                    let lease = lease.clone();
                    tokio::spawn(async move { h.tracker.disconnect(&lease) })
                })
                .collect();

            let mut removed = 0;
            for task in tasks {
                if task.await.unwrap() {
                    removed += 1;
                }
            }

            assert_eq!(removed, 1);
            assert_eq!(named(&drain(&mut rx_w), "peer-left").len(), 1);
            assert!(!h.tracker.is_present("B1"));
            h.router.remove(b);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_reconnect_and_teardown_keep_registry_consistent() {
        let h = Arc::new(Harness::new());
        let (watcher, mut rx_w) = h.connect();
        h.tracker.register(watcher, UserRegistration::new("W1")).await.unwrap();

        for _ in 0..50 {
            let (old, _rx_old) = h.connect();
            let old_lease = h.tracker.register(old, UserRegistration::new("B1")).await.unwrap().lease;
            let (new, _rx_new) = h.connect();
            drain(&mut rx_w);

            let register = {
                let h = Arc::clone(&h);
                tokio::spawn(async move { h.tracker.register(new, UserRegistration::new("B1")).await })
            };
            let teardown = {
                let h = Arc::clone(&h);
                tokio::spawn(async move {
                    h.router.remove(old);
                    h.tracker.disconnect(&old_lease)
                })
            };

            let new_lease = register.await.unwrap().unwrap().lease;
            teardown.await.unwrap();

            // the newer connection always wins
            assert_eq!(h.tracker.lookup("B1"), Some(new));
            let frames = drain(&mut rx_w);
            let about_b1: Vec<&Value> = frames
                .iter()
                .filter(|f| f["data"]["userId"] == "B1")
                .collect();
            assert!(named(&frames, "peer-left").len() <= 1);
            if let Some(last) = about_b1.last() {
                assert_eq!(last["event"], "peer-joined");
            }

            assert!(h.tracker.disconnect(&new_lease));
            assert_eq!(named(&drain(&mut rx_w), "peer-left").len(), 1);
            assert!(!h.tracker.is_present("B1"));
            assert!(h.tracker.snapshot().is_empty());
            h.router.remove(new);
        }
    }
}
