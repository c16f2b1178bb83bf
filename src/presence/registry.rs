//! Connection registry: user identity to live connection binding

use std::collections::HashMap;

use crate::types::{ConnId, PeerProfile};

/// Binding of a user identity to its current connection
#[derive(Clone, Debug, PartialEq)]
pub struct UserSession {
    pub conn_id: ConnId,
    /// Generation the current binding was issued under
    pub generation: u64,
    /// Profile captured at registration time
    pub profile: PeerProfile,
}

/// Proof held by a connection that it was bound to a user.
///
/// Teardown only succeeds while the lease still matches the registry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionLease {
    pub user_id: String,
    pub conn_id: ConnId,
    pub generation: u64,
}

/// Result of [`ConnectionRegistry::register`]
#[derive(Clone, Debug, PartialEq)]
pub struct Registered {
    pub lease: SessionLease,
    /// Session that was bound before this call, if any
    pub previous: Option<UserSession>,
}

/// In-memory map of user identity to session. No I/O, no locking:
/// callers serialize access.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: HashMap<String, UserSession>,
    generation: u64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `user_id` to `conn_id`, overwriting any previous binding.
    ///
    /// Every call issues a new generation, so leases handed out earlier
    /// become stale.
    pub fn register(&mut self, user_id: &str, conn_id: ConnId, profile: PeerProfile) -> Registered {
        self.generation += 1;
        let generation = self.generation;

        let previous = self.sessions.insert(
            user_id.to_string(),
            UserSession {
                conn_id,
                generation,
                profile,
            },
        );

        Registered {
            lease: SessionLease {
                user_id: user_id.to_string(),
                conn_id,
                generation,
            },
            previous,
        }
    }

    /// Current connection bound to `user_id`
    pub fn lookup(&self, user_id: &str) -> Option<ConnId> {
        self.sessions.get(user_id).map(|s| s.conn_id)
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.sessions.contains_key(user_id)
    }

    /// Remove the binding only if it is still the one `lease` was issued for.
    ///
    /// Returns the removed session, or `None` when a newer registration
    /// superseded the lease (or the binding is already gone).
    pub fn unregister_if_current(&mut self, lease: &SessionLease) -> Option<UserSession> {
        let current = self.sessions.get(&lease.user_id)?;
        if current.conn_id != lease.conn_id || current.generation != lease.generation {
            return None;
        }
        self.sessions.remove(&lease.user_id)
    }

    /// Undo `registered` if its binding is still current, putting back the
    /// session it replaced. Generations are never reused.
    pub fn rollback(&mut self, registered: Registered) -> bool {
        if self.unregister_if_current(&registered.lease).is_none() {
            return false;
        }
        if let Some(previous) = registered.previous {
            self.sessions.insert(registered.lease.user_id, previous);
        }
        true
    }

    /// Identities of all registered users, sorted
    pub fn users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.sessions.keys().cloned().collect();
        users.sort();
        users
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn profile(seq: u64) -> PeerProfile {
        PeerProfile {
            sequence_number: seq,
            name: None,
            platform: "web".to_string(),
            device_model: None,
        }
    }

    #[test]
    fn test_register_returns_previous_connection() {
        let mut registry = ConnectionRegistry::new();
        let c1 = Uuid::new_v4();
        let c2 = Uuid::new_v4();

        let first = registry.register("A1", c1, profile(1));
        assert_eq!(first.previous, None);

        let second = registry.register("A1", c2, profile(1));
        assert_eq!(second.previous.map(|s| s.conn_id), Some(c1));
        assert_eq!(registry.lookup("A1"), Some(c2));
        assert_eq!(registry.len(), 1);
        assert!(second.lease.generation > first.lease.generation);
    }

    #[test]
    fn test_unregister_if_current_ignores_superseded_lease() {
        let mut registry = ConnectionRegistry::new();
        let old = registry.register("A1", Uuid::new_v4(), profile(1)).lease;
        let new = registry.register("A1", Uuid::new_v4(), profile(1)).lease;

        assert!(registry.unregister_if_current(&old).is_none());
        assert!(registry.contains("A1"));

        assert!(registry.unregister_if_current(&new).is_some());
        assert!(!registry.contains("A1"));
    }

    #[test]
    fn test_same_connection_reregistration_invalidates_old_generation() {
        let mut registry = ConnectionRegistry::new();
        let conn = Uuid::new_v4();
        let old = registry.register("A1", conn, profile(1)).lease;
        let new = registry.register("A1", conn, profile(1)).lease;

        assert!(registry.unregister_if_current(&old).is_none());
        assert!(registry.unregister_if_current(&new).is_some());
    }

    #[test]
    fn test_unregister_twice_removes_once() {
        let mut registry = ConnectionRegistry::new();
        let lease = registry.register("A1", Uuid::new_v4(), profile(1)).lease;

        assert!(registry.unregister_if_current(&lease).is_some());
        assert!(registry.unregister_if_current(&lease).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_rollback_restores_previous_binding() {
        let mut registry = ConnectionRegistry::new();
        let live = Uuid::new_v4();
        let first = registry.register("A1", live, profile(1)).lease;

        let second = registry.register("A1", Uuid::new_v4(), profile(1));
        assert!(registry.rollback(second));

        assert_eq!(registry.lookup("A1"), Some(live));
        assert!(registry.unregister_if_current(&first).is_some());
    }

    #[test]
    fn test_rollback_of_first_binding_removes_user() {
        let mut registry = ConnectionRegistry::new();
        let registered = registry.register("A1", Uuid::new_v4(), profile(1));

        assert!(registry.rollback(registered));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_rollback_after_newer_registration_is_noop() {
        let mut registry = ConnectionRegistry::new();
        let stale = registry.register("A1", Uuid::new_v4(), profile(1));
        let newest = Uuid::new_v4();
        registry.register("A1", newest, profile(1));

        assert!(!registry.rollback(stale));
        assert_eq!(registry.lookup("A1"), Some(newest));
    }
}
