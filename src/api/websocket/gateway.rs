//! Event gateway: single entry point for inbound real-time messages and for
//! broadcasts triggered by REST mutations

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::broadcaster::{BroadcastRouter, ClientConnection};
use super::events::{ClientMessage, GpsSample, LocationUpdate, SampleAdded, ServerEvent};
use crate::presence::{PresenceTracker, RegisterError, Registration};
use crate::store::Store;
use crate::types::{
    is_valid_coordinate, ConnId, LocationSample, LocationSnapshot, NewLocationSample,
    UserRegistration,
};
use crate::utils::now_millis;

/// Dispatches client messages to the presence core
pub struct EventGateway {
    tracker: Arc<PresenceTracker>,
    router: Arc<BroadcastRouter>,
    store: Arc<dyn Store>,
}

impl EventGateway {
    pub fn new(store: Arc<dyn Store>) -> Self {
        let router = Arc::new(BroadcastRouter::new());
        let tracker = Arc::new(PresenceTracker::new(store.clone(), router.clone()));
        Self {
            tracker,
            router,
            store,
        }
    }

    pub fn tracker(&self) -> &PresenceTracker {
        &self.tracker
    }

    pub fn router(&self) -> &BroadcastRouter {
        &self.router
    }

    /// Open a connection around an outbound queue and send it the current markers
    pub async fn connect(&self, tx: mpsc::Sender<Arc<str>>) -> ConnId {
        let conn = Arc::new(ClientConnection::new(tx));
        let conn_id = conn.id;
        self.router.add(conn);
        debug!(conn_id = %conn_id, connections = self.router.connection_count(), "client connected");

        match self.store.list_markers().await {
            Ok(markers) => {
                self.router.send_to(conn_id, &ServerEvent::MarkersInitial(markers));
            }
            Err(e) => warn!(conn_id = %conn_id, error = %e, "failed to load initial markers"),
        }

        conn_id
    }

    /// Parse and dispatch one text frame
    pub async fn handle_text(&self, conn_id: ConnId, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.handle_message(conn_id, message).await,
            Err(e) => {
                warn!(conn_id = %conn_id, error = %e, "unreadable client message");
                self.router.send_to(conn_id, &ServerEvent::error("bad_message", e.to_string()));
            }
        }
    }

    pub async fn handle_message(&self, conn_id: ConnId, message: ClientMessage) {
        match message {
            ClientMessage::Register(request) => {
                // Outcome is already reported to the client by the tracker.
                let _ = self.register(conn_id, request).await;
            }
            ClientMessage::LocationUpdate(update) => {
                self.location_update(conn_id, update);
            }
            ClientMessage::GpsSample(sample) => {
                self.gps_sample(conn_id, sample).await;
            }
            ClientMessage::Ping => {
                self.router.send_to(conn_id, &ServerEvent::Pong);
            }
        }
    }

    pub async fn register(
        &self,
        conn_id: ConnId,
        request: UserRegistration,
    ) -> Result<Registration, RegisterError> {
        self.tracker.register(conn_id, request).await
    }

    /// Handle `location-update`: cache, persist in the background, fan out.
    ///
    /// Returns the number of connections the update was queued for, or
    /// `None` if the message was dropped.
    pub fn location_update(&self, conn_id: ConnId, update: LocationUpdate) -> Option<usize> {
        if !is_valid_coordinate(update.lat, update.lng) {
            warn!(conn_id = %conn_id, lat = update.lat, lng = update.lng, "invalid location received");
            return None;
        }

        let Some(user_id) = self.resolve_user(conn_id, update.user_id) else {
            warn!(conn_id = %conn_id, "location received without user id");
            return None;
        };

        let sample = LocationSample {
            user_id: user_id.clone(),
            lat: update.lat,
            lng: update.lng,
            speed: update.speed.unwrap_or(0.0),
            accuracy: update.accuracy,
            timestamp: update.timestamp.unwrap_or_else(now_millis),
        };
        let live = LocationSnapshot::from(&sample);
        if !self.tracker.record_location(sample) {
            debug!(user_id = %user_id, "location from unregistered user not cached");
        }

        let store = self.store.clone();
        let record = NewLocationSample {
            user_id: Some(user_id.clone()),
            lat: update.lat,
            lng: update.lng,
            accuracy: update.accuracy,
            timestamp: Utc::now(),
        };
        tokio::spawn(async move {
            if let Err(e) = store.save_location_sample(&record).await {
                warn!(user_id = ?record.user_id, error = %e, "failed to persist location sample");
            }
        });

        let delivered = self
            .router
            .broadcast_except(Some(&user_id), &ServerEvent::PeerLocation(live));
        debug!(user_id = %user_id, delivered, "location forwarded");
        Some(delivered)
    }

    /// Handle the legacy `gps-sample`: persist, then broadcast even if
    /// persistence failed.
    pub async fn gps_sample(&self, conn_id: ConnId, sample: GpsSample) -> Option<usize> {
        if !is_valid_coordinate(sample.lat, sample.lng) {
            warn!(conn_id = %conn_id, lat = sample.lat, lng = sample.lng, "invalid gps sample received");
            return None;
        }

        let user_id = self.resolve_user(conn_id, sample.user_id);
        let timestamp = Utc::now();
        let record = NewLocationSample {
            user_id: user_id.clone(),
            lat: sample.lat,
            lng: sample.lng,
            accuracy: sample.accuracy,
            timestamp,
        };

        let id = match self.store.save_location_sample(&record).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(user_id = ?user_id, error = %e, "failed to persist gps sample");
                None
            }
        };

        let event = ServerEvent::SampleAdded(SampleAdded {
            id,
            lat: sample.lat,
            lng: sample.lng,
            accuracy: sample.accuracy,
            user_id: user_id.clone(),
            timestamp,
        });
        Some(self.router.broadcast_except(user_id.as_deref(), &event))
    }

    /// Transport teardown of `conn_id`. Safe to call more than once.
    pub fn disconnect(&self, conn_id: ConnId) -> bool {
        let Some(conn) = self.router.remove(conn_id) else {
            return false;
        };

        match conn.lease() {
            Some(lease) => self.tracker.disconnect(&lease),
            None => {
                debug!(conn_id = %conn_id, "unregistered client disconnected");
                false
            }
        }
    }

    /// Broadcast hook for REST mutations. Without an acting user every
    /// connection receives the event.
    pub fn notify_others(&self, acting_user: Option<&str>, event: ServerEvent) -> usize {
        if acting_user.is_none() {
            debug!(event = event.name(), "no acting user, notifying every client");
        }
        self.router.broadcast_except(acting_user, &event)
    }

    /// User identity from the payload, falling back to the connection's binding
    fn resolve_user(&self, conn_id: ConnId, from_payload: Option<String>) -> Option<String> {
        from_payload
            .filter(|id| !id.trim().is_empty())
            .or_else(|| self.router.lease_of(conn_id).map(|l| l.user_id))
    }
}
