//! Shared application state

use std::sync::Arc;

use super::gateway::EventGateway;
use crate::attachments::AttachmentStore;
use crate::config::ServerConfig;
use crate::store::Store;

/// State shared by the WebSocket and REST handlers
pub struct AppState {
    /// Persistence collaborator
    pub store: Arc<dyn Store>,

    /// Real-time entry point, owns the presence state
    pub gateway: Arc<EventGateway>,

    /// Marker attachment files
    pub attachments: AttachmentStore,

    pub config: ServerConfig,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: ServerConfig) -> Self {
        let gateway = Arc::new(EventGateway::new(store.clone()));
        let attachments = AttachmentStore::new(config.upload_dir.clone());
        Self {
            store,
            gateway,
            attachments,
            config,
        }
    }
}
