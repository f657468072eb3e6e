use std::sync::Arc;

use crate::auth::AuthSession;
use crate::config::Config;
use crate::gateway::{BackendRpc, RoomGateway};
use crate::realtime::{RealtimeTransport, SubscriptionManager};
use crate::recent::RecentRooms;
use crate::session::RoomSession;

/// Explicit collaborator bundle. Built once by the application and handed to
/// whatever owns a chat view; tests construct it with in-memory doubles for
/// the RPC and realtime seams.
#[derive(Clone)]
pub struct ClientContext {
    pub config: Arc<Config>,
    pub auth: Arc<AuthSession>,
    pub gateway: Arc<RoomGateway>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub recent_rooms: Arc<RecentRooms>,
}

impl ClientContext {
    pub fn new(
        config: Config,
        auth: Arc<AuthSession>,
        rpc: Arc<dyn BackendRpc>,
        transport: Arc<dyn RealtimeTransport>,
    ) -> Self {
        let recent_rooms = Arc::new(RecentRooms::new(config.recent_rooms_path.clone()));
        Self {
            config: Arc::new(config),
            auth: auth.clone(),
            gateway: Arc::new(RoomGateway::new(rpc, auth)),
            subscriptions: Arc::new(SubscriptionManager::new(transport)),
            recent_rooms,
        }
    }

    /// A fresh session controller for one mounted chat view
    pub fn session(&self) -> RoomSession {
        RoomSession::new(
            self.gateway.clone(),
            self.subscriptions.clone(),
            self.auth.clone(),
            self.config.message_page_size,
        )
    }
}
