//! Typed publish/subscribe bus.
//!
//! The dispatcher and the health monitor publish [`SyncEvent`]s here; UI and
//! state layers subscribe. Dropping a receiver unsubscribes it.

use serde::Serialize;
use std::sync::Arc;
use syncline_protocol::{ConnectionCode, ConnectionStatus, RealtimeMessage};
use tokio::sync::broadcast;
use tracing::trace;

/// Default bus capacity.
const DEFAULT_BUS_CAPACITY: usize = 1024;

/// Context handed to the host when the server enters maintenance mode, so it
/// can sign the user back in once maintenance ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceContext {
    /// API server the session is bound to.
    pub server_url: String,
    /// Signed-in user's email.
    pub email: Option<String>,
    /// Signed-in user's id.
    pub user_id: Option<String>,
    /// Selected team.
    pub team_id: Option<String>,
}

/// Events published on the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A resolved realtime message.
    Realtime(RealtimeMessage),
    /// Connectivity changed.
    ConnectionStatusChanged {
        /// New status.
        status: ConnectionStatus,
        /// Why the status changed.
        code: Option<ConnectionCode>,
        /// Clients should discard cached state and refetch.
        reset: bool,
    },
    /// Maintenance mode toggled (debounced).
    MaintenanceModeChanged {
        /// Whether maintenance mode is active.
        active: bool,
    },
    /// The server entered maintenance mode while signed in.
    EnteredMaintenanceMode(MaintenanceContext),
}

impl SyncEvent {
    /// Short event name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SyncEvent::Realtime(_) => "realtime",
            SyncEvent::ConnectionStatusChanged { .. } => "connection_status",
            SyncEvent::MaintenanceModeChanged { .. } => "maintenance_mode",
            SyncEvent::EnteredMaintenanceMode(_) => "entered_maintenance_mode",
        }
    }
}

/// Broadcast bus for [`SyncEvent`]s.
///
/// Cloning the bus yields another handle to the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<SyncEvent>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    /// Create a bus with a specific capacity.
    ///
    /// Subscribers that fall more than `capacity` events behind lose the
    /// oldest events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<SyncEvent>> {
        self.sender.subscribe()
    }

    /// Publish an event.
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, event: SyncEvent) -> usize {
        trace!(kind = event.kind(), "Publishing event");
        self.sender.send(Arc::new(event)).unwrap_or_default()
    }
}
