//! # syncline-core
//!
//! Synchronisation and resilience layer of the Syncline client.
//!
//! - **EventBus** - Typed pub/sub of [`SyncEvent`]s to UI and state layers
//! - **Resolver** - Per-type reconciliation of realtime payloads
//! - **Dispatcher** - Ordered realtime dispatch with a blocking lane
//! - **ConnectionHealthMonitor** - Broadcaster alerts, echo heartbeat and
//!   maintenance mode
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │ EventSource  │───▶│  Dispatcher  │───▶│   EventBus   │
//! └──────────────┘    └──────┬───────┘    └──────────────┘
//!                            │ observes          ▲
//!                            ▼                   │
//! ┌──────────────┐    ┌──────────────┐           │
//! │   Pipeline   │◀──▶│    Health    │───────────┘
//! └──────────────┘    └──────────────┘
//! ```

pub mod bus;
pub mod dispatcher;
pub mod health;
pub mod resolver;
pub mod unreads;

pub use bus::{EventBus, MaintenanceContext, SyncEvent};
pub use dispatcher::{DispatchError, Dispatcher, DispatcherConfig, RealtimeObserver};
pub use health::{
    ConnectionHealthMonitor, EchoState, HealthConfig, HealthSnapshot, Probe, SessionContext,
};
pub use resolver::{ResolveError, ResolveOptions, Resolver, ResolverRegistry};
pub use unreads::UnreadTracker;

/// Metric names recorded by this crate.
pub mod names {
    /// Realtime events emitted, by type.
    pub const REALTIME_DISPATCHED: &str = "syncline_realtime_dispatched_total";
    /// Realtime messages dropped, by reason.
    pub const REALTIME_DROPPED: &str = "syncline_realtime_dropped_total";
    /// Realtime messages whose resolution failed, by type.
    pub const REALTIME_FAILED: &str = "syncline_realtime_failed_total";
    /// Connection status notifications, by status.
    pub const CONNECTION_STATUS_CHANGES: &str = "syncline_connection_status_changes_total";
}
