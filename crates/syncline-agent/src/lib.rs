//! # syncline-agent
//!
//! Runtime wiring for the Syncline client: configuration, the signed-in
//! [`Session`](session::Session), the realtime read loop and the default
//! entity cache. The `syncline` binary drives these.

pub mod config;
pub mod metrics;
pub mod realtime;
pub mod session;
pub mod store;

pub use config::Config;
pub use realtime::{RealtimeLoop, ReconnectPolicy};
pub use session::Session;
pub use store::{EntityStore, ENTITY_TYPES};
