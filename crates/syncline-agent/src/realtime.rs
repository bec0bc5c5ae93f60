//! Realtime read loop.
//!
//! Reads messages from an [`EventSource`] and hands them to the dispatcher.
//! Channel loss and recovery are reported as `connection` realtime messages
//! so the health monitor turns them into connection status events.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use syncline_core::{ConnectionHealthMonitor, Dispatcher};
use syncline_protocol::{ConnectionStatus, MessageType, RealtimeMessage};
use syncline_transport::EventSource;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics;

/// Delay between reconnect attempts, doubling up to `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial.saturating_mul(factor).min(self.max)
    }
}

/// Everything the read loop feeds.
pub struct RealtimeLoop {
    pub dispatcher: Arc<Dispatcher>,
    pub monitor: Arc<ConnectionHealthMonitor>,
    pub policy: ReconnectPolicy,
}

impl RealtimeLoop {
    /// Run until `cancel` fires.
    pub async fn run<S: EventSource>(self, mut source: S, cancel: CancellationToken) {
        let mut attempt = 0u32;
        let mut was_connected = false;

        'outer: loop {
            if attempt > 0 {
                let delay = self.policy.delay(attempt);
                debug!(attempt, delay = ?delay, "Waiting before reconnecting");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                metrics::record_reconnect();
            }

            let connected = tokio::select! {
                _ = cancel.cancelled() => break,
                result = source.connect() => result,
            };
            if let Err(e) = connected {
                warn!(attempt, error = %e, "Realtime channel connect failed");
                attempt = attempt.saturating_add(1);
                continue;
            }

            attempt = 0;
            metrics::set_realtime_connected(true);
            if was_connected {
                info!("Realtime channel reconnected");
                self.report(ConnectionStatus::Reconnected);
            }
            was_connected = true;
            self.monitor.start_heartbeat();

            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => {
                        if let Err(e) = source.close().await {
                            debug!(error = %e, "Realtime channel close failed");
                        }
                        metrics::set_realtime_connected(false);
                        break 'outer;
                    }
                    next = source.recv() => next,
                };
                match next {
                    Ok(Some(message)) => {
                        metrics::record_received(message.message_type.as_str());
                        self.dispatcher.dispatch(message);
                    }
                    Ok(None) => {
                        info!("Realtime channel closed by server");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Realtime channel failed");
                        break;
                    }
                }
            }

            metrics::set_realtime_connected(false);
            self.report(ConnectionStatus::Reconnecting);
            attempt = 1;
        }

        debug!("Realtime loop stopped");
    }

    fn report(&self, status: ConnectionStatus) {
        self.dispatcher.dispatch(RealtimeMessage::new(
            MessageType::Connection,
            json!({ "status": status }),
        ));
    }
}
