//! Connectivity status and server-declared signals.
//!
//! The API server signals trouble out of band: an alerts header lists
//! degraded subsystems and a maintenance header suspends normal operation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// HTTP header names used by the sync layer.
pub mod headers {
    /// Comma-separated list of active server alerts.
    pub const ALERTS: &str = "X-CS-API-Alerts";
    /// Boolean maintenance-mode flag.
    pub const MAINTENANCE_MODE: &str = "X-CS-API-Maintenance-Mode";
    /// Server-assigned request identifier.
    pub const REQUEST_ID: &str = "x-request-id";
    /// Client IDE name.
    pub const CLIENT_IDE: &str = "X-CS-Plugin-IDE";
    /// Client IDE detail (edition, distribution).
    pub const CLIENT_IDE_DETAIL: &str = "X-CS-Plugin-IDE-Detail";
    /// Client IDE version.
    pub const CLIENT_IDE_VERSION: &str = "X-CS-IDE-Version";
    /// Client plugin version and build.
    pub const CLIENT_PLUGIN_VERSION: &str = "X-CS-Plugin-Version";
}

/// Known alert tokens.
pub mod alerts {
    /// The broadcaster cannot reach its subscribers.
    pub const BROADCASTER_CONNECTION_FAILURE: &str = "broadcasterConnectionFailure";
    /// The broadcaster is not receiving acknowledgements.
    pub const BROADCASTER_ACKNOWLEDGEMENT_FAILURE: &str = "broadcasterAcknowledgementFailure";

    /// Split an alerts header value into trimmed, non-empty tokens.
    #[must_use]
    pub fn parse(header: &str) -> Vec<String> {
        header
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Parse a boolean-valued header.
///
/// Absent, empty, `false` and `0` are false; anything else is true.
#[must_use]
pub fn header_flag(value: Option<&str>) -> bool {
    match value.map(str::trim) {
        None | Some("") => false,
        Some(v) => !(v.eq_ignore_ascii_case("false") || v == "0"),
    }
}

/// Realtime connectivity status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Connectivity recovered.
    Reconnected,
    /// Connectivity is degraded; recovery is in progress.
    Reconnecting,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Reconnected => "reconnected",
            ConnectionStatus::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// Reason codes attached to `Reconnecting` notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionCode {
    /// The realtime channel itself reported a lost connection.
    #[serde(rename = "BCOM-1001")]
    BroadcasterConnectionLost,
    /// The API server reported a broadcaster connection failure.
    #[serde(rename = "BCOM-1002")]
    ApiBroadcasterConnectionFailure,
    /// The API server reported a broadcaster acknowledgement failure.
    #[serde(rename = "BCOM-1003")]
    ApiBroadcasterAcknowledgementFailure,
    /// No echo heartbeat arrived in time.
    #[serde(rename = "BCOM-1004")]
    EchoTimeout,
}

impl ConnectionCode {
    /// The wire code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionCode::BroadcasterConnectionLost => "BCOM-1001",
            ConnectionCode::ApiBroadcasterConnectionFailure => "BCOM-1002",
            ConnectionCode::ApiBroadcasterAcknowledgementFailure => "BCOM-1003",
            ConnectionCode::EchoTimeout => "BCOM-1004",
        }
    }

    /// Map a set of active alerts to a broadcaster failure code.
    ///
    /// Connection failure takes precedence over acknowledgement failure.
    /// Returns `None` if no broadcaster alert is active.
    #[must_use]
    pub fn from_alerts(active: &[String]) -> Option<Self> {
        let has = |token: &str| active.iter().any(|a| a == token);
        if has(alerts::BROADCASTER_CONNECTION_FAILURE) {
            Some(ConnectionCode::ApiBroadcasterConnectionFailure)
        } else if has(alerts::BROADCASTER_ACKNOWLEDGEMENT_FAILURE) {
            Some(ConnectionCode::ApiBroadcasterAcknowledgementFailure)
        } else {
            None
        }
    }
}

impl fmt::Display for ConnectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
