//! Connection health monitor.
//!
//! Tracks three independent signals and publishes connectivity events on the
//! [`EventBus`]:
//!
//! - **Broadcaster track**: API responses carrying broadcaster alerts put the
//!   connection in a degraded state. A recovery probe is scheduled, or issued
//!   at once when a realtime message proves the channel is partly alive.
//! - **Echo track**: on self-hosted deployments with echoes enabled, a missing
//!   heartbeat within the echo timeout reports `Reconnecting`.
//! - **Maintenance track**: the maintenance header is debounced with a leading
//!   edge; entering maintenance while signed in raises a separate event.
//!
//! Every timer and in-flight recovery check is owned by the monitor and
//! cancelled on login and logout.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;
use syncline_protocol::{
    alerts, header_flag, headers, ConnectionCode, ConnectionStatus, MessageType, RealtimeMessage,
};
use syncline_transport::{
    ApiError, HttpResponse, Middleware, MiddlewareContext, MiddlewareError, RequestPipeline,
    ServerCapabilities, CAPABILITIES_PATH,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, MaintenanceContext, SyncEvent};
use crate::dispatcher::RealtimeObserver;
use crate::names;

/// Health monitor timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthConfig {
    /// Heartbeat window.
    pub echo_timeout: Duration,
    /// Delay before re-probing a degraded broadcaster.
    pub broadcaster_recovery: Duration,
    /// Minimum spacing of maintenance notifications.
    pub maintenance_debounce: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            echo_timeout: Duration::from_secs(10),
            broadcaster_recovery: Duration::from_secs(30),
            maintenance_debounce: Duration::from_secs(2),
        }
    }
}

/// A lightweight request proving the API (and its alerts) are reachable.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Issue the probe.
    ///
    /// # Errors
    ///
    /// Returns the API error if the probe fails.
    async fn probe(&self) -> Result<(), ApiError>;
}

#[async_trait]
impl Probe for RequestPipeline {
    async fn probe(&self) -> Result<(), ApiError> {
        self.get(CAPABILITIES_PATH).await.map(|_| ())
    }
}

/// The signed-in session, as far as the monitor cares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    /// API server URL.
    pub server_url: String,
    /// Whether the session holds a valid access token.
    pub has_credentials: bool,
    /// Signed-in user's id.
    pub user_id: Option<String>,
    /// Signed-in user's email.
    pub email: Option<String>,
    /// Selected team.
    pub team_id: Option<String>,
}

impl SessionContext {
    fn maintenance_context(&self) -> MaintenanceContext {
        MaintenanceContext {
            server_url: self.server_url.clone(),
            email: self.email.clone(),
            user_id: self.user_id.clone(),
            team_id: self.team_id.clone(),
        }
    }
}

/// Heartbeat track state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EchoState {
    /// Heartbeat not running.
    #[default]
    Idle,
    /// Waiting for the next echo.
    Armed,
    /// The last window elapsed without an echo.
    TimedOut,
}

/// Snapshot of the monitor's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSnapshot {
    /// Active server alerts.
    pub alerts: Vec<String>,
    /// Broadcaster failure, if degraded.
    pub broadcaster: Option<ConnectionCode>,
    /// Heartbeat state.
    pub echo: EchoState,
    /// Last maintenance value seen on a response.
    pub maintenance: bool,
}

struct Timer {
    id: u64,
    handle: JoinHandle<()>,
}

impl Timer {
    fn cancel(self) {
        self.handle.abort();
    }
}

#[derive(Default)]
struct State {
    session: SessionContext,
    alerts: Vec<String>,
    broadcaster: Option<ConnectionCode>,
    recovery_timer: Option<Timer>,
    echo_enabled: bool,
    echo: EchoState,
    echo_timer: Option<Timer>,
    maintenance: bool,
    maintenance_notified: bool,
    maintenance_window: Option<Timer>,
    entered_notified: bool,
    cancel: CancellationToken,
    next_timer_id: u64,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_timer_id += 1;
        self.next_timer_id
    }

    fn cancel_timers(&mut self) {
        self.cancel.cancel();
        for timer in [
            self.recovery_timer.take(),
            self.echo_timer.take(),
            self.maintenance_window.take(),
        ]
        .into_iter()
        .flatten()
        {
            timer.cancel();
        }
    }
}

/// Tracks broadcaster alerts, echo heartbeats and maintenance mode.
pub struct ConnectionHealthMonitor {
    config: HealthConfig,
    bus: EventBus,
    probe: RwLock<Option<Weak<dyn Probe>>>,
    state: Mutex<State>,
    checks: TaskTracker,
    this: Weak<ConnectionHealthMonitor>,
}

impl ConnectionHealthMonitor {
    /// Create a monitor publishing on `bus`.
    #[must_use]
    pub fn new(config: HealthConfig, bus: EventBus) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            config,
            bus,
            probe: RwLock::new(None),
            state: Mutex::new(State::default()),
            checks: TaskTracker::new(),
            this: this.clone(),
        })
    }

    /// Set the probe used for broadcaster recovery.
    ///
    /// Held weakly; the pipeline usually owns the monitor as a middleware.
    pub fn set_probe(&self, probe: Weak<dyn Probe>) {
        *self.probe.write() = Some(probe);
    }

    /// Start monitoring a signed-in session.
    ///
    /// Clears all state and timers from any previous session. The heartbeat
    /// runs only on self-hosted deployments with echoes enabled.
    pub fn login(&self, session: SessionContext, capabilities: &ServerCapabilities) {
        let mut state = self.state.lock();
        state.cancel_timers();
        let next_timer_id = state.next_timer_id;
        *state = State {
            session,
            echo_enabled: capabilities.is_on_prem && capabilities.echoes_enabled(),
            next_timer_id,
            ..Default::default()
        };
        info!(
            user = ?state.session.user_id,
            echoes = state.echo_enabled,
            "Connection health monitoring started"
        );
        if state.echo_enabled {
            self.arm_echo(&mut state);
        }
    }

    /// Stop monitoring. Cancels every timer.
    pub fn logout(&self) {
        let mut state = self.state.lock();
        state.cancel_timers();
        let next_timer_id = state.next_timer_id;
        *state = State {
            next_timer_id,
            ..Default::default()
        };
        info!("Connection health monitoring stopped");
    }

    /// Arm the heartbeat if it is enabled and not already running.
    pub fn start_heartbeat(&self) {
        let mut state = self.state.lock();
        if state.echo_enabled && state.echo_timer.is_none() {
            self.arm_echo(&mut state);
        }
    }

    /// Current state.
    #[must_use]
    pub fn snapshot(&self) -> HealthSnapshot {
        let state = self.state.lock();
        HealthSnapshot {
            alerts: state.alerts.clone(),
            broadcaster: state.broadcaster,
            echo: state.echo,
            maintenance: state.maintenance,
        }
    }

    /// Inspect an API response for alerts and maintenance mode.
    pub fn observe_response(&self, response: &HttpResponse) {
        let active = response.header(headers::ALERTS).map(alerts::parse).unwrap_or_default();
        let maintenance = header_flag(response.header(headers::MAINTENANCE_MODE));

        let mut state = self.state.lock();
        self.observe_alerts(&mut state, active);
        self.observe_maintenance(&mut state, maintenance);
    }

    fn observe_alerts(&self, state: &mut State, active: Vec<String>) {
        if active.is_empty() {
            if !state.alerts.is_empty() {
                info!("API server cleared all active alerts");
                state.alerts.clear();
                state.broadcaster = None;
                if let Some(timer) = state.recovery_timer.take() {
                    timer.cancel();
                }
                self.emit_status(ConnectionStatus::Reconnected, None, false);
            }
            return;
        }

        if active != state.alerts {
            warn!(alerts = ?active, "API server posted alerts");
        }
        let code = ConnectionCode::from_alerts(&active);
        state.alerts = active;

        // A partial clear leaves any pending recovery check armed.
        let previous = std::mem::replace(&mut state.broadcaster, code);
        if let Some(code) = code {
            if previous != Some(code) {
                warn!(code = %code, "Broadcaster failure detected; reconnecting");
                self.emit_status(ConnectionStatus::Reconnecting, Some(code), false);
            }
            if state.recovery_timer.is_none() {
                self.arm_recovery(state);
            }
        }
    }

    fn observe_maintenance(&self, state: &mut State, active: bool) {
        state.maintenance = active;
        if state.maintenance_window.is_some() {
            return;
        }
        if active != state.maintenance_notified {
            self.notify_maintenance(state, active);
        }
    }

    /// Leading edge: notify now and hold further notifications for one window.
    fn notify_maintenance(&self, state: &mut State, active: bool) {
        debug!(active, "Maintenance mode changed");
        state.maintenance_notified = active;
        self.bus.publish(SyncEvent::MaintenanceModeChanged { active });
        if active {
            self.notify_entered(state);
        } else {
            state.entered_notified = false;
        }

        let id = state.next_id();
        let this = self.this.clone();
        let window = self.config.maintenance_debounce;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(monitor) = this.upgrade() {
                monitor.on_maintenance_window_end(id);
            }
        });
        state.maintenance_window = Some(Timer { id, handle });
    }

    fn on_maintenance_window_end(&self, id: u64) {
        let mut state = self.state.lock();
        if state.maintenance_window.as_ref().map(|t| t.id) != Some(id) {
            return;
        }
        state.maintenance_window = None;
        let pending = state.maintenance;
        if pending != state.maintenance_notified {
            self.notify_maintenance(&mut state, pending);
        }
    }

    fn notify_entered(&self, state: &mut State) {
        if !state.session.has_credentials || state.entered_notified {
            return;
        }
        warn!("Server entered maintenance mode");
        state.entered_notified = true;
        self.bus
            .publish(SyncEvent::EnteredMaintenanceMode(state.session.maintenance_context()));
    }

    fn arm_recovery(&self, state: &mut State) {
        debug!(delay = ?self.config.broadcaster_recovery, "Will check for broadcaster recovery");
        let id = state.next_id();
        let this = self.this.clone();
        let delay = self.config.broadcaster_recovery;
        let cancel = state.cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(monitor) = this.upgrade() else {
                return;
            };
            {
                let mut state = monitor.state.lock();
                if state.recovery_timer.as_ref().map(|t| t.id) != Some(id) {
                    return;
                }
                state.recovery_timer = None;
            }
            info!("Calling API server to detect broadcaster recovery");
            monitor.run_probe(&cancel).await;
        });
        state.recovery_timer = Some(Timer { id, handle });
    }

    fn probe_now(&self, state: &mut State) {
        if let Some(timer) = state.recovery_timer.take() {
            timer.cancel();
        }
        info!("Realtime message received while degraded; checking API server");
        let this = self.this.clone();
        let cancel = state.cancel.clone();
        self.checks.spawn(async move {
            if let Some(monitor) = this.upgrade() {
                monitor.run_probe(&cancel).await;
            }
        });
    }

    async fn run_probe(&self, cancel: &CancellationToken) {
        let probe = self.probe.read().as_ref().and_then(Weak::upgrade);
        let Some(probe) = probe else {
            debug!("No probe available");
            return;
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => debug!("Recovery check cancelled"),
            result = probe.probe() => {
                if let Err(e) = result {
                    warn!(error = %e, "Broadcaster recovery check failed");
                }
            }
        }
    }

    /// Wait for in-flight recovery checks to finish or observe cancellation.
    pub async fn wait_idle(&self) {
        self.checks.close();
        self.checks.wait().await;
        self.checks.reopen();
    }

    fn arm_echo(&self, state: &mut State) {
        if let Some(timer) = state.echo_timer.take() {
            timer.cancel();
        }
        if state.echo == EchoState::Idle {
            state.echo = EchoState::Armed;
        }
        let id = state.next_id();
        let this = self.this.clone();
        let timeout = self.config.echo_timeout;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(monitor) = this.upgrade() {
                monitor.on_echo_timeout(id);
            }
        });
        state.echo_timer = Some(Timer { id, handle });
    }

    fn on_echo_timeout(&self, id: u64) {
        let mut state = self.state.lock();
        if state.echo_timer.as_ref().map(|t| t.id) != Some(id) {
            return;
        }
        state.echo_timer = None;
        warn!(timeout = ?self.config.echo_timeout, "No echo received; reconnecting");
        state.echo = EchoState::TimedOut;
        self.emit_status(ConnectionStatus::Reconnecting, Some(ConnectionCode::EchoTimeout), false);
        self.arm_echo(&mut state);
    }

    fn on_echo(&self, state: &mut State) {
        if !state.echo_enabled {
            return;
        }
        if let Some(timer) = state.echo_timer.take() {
            timer.cancel();
        }
        if state.echo == EchoState::TimedOut {
            info!("Echo received after timeout; reconnected");
            self.emit_status(ConnectionStatus::Reconnected, None, false);
        }
        state.echo = EchoState::Armed;
        self.arm_echo(state);
    }

    fn on_connection_message(&self, data: &Value) {
        let status = data
            .get("status")
            .cloned()
            .and_then(|s| serde_json::from_value::<ConnectionStatus>(s).ok());
        let Some(status) = status else {
            debug!(data = %data, "Ignoring connection message without a status");
            return;
        };
        let reset = data.get("reset").and_then(Value::as_bool).unwrap_or(false);
        let code = (status == ConnectionStatus::Reconnecting)
            .then_some(ConnectionCode::BroadcasterConnectionLost);
        self.emit_status(status, code, reset);
    }

    fn on_users_message(&self, state: &mut State, message: &RealtimeMessage) {
        let Some(user_id) = state.session.user_id.clone() else {
            return;
        };
        let in_maintenance = message.records().into_iter().any(|user| {
            user.get("id")
                .or_else(|| user.get("_id"))
                .and_then(Value::as_str)
                == Some(user_id.as_str())
                && user.get("inMaintenanceMode").and_then(Value::as_bool) == Some(true)
        });
        if in_maintenance {
            self.notify_entered(state);
        }
    }

    fn emit_status(&self, status: ConnectionStatus, code: Option<ConnectionCode>, reset: bool) {
        metrics::counter!(names::CONNECTION_STATUS_CHANGES, "status" => status.to_string()).increment(1);
        self.bus
            .publish(SyncEvent::ConnectionStatusChanged { status, code, reset });
    }
}

impl RealtimeObserver for ConnectionHealthMonitor {
    fn on_realtime(&self, message: &RealtimeMessage) {
        if message.message_type == MessageType::Connection {
            self.on_connection_message(&message.data);
        }

        let mut state = self.state.lock();
        match message.message_type {
            MessageType::Echo => self.on_echo(&mut state),
            MessageType::Users => self.on_users_message(&mut state, message),
            _ => {}
        }
        if state.broadcaster.is_some() && !message.message_type.is_control() {
            self.probe_now(&mut state);
        }
    }
}

#[async_trait]
impl Middleware for ConnectionHealthMonitor {
    fn name(&self) -> &str {
        "ConnectionHealth"
    }

    async fn on_response(
        &self,
        context: &MiddlewareContext,
        _result: Option<&Value>,
    ) -> Result<(), MiddlewareError> {
        if let Some(response) = &context.response {
            self.observe_response(response);
        }
        Ok(())
    }
}

impl Drop for ConnectionHealthMonitor {
    fn drop(&mut self) {
        self.state.get_mut().cancel_timers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::broadcast;

    #[derive(Default)]
    struct CountingProbe {
        latency: Duration,
        calls: Mutex<Vec<tokio::time::Instant>>,
    }

    #[async_trait]
    impl Probe for CountingProbe {
        async fn probe(&self) -> Result<(), ApiError> {
            tokio::time::sleep(self.latency).await;
            self.calls.lock().push(tokio::time::Instant::now());
            Ok(())
        }
    }

    fn on_prem() -> ServerCapabilities {
        ServerCapabilities {
            capabilities: serde_json::from_value(json!({"echoes": {}})).unwrap(),
            is_on_prem: true,
            ..Default::default()
        }
    }

    fn signed_in() -> SessionContext {
        SessionContext {
            server_url: "https://api.example.com".into(),
            has_credentials: true,
            user_id: Some("me".into()),
            email: Some("me@example.com".into()),
            team_id: Some("t1".into()),
        }
    }

    fn setup() -> (Arc<ConnectionHealthMonitor>, broadcast::Receiver<Arc<SyncEvent>>) {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        (ConnectionHealthMonitor::new(HealthConfig::default(), bus), rx)
    }

    fn drain(rx: &mut broadcast::Receiver<Arc<SyncEvent>>) -> Vec<SyncEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push((*event).clone());
        }
        out
    }

    fn status(status: ConnectionStatus, code: Option<ConnectionCode>) -> SyncEvent {
        SyncEvent::ConnectionStatusChanged { status, code, reset: false }
    }

    fn with_alerts(value: &str) -> HttpResponse {
        HttpResponse::new(200, "{}").with_header(headers::ALERTS, value)
    }

    fn with_maintenance(active: bool) -> HttpResponse {
        HttpResponse::new(200, "{}")
            .with_header(headers::MAINTENANCE_MODE, if active { "true" } else { "false" })
    }

    async fn sleep_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_echo_timeout_then_echo() {
        let (monitor, mut rx) = setup();
        monitor.login(signed_in(), &on_prem());

        sleep_ms(10_001).await;
        assert_eq!(
            drain(&mut rx),
            vec![status(ConnectionStatus::Reconnecting, Some(ConnectionCode::EchoTimeout))]
        );
        assert_eq!(monitor.snapshot().echo, EchoState::TimedOut);

        monitor.on_realtime(&RealtimeMessage::echo());
        assert_eq!(drain(&mut rx), vec![status(ConnectionStatus::Reconnected, None)]);
        assert_eq!(monitor.snapshot().echo, EchoState::Armed);

        // Re-armed: silence until the next full window.
        sleep_ms(9_000).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_echo_before_timeout_is_silent() {
        let (monitor, mut rx) = setup();
        monitor.login(signed_in(), &on_prem());

        for _ in 0..3 {
            sleep_ms(9_000).await;
            monitor.on_realtime(&RealtimeMessage::echo());
        }
        assert!(drain(&mut rx).is_empty());
        assert_eq!(monitor.snapshot().echo, EchoState::Armed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_echo_disabled_for_cloud() {
        let (monitor, mut rx) = setup();
        let cloud = ServerCapabilities {
            is_on_prem: false,
            ..on_prem()
        };
        monitor.login(signed_in(), &cloud);
        monitor.start_heartbeat();

        sleep_ms(30_000).await;
        monitor.on_realtime(&RealtimeMessage::echo());
        assert!(drain(&mut rx).is_empty());
        assert_eq!(monitor.snapshot().echo, EchoState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_toggles_coalesce() {
        let (monitor, mut rx) = setup();
        monitor.login(signed_in(), &ServerCapabilities::default());

        monitor.observe_response(&with_maintenance(true));
        sleep_ms(500).await;
        monitor.observe_response(&with_maintenance(false));
        sleep_ms(500).await;
        monitor.observe_response(&with_maintenance(true));
        sleep_ms(3_000).await;

        let changes: Vec<SyncEvent> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, SyncEvent::MaintenanceModeChanged { .. }))
            .collect();
        assert_eq!(changes, vec![SyncEvent::MaintenanceModeChanged { active: true }]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_trailing_value_is_notified() {
        let (monitor, mut rx) = setup();
        monitor.login(SessionContext::default(), &ServerCapabilities::default());

        monitor.observe_response(&with_maintenance(true));
        sleep_ms(100).await;
        monitor.observe_response(&with_maintenance(false));
        sleep_ms(2_500).await;

        assert_eq!(
            drain(&mut rx),
            vec![
                SyncEvent::MaintenanceModeChanged { active: true },
                SyncEvent::MaintenanceModeChanged { active: false },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_entered_maintenance_requires_credentials() {
        let (monitor, mut rx) = setup();
        monitor.login(signed_in(), &ServerCapabilities::default());

        monitor.observe_response(&with_maintenance(true));
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        match &events[1] {
            SyncEvent::EnteredMaintenanceMode(ctx) => {
                assert_eq!(ctx.email.as_deref(), Some("me@example.com"));
                assert_eq!(ctx.team_id.as_deref(), Some("t1"));
            }
            other => panic!("Unexpected event {:?}", other),
        }

        monitor.logout();
        monitor.observe_response(&with_maintenance(true));
        assert_eq!(
            drain(&mut rx),
            vec![SyncEvent::MaintenanceModeChanged { active: true }]
        );
    }

    #[tokio::test]
    async fn test_users_message_with_self_in_maintenance() {
        let (monitor, mut rx) = setup();
        monitor.login(signed_in(), &ServerCapabilities::default());

        let users = RealtimeMessage::new(
            MessageType::Users,
            json!([{"id": "u2", "inMaintenanceMode": true}]),
        );
        monitor.on_realtime(&users);
        assert!(drain(&mut rx).is_empty());

        let users = RealtimeMessage::new(
            MessageType::Users,
            json!([{"id": "me", "inMaintenanceMode": true}]),
        );
        monitor.on_realtime(&users);
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [SyncEvent::EnteredMaintenanceMode(_)]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcaster_recovery_probe_on_realtime_message() {
        let (monitor, mut rx) = setup();
        let probe = Arc::new(CountingProbe::default());
        let weak: Weak<dyn Probe> = Arc::downgrade(&probe) as Weak<dyn Probe>;
        monitor.set_probe(weak);
        monitor.login(signed_in(), &ServerCapabilities::default());
        let started = tokio::time::Instant::now();

        monitor.observe_response(&with_alerts("broadcasterConnectionFailure"));
        assert_eq!(
            drain(&mut rx),
            vec![status(
                ConnectionStatus::Reconnecting,
                Some(ConnectionCode::ApiBroadcasterConnectionFailure)
            )]
        );

        sleep_ms(5_000).await;
        monitor.on_realtime(&RealtimeMessage::new(MessageType::Posts, json!([])));
        sleep_ms(1).await;
        {
            let calls = probe.calls.lock();
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0] - started, Duration::from_millis(5_000));
        }

        // The 30 s timer was cancelled.
        sleep_ms(60_000).await;
        assert_eq!(probe.calls.lock().len(), 1);

        monitor.observe_response(&HttpResponse::new(200, "{}"));
        assert_eq!(drain(&mut rx), vec![status(ConnectionStatus::Reconnected, None)]);
        assert!(monitor.snapshot().broadcaster.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcaster_recovery_timer_fires_once() {
        let (monitor, mut rx) = setup();
        let probe = Arc::new(CountingProbe::default());
        monitor.set_probe(Arc::downgrade(&probe) as Weak<dyn Probe>);
        monitor.login(signed_in(), &ServerCapabilities::default());
        let started = tokio::time::Instant::now();

        monitor.observe_response(&with_alerts("broadcasterAcknowledgementFailure"));
        monitor.observe_response(&with_alerts("broadcasterAcknowledgementFailure"));
        assert_eq!(drain(&mut rx).len(), 1, "repeated alerts do not re-notify");

        sleep_ms(30_001).await;
        let calls = probe.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0] - started, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_cancels_timers() {
        let (monitor, mut rx) = setup();
        let probe = Arc::new(CountingProbe::default());
        monitor.set_probe(Arc::downgrade(&probe) as Weak<dyn Probe>);
        monitor.login(signed_in(), &on_prem());
        monitor.observe_response(&with_alerts("broadcasterConnectionFailure"));
        monitor.observe_response(&with_maintenance(true));
        drain(&mut rx);

        monitor.logout();
        sleep_ms(60_000).await;
        assert!(drain(&mut rx).is_empty());
        assert!(probe.calls.lock().is_empty());
        assert_eq!(monitor.snapshot().echo, EchoState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_alert_clear_stays_degraded() {
        let (monitor, mut rx) = setup();
        let checker = Arc::new(CountingProbe::default());
        monitor.set_probe(Arc::downgrade(&checker) as Weak<dyn Probe>);
        monitor.login(signed_in(), &ServerCapabilities::default());

        monitor.observe_response(&with_alerts(
            "broadcasterConnectionFailure,announceHistoryFetches",
        ));
        assert_eq!(drain(&mut rx).len(), 1);

        monitor.observe_response(&with_alerts("announceHistoryFetches"));
        assert!(drain(&mut rx).is_empty(), "no Reconnected while alerts remain");
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.alerts, vec!["announceHistoryFetches"]);
        assert!(snapshot.broadcaster.is_none());

        // The pending recovery check still runs.
        sleep_ms(30_001).await;
        assert_eq!(checker.calls.lock().len(), 1);

        monitor.observe_response(&HttpResponse::new(200, "{}"));
        assert_eq!(drain(&mut rx), vec![status(ConnectionStatus::Reconnected, None)]);
        assert!(monitor.snapshot().alerts.is_empty());
    }

    #[tokio::test]
    async fn test_clearing_other_alerts_reports_reconnected() {
        let (monitor, mut rx) = setup();
        monitor.login(signed_in(), &ServerCapabilities::default());

        monitor.observe_response(&with_alerts("announceHistoryFetches"));
        assert!(drain(&mut rx).is_empty());

        monitor.observe_response(&HttpResponse::new(200, "{}"));
        assert_eq!(drain(&mut rx), vec![status(ConnectionStatus::Reconnected, None)]);

        monitor.observe_response(&HttpResponse::new(200, "{}"));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_control_messages_do_not_trigger_recovery_check() {
        let (monitor, _rx) = setup();
        let checker = Arc::new(CountingProbe::default());
        monitor.set_probe(Arc::downgrade(&checker) as Weak<dyn Probe>);
        monitor.login(signed_in(), &ServerCapabilities::default());
        monitor.observe_response(&with_alerts("broadcasterConnectionFailure"));

        monitor.on_realtime(&RealtimeMessage::new(
            MessageType::Connection,
            json!({"status": "reconnecting"}),
        ));
        monitor.on_realtime(&RealtimeMessage::echo());
        sleep_ms(1_000).await;
        assert!(checker.calls.lock().is_empty());

        // The 30 s timer was left armed.
        sleep_ms(29_001).await;
        assert_eq!(checker.calls.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_cancels_in_flight_check() {
        let (monitor, _rx) = setup();
        let checker = Arc::new(CountingProbe {
            latency: Duration::from_secs(5),
            ..Default::default()
        });
        monitor.set_probe(Arc::downgrade(&checker) as Weak<dyn Probe>);
        monitor.login(signed_in(), &ServerCapabilities::default());
        monitor.observe_response(&with_alerts("broadcasterConnectionFailure"));

        monitor.on_realtime(&RealtimeMessage::new(MessageType::Posts, json!([])));
        sleep_ms(1_000).await;
        monitor.logout();
        monitor.wait_idle().await;

        sleep_ms(60_000).await;
        assert!(checker.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_users_message_matches_underscore_id() {
        let (monitor, mut rx) = setup();
        monitor.login(signed_in(), &ServerCapabilities::default());

        let users = RealtimeMessage::new(
            MessageType::Users,
            json!([{"_id": "me", "inMaintenanceMode": true}]),
        );
        monitor.on_realtime(&users);
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [SyncEvent::EnteredMaintenanceMode(_)]
        ));
    }

    #[tokio::test]
    async fn test_connection_message_forwarded() {
        let (monitor, mut rx) = setup();
        monitor.on_realtime(&RealtimeMessage::new(
            MessageType::Connection,
            json!({"status": "reconnecting"}),
        ));
        monitor.on_realtime(&RealtimeMessage::new(
            MessageType::Connection,
            json!({"status": "reconnected", "reset": true}),
        ));
        assert_eq!(
            drain(&mut rx),
            vec![
                status(
                    ConnectionStatus::Reconnecting,
                    Some(ConnectionCode::BroadcasterConnectionLost)
                ),
                SyncEvent::ConnectionStatusChanged {
                    status: ConnectionStatus::Reconnected,
                    code: None,
                    reset: true
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_monitor_as_pipeline_middleware() {
        use syncline_transport::{HttpClient, HttpRequest, PipelineConfig, TransportError};

        struct Alerting(AtomicUsize);

        #[async_trait]
        impl HttpClient for Alerting {
            async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
                let n = self.0.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Ok(with_alerts("broadcasterConnectionFailure"))
                } else {
                    Ok(HttpResponse::new(200, "{}"))
                }
            }

            fn name(&self) -> &'static str {
                "alerting"
            }
        }

        let (monitor, mut rx) = setup();
        let pipeline = Arc::new(
            RequestPipeline::new(PipelineConfig::default(), Arc::new(Alerting(AtomicUsize::new(0))))
                .unwrap(),
        );
        let _handle = pipeline.use_middleware(monitor.clone());
        monitor.set_probe(Arc::downgrade(&pipeline) as Weak<dyn Probe>);

        pipeline.get("/teams").await.unwrap();
        assert_eq!(monitor.snapshot().alerts, vec!["broadcasterConnectionFailure"]);

        // A realtime message while degraded probes through the pipeline.
        monitor.on_realtime(&RealtimeMessage::new(MessageType::Posts, json!([])));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(monitor.snapshot().broadcaster.is_none());
        assert_eq!(
            drain(&mut rx),
            vec![
                status(
                    ConnectionStatus::Reconnecting,
                    Some(ConnectionCode::ApiBroadcasterConnectionFailure)
                ),
                status(ConnectionStatus::Reconnected, None),
            ]
        );
    }
}
