//! Session lifecycle.
//!
//! A [`Session`] owns one signed-in wiring of the three components: the
//! request pipeline with the health monitor registered as middleware, the
//! dispatcher with the monitor as observer, and the realtime read loop.
//! [`Session::logout`] tears all of it down.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};
use syncline_core::{
    ConnectionHealthMonitor, Dispatcher, DispatcherConfig, EventBus, Probe, ResolverRegistry,
};
use syncline_transport::{
    EventSource, HttpClient, MiddlewareHandle, RequestPipeline, ServerCapabilities,
};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::realtime::{RealtimeLoop, ReconnectPolicy};

/// A signed-in session.
pub struct Session {
    pipeline: Arc<RequestPipeline>,
    monitor: Arc<ConnectionHealthMonitor>,
    dispatcher: Arc<Dispatcher>,
    capabilities: ServerCapabilities,
    middleware: Mutex<Option<MiddlewareHandle>>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl Session {
    /// Verify the server, authenticate the pipeline and start monitoring.
    ///
    /// # Errors
    ///
    /// Returns an error if no token is configured or the server is
    /// unreachable.
    pub async fn login(
        config: &Config,
        client: Arc<dyn HttpClient>,
        registry: Arc<ResolverRegistry>,
        bus: EventBus,
    ) -> Result<Self> {
        let token = config
            .session
            .token
            .clone()
            .context("No access token configured; set SYNCLINE_TOKEN or [session].token")?;

        let pipeline = Arc::new(RequestPipeline::new(config.pipeline(), client)?);
        let capabilities = pipeline
            .verify_connectivity()
            .await
            .with_context(|| format!("Cannot reach API server at {}", pipeline.base_url()))?;
        info!(
            url = %pipeline.base_url(),
            on_prem = capabilities.is_on_prem,
            environment = ?capabilities.environment,
            "API server verified"
        );

        pipeline.set_token(token);

        let monitor = ConnectionHealthMonitor::new(config.health(), bus.clone());
        let middleware = pipeline.use_middleware(monitor.clone());
        let probe: Weak<dyn Probe> = Arc::downgrade(&pipeline) as Weak<dyn Probe>;
        monitor.set_probe(probe);

        let dispatcher = Arc::new(Dispatcher::new(
            DispatcherConfig {
                self_id: config.session.user_id.clone(),
                subscribe: config.subscription(),
            },
            registry,
            bus,
        ));
        dispatcher.add_observer(monitor.clone());

        let mut context = config.session_context();
        match pipeline.get("/users/me").await {
            Ok(me) => {
                let me = me.get("user").cloned().unwrap_or(me);
                let id = me
                    .get("id")
                    .or_else(|| me.get("_id"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                if id.is_some() && id != context.user_id {
                    debug!(configured = ?context.user_id, server = ?id, "Using user id reported by server");
                    dispatcher.set_self_id(id.clone());
                    context.user_id = id;
                }
                dispatcher.seed_self(&me);
            }
            Err(e) => warn!(error = %e, "Could not load own user record"),
        }
        let user_id = context.user_id.clone();
        monitor.login(context, &capabilities);

        info!(user = ?user_id, "Signed in");
        Ok(Self {
            pipeline,
            monitor,
            dispatcher,
            capabilities,
            middleware: Mutex::new(Some(middleware)),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        })
    }

    /// Start reading realtime messages from `source`.
    pub fn spawn_realtime<S>(&self, source: S, policy: ReconnectPolicy)
    where
        S: EventSource + 'static,
    {
        let realtime = RealtimeLoop {
            dispatcher: self.dispatcher.clone(),
            monitor: self.monitor.clone(),
            policy,
        };
        self.tasks.spawn(realtime.run(source, self.cancel.child_token()));
    }

    #[must_use]
    pub fn pipeline(&self) -> &Arc<RequestPipeline> {
        &self.pipeline
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    #[must_use]
    pub fn monitor(&self) -> &Arc<ConnectionHealthMonitor> {
        &self.monitor
    }

    /// Deployment facts reported at login.
    #[must_use]
    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    /// Stop the realtime loop and the dispatcher, cancel health timers and
    /// drop the credentials.
    pub async fn logout(&self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;

        self.dispatcher.shutdown().await;
        self.monitor.logout();
        self.monitor.wait_idle().await;
        self.pipeline.clear_token();
        if let Some(handle) = self.middleware.lock().take() {
            handle.dispose();
        }
        info!("Signed out");
    }
}

/// Log every bus event until the bus closes.
pub async fn log_events(bus: EventBus, cancel: CancellationToken) {
    use syncline_core::SyncEvent;
    use tokio::sync::broadcast::error::RecvError;

    let mut rx = bus.subscribe();
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => event,
        };
        match event {
            Ok(event) => match &*event {
                SyncEvent::Realtime(message) => {
                    let count = message.records().len();
                    info!(message_type = %message.message_type, count, "Realtime event");
                }
                SyncEvent::ConnectionStatusChanged { status, code, reset } => {
                    info!(status = %status, code = ?code.map(|c| c.as_str()), reset, "Connection status");
                }
                SyncEvent::MaintenanceModeChanged { active } => {
                    info!(active, "Maintenance mode");
                }
                SyncEvent::EnteredMaintenanceMode(context) => {
                    let context = serde_json::to_value(context).unwrap_or(Value::Null);
                    warn!(context = %context, "Server entered maintenance mode");
                }
            },
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event logger lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
