//! Realtime message dispatcher.
//!
//! The dispatcher turns raw realtime messages into resolved events on the
//! [`EventBus`]. Messages are admitted in arrival order by a single intake
//! task which takes a permit on the processing lock:
//!
//! - a non-blocking message takes a shared permit, so any number of them
//!   resolve concurrently and may finish in any order;
//! - a blocking message (`blockUntilProcessed`) takes the exclusive permit,
//!   so it starts only after every earlier message has finished, and nothing
//!   admitted after it starts until it has finished.
//!
//! Permits are released when resolution ends, whether it succeeded or failed.
//! [`Dispatcher::shutdown`] cancels in-flight resolutions so no permit
//! outlives the session.

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use syncline_protocol::{MessageType, RealtimeMessage};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, RwLock as ProcessingLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

use crate::bus::{EventBus, SyncEvent};
use crate::names;
use crate::resolver::{ResolveError, ResolveOptions, ResolverRegistry};
use crate::unreads::UnreadTracker;

/// Dispatcher errors.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// The dispatcher has been shut down.
    #[error("Dispatcher is shut down")]
    ShutDown,

    /// A resolver failed.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// Observes every message handed to the dispatcher, before filtering and
/// resolution.
pub trait RealtimeObserver: Send + Sync {
    /// Called once per inbound message.
    fn on_realtime(&self, message: &RealtimeMessage);
}

/// Dispatcher configuration.
#[derive(Debug, Clone, Default)]
pub struct DispatcherConfig {
    /// The caller's own user id, used to split `users` batches.
    pub self_id: Option<String>,
    /// Initial subscription filter; `None` admits every type.
    pub subscribe: Option<HashSet<MessageType>>,
}

type Reply = oneshot::Sender<Result<usize, DispatchError>>;

struct Job {
    message: RealtimeMessage,
    reply: Option<Reply>,
}

/// Ordered realtime dispatcher.
pub struct Dispatcher {
    inner: Arc<Inner>,
    queue: mpsc::UnboundedSender<Job>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    intake: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    registry: Arc<ResolverRegistry>,
    bus: EventBus,
    filter: RwLock<Option<HashSet<MessageType>>>,
    observers: RwLock<Vec<Arc<dyn RealtimeObserver>>>,
    self_id: RwLock<Option<String>>,
    unreads: Mutex<UnreadTracker>,
    preferences: Mutex<Option<Value>>,
}

impl Dispatcher {
    /// Create a dispatcher and start its intake task.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(config: DispatcherConfig, registry: Arc<ResolverRegistry>, bus: EventBus) -> Self {
        let inner = Arc::new(Inner {
            registry,
            bus,
            filter: RwLock::new(config.subscribe),
            observers: RwLock::new(Vec::new()),
            unreads: Mutex::new(UnreadTracker::new(config.self_id.clone())),
            self_id: RwLock::new(config.self_id),
            preferences: Mutex::new(None),
        });
        let (queue, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        let intake = tokio::spawn(intake_loop(inner.clone(), rx, cancel.clone(), tracker.clone()));

        Self {
            inner,
            queue,
            cancel,
            tracker,
            intake: Mutex::new(Some(intake)),
        }
    }

    /// Dispatch a message without waiting for it.
    ///
    /// Resolver failures are logged.
    pub fn dispatch(&self, message: RealtimeMessage) {
        self.submit(message, None);
    }

    /// Dispatch a message and wait until it has been processed.
    ///
    /// Returns the number of events emitted for it (zero if it was filtered
    /// out or resolved to nothing).
    ///
    /// # Errors
    ///
    /// Returns the resolver's error, or [`DispatchError::ShutDown`].
    pub async fn dispatch_and_wait(&self, message: RealtimeMessage) -> Result<usize, DispatchError> {
        let (tx, rx) = oneshot::channel();
        if !self.submit(message, Some(tx)) {
            return Ok(0);
        }
        rx.await.unwrap_or(Err(DispatchError::ShutDown))
    }

    /// Returns `false` if the message was filtered out.
    fn submit(&self, message: RealtimeMessage, reply: Option<Reply>) -> bool {
        for observer in self.inner.observers.read().iter() {
            observer.on_realtime(&message);
        }

        if !self.inner.admits(message.message_type) {
            trace!(message_type = %message.message_type, "Message filtered out");
            metrics::counter!(names::REALTIME_DROPPED, "reason" => "filtered").increment(1);
            return false;
        }

        if let Err(mpsc::error::SendError(job)) = self.queue.send(Job { message, reply }) {
            warn!(message_type = %job.message.message_type, "Dispatch after shutdown");
            if let Some(reply) = job.reply {
                let _ = reply.send(Err(DispatchError::ShutDown));
            }
        }
        true
    }

    /// Replace the subscription filter. `None` admits every type.
    pub fn subscribe(&self, types: Option<HashSet<MessageType>>) {
        info!(types = ?types, "Realtime subscription updated");
        *self.inner.filter.write() = types;
    }

    /// Current subscription filter.
    #[must_use]
    pub fn subscription(&self) -> Option<HashSet<MessageType>> {
        self.inner.filter.read().clone()
    }

    /// Add an observer of inbound messages.
    pub fn add_observer(&self, observer: Arc<dyn RealtimeObserver>) {
        self.inner.observers.write().push(observer);
    }

    /// Set the caller's own user id.
    pub fn set_self_id(&self, self_id: Option<String>) {
        self.inner.unreads.lock().set_self_id(self_id.clone());
        *self.inner.self_id.write() = self_id;
    }

    /// Seed derived state from the caller's user record without emitting.
    pub fn seed_self(&self, me: &Value) {
        self.inner.unreads.lock().observe_self(me);
        *self.inner.preferences.lock() = me.get("preferences").cloned();
    }

    /// Current unread aggregate.
    #[must_use]
    pub fn unreads(&self) -> Value {
        self.inner.unreads.lock().snapshot()
    }

    /// Stop the dispatcher.
    ///
    /// Queued messages are discarded and in-flight resolutions are cancelled.
    /// Returns once every processing permit has been released.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let intake = self.intake.lock().take();
        if let Some(intake) = intake {
            if let Err(e) = intake.await {
                error!(error = %e, "Dispatcher intake task failed");
            }
        }
        self.tracker.close();
        self.tracker.wait().await;
        debug!("Dispatcher shut down");
    }

    /// Check if the dispatcher has been shut down.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn intake_loop(
    inner: Arc<Inner>,
    mut rx: mpsc::UnboundedReceiver<Job>,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    let lock = Arc::new(ProcessingLock::new(()));
    loop {
        let job = tokio::select! {
            _ = cancel.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        if job.message.block_until_processed {
            trace!(message_type = %job.message.message_type, "Waiting for exclusive processing");
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = lock.clone().write_owned() => permit,
            };
            spawn_resolution(&inner, &tracker, &cancel, permit, job);
        } else {
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = lock.clone().read_owned() => permit,
            };
            spawn_resolution(&inner, &tracker, &cancel, permit, job);
        }
    }

    rx.close();
    while let Ok(job) = rx.try_recv() {
        if let Some(reply) = job.reply {
            let _ = reply.send(Err(DispatchError::ShutDown));
        }
    }
}

fn spawn_resolution<P: Send + 'static>(
    inner: &Arc<Inner>,
    tracker: &TaskTracker,
    cancel: &CancellationToken,
    permit: P,
    job: Job,
) {
    let inner = inner.clone();
    let cancel = cancel.clone();
    tracker.spawn(async move {
        let _permit = permit;
        let Job { message, reply } = job;
        let message_type = message.message_type;

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(DispatchError::ShutDown),
            result = inner.process(message) => result,
        };

        if let Err(e) = &result {
            metrics::counter!(names::REALTIME_FAILED, "type" => message_type.as_str()).increment(1);
            if reply.is_none() {
                error!(message_type = %message_type, error = %e, "Realtime message processing failed");
            }
        }
        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    });
}

impl Inner {
    fn admits(&self, message_type: MessageType) -> bool {
        self.filter
            .read()
            .as_ref()
            .map_or(true, |types| types.contains(&message_type))
    }

    async fn process(&self, message: RealtimeMessage) -> Result<usize, DispatchError> {
        trace!(
            message_type = %message.message_type,
            blocking = message.block_until_processed,
            "Processing realtime message"
        );
        match message.message_type {
            MessageType::Unknown => {
                debug!("Dropping realtime message of unknown type");
                metrics::counter!(names::REALTIME_DROPPED, "reason" => "unknown").increment(1);
                Ok(0)
            }
            MessageType::Users => self.process_users(message).await,
            _ => self.process_default(message).await,
        }
    }

    async fn process_default(&self, message: RealtimeMessage) -> Result<usize, DispatchError> {
        let message_type = message.message_type;
        let Some(resolved) = self.resolve(message, ResolveOptions::full()).await? else {
            return Ok(0);
        };

        let mut emitted = 0;
        if let Some(resolver) = self.registry.get(message_type) {
            for dependent in resolver.dependents(&resolved) {
                if let Some(dependent) = self.resolve(dependent, ResolveOptions::if_needed()).await? {
                    self.emit(dependent);
                    emitted += 1;
                }
            }
        }

        let unreads = if message_type == MessageType::Posts {
            let mut tracker = self.unreads.lock();
            tracker
                .observe_posts(&resolved.records())
                .then(|| tracker.snapshot())
        } else {
            None
        };

        self.emit(resolved);
        emitted += 1;

        if let Some(unreads) = unreads {
            self.emit(RealtimeMessage::new(MessageType::Unreads, unreads));
            emitted += 1;
        }
        Ok(emitted)
    }

    /// The caller's own record is resolved apart from the rest of the batch
    /// and drives the unreads and preferences aggregates.
    async fn process_users(&self, message: RealtimeMessage) -> Result<usize, DispatchError> {
        let self_id = self.self_id.read().clone();
        let Some(self_id) = self_id else {
            return self.process_default(message).await;
        };

        let blocking = message.block_until_processed;
        let (mine, others): (Vec<Value>, Vec<Value>) = message
            .records()
            .into_iter()
            .cloned()
            .partition(|record| record_id(record) == Some(self_id.as_str()));

        let mut emitted = 0;
        if !others.is_empty() {
            let batch = batch_of(MessageType::Users, others, blocking);
            if let Some(resolved) = self.resolve(batch, ResolveOptions::full()).await? {
                self.emit(resolved);
                emitted += 1;
            }
        }

        if let Some(me) = mine.into_iter().last() {
            let batch = batch_of(MessageType::Users, vec![me], blocking);
            if let Some(resolved) = self.resolve(batch, ResolveOptions::if_needed()).await? {
                let merged = resolved.records().first().map(|r| (*r).clone());
                self.emit(resolved);
                emitted += 1;
                if let Some(merged) = merged {
                    emitted += self.refresh_self_aggregates(&merged);
                }
            }
        }
        Ok(emitted)
    }

    fn refresh_self_aggregates(&self, me: &Value) -> usize {
        let mut emitted = 0;

        let unreads = {
            let mut tracker = self.unreads.lock();
            tracker.observe_self(me).then(|| tracker.snapshot())
        };
        if let Some(unreads) = unreads {
            self.emit(RealtimeMessage::new(MessageType::Unreads, unreads));
            emitted += 1;
        }

        if let Some(preferences) = me.get("preferences") {
            let changed = {
                let mut current = self.preferences.lock();
                if current.as_ref() == Some(preferences) {
                    false
                } else {
                    *current = Some(preferences.clone());
                    true
                }
            };
            if changed {
                self.emit(RealtimeMessage::new(MessageType::Preferences, preferences.clone()));
                emitted += 1;
            }
        }
        emitted
    }

    /// Returns `None` when the resolver reports nothing to deliver.
    ///
    /// Types without a resolver pass through unchanged.
    async fn resolve(
        &self,
        message: RealtimeMessage,
        options: ResolveOptions,
    ) -> Result<Option<RealtimeMessage>, ResolveError> {
        let Some(resolver) = self.registry.get(message.message_type) else {
            return Ok(Some(message));
        };

        match resolver.resolve(&message, options).await? {
            Some(data) if !syncline_protocol::is_empty_payload(&data) => Ok(Some(message.with_data(data))),
            _ => {
                trace!(message_type = %message.message_type, "Resolved to nothing; dropping");
                metrics::counter!(names::REALTIME_DROPPED, "reason" => "empty").increment(1);
                Ok(None)
            }
        }
    }

    fn emit(&self, message: RealtimeMessage) {
        metrics::counter!(names::REALTIME_DISPATCHED, "type" => message.message_type.as_str()).increment(1);
        self.bus.publish(SyncEvent::Realtime(message));
    }
}

fn record_id(record: &Value) -> Option<&str> {
    record
        .get("id")
        .or_else(|| record.get("_id"))
        .and_then(Value::as_str)
}

fn batch_of(message_type: MessageType, records: Vec<Value>, blocking: bool) -> RealtimeMessage {
    RealtimeMessage {
        message_type,
        data: Value::Array(records),
        block_until_processed: blocking,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::Resolver;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::broadcast;

    /// Records start/finish order and sleeps for a per-message delay taken
    /// from `data.delayMs`.
    #[derive(Default)]
    struct Recording {
        log: Mutex<Vec<String>>,
        options: Mutex<Vec<(Value, bool)>>,
    }

    #[async_trait]
    impl Resolver for Recording {
        async fn resolve(
            &self,
            message: &RealtimeMessage,
            options: ResolveOptions,
        ) -> Result<Option<Value>, ResolveError> {
            let name = message.data["name"].as_str().unwrap_or("?").to_string();
            self.options.lock().push((message.data.clone(), options.only_if_needed));
            self.log.lock().push(format!("start:{}", name));
            if let Some(ms) = message.data["delayMs"].as_u64() {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            self.log.lock().push(format!("end:{}", name));
            if message.data["fail"].as_bool() == Some(true) {
                return Err(ResolveError::new(message.message_type, "boom"));
            }
            if message.data["empty"].as_bool() == Some(true) {
                return Ok(None);
            }
            Ok(Some(message.data.clone()))
        }
    }

    fn setup(resolver: Arc<Recording>, types: &[MessageType]) -> (Dispatcher, broadcast::Receiver<Arc<SyncEvent>>) {
        let registry = Arc::new(ResolverRegistry::new());
        registry.register_all(types, resolver);
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let dispatcher = Dispatcher::new(
            DispatcherConfig {
                self_id: Some("me".into()),
                subscribe: None,
            },
            registry,
            bus,
        );
        (dispatcher, rx)
    }

    fn message(ty: MessageType, data: Value) -> RealtimeMessage {
        RealtimeMessage::new(ty, data)
    }

    fn drain(rx: &mut broadcast::Receiver<Arc<SyncEvent>>) -> Vec<RealtimeMessage> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SyncEvent::Realtime(m) = &*event {
                out.push(m.clone());
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_message_runs_before_later_messages() {
        let resolver = Arc::new(Recording::default());
        let (dispatcher, _rx) = setup(resolver.clone(), &[MessageType::Posts]);

        let a = message(MessageType::Posts, json!({"name": "A", "delayMs": 100})).blocking();
        let b = message(MessageType::Posts, json!({"name": "B"}));
        let (ra, rb) = tokio::join!(dispatcher.dispatch_and_wait(a), dispatcher.dispatch_and_wait(b));
        ra.unwrap();
        rb.unwrap();

        assert_eq!(*resolver.log.lock(), vec!["start:A", "end:A", "start:B", "end:B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_message_waits_for_earlier_in_flight() {
        let resolver = Arc::new(Recording::default());
        let (dispatcher, _rx) = setup(resolver.clone(), &[MessageType::Posts]);

        let a = message(MessageType::Posts, json!({"name": "A", "delayMs": 100}));
        let b = message(MessageType::Posts, json!({"name": "B"})).blocking();
        let (ra, rb) = tokio::join!(dispatcher.dispatch_and_wait(a), dispatcher.dispatch_and_wait(b));
        ra.unwrap();
        rb.unwrap();

        assert_eq!(*resolver.log.lock(), vec!["start:A", "end:A", "start:B", "end:B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_blocking_messages_overlap() {
        let resolver = Arc::new(Recording::default());
        let (dispatcher, _rx) = setup(resolver.clone(), &[MessageType::Posts]);

        let slow = message(MessageType::Posts, json!({"name": "slow", "delayMs": 100}));
        let fast = message(MessageType::Posts, json!({"name": "fast", "delayMs": 10}));
        let (r1, r2) = tokio::join!(dispatcher.dispatch_and_wait(slow), dispatcher.dispatch_and_wait(fast));
        r1.unwrap();
        r2.unwrap();

        assert_eq!(
            *resolver.log.lock(),
            vec!["start:slow", "start:fast", "end:fast", "end:slow"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_blocking_resolution_releases_lock() {
        let resolver = Arc::new(Recording::default());
        let (dispatcher, mut rx) = setup(resolver.clone(), &[MessageType::Posts]);

        let bad = message(MessageType::Posts, json!({"name": "bad", "fail": true})).blocking();
        let next = message(MessageType::Posts, json!({"name": "next"}));

        let err = dispatcher.dispatch_and_wait(bad).await.unwrap_err();
        assert!(matches!(err, DispatchError::Resolve(_)));
        assert_eq!(dispatcher.dispatch_and_wait(next).await.unwrap(), 1);

        let emitted = drain(&mut rx);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].data["name"], "next");
    }

    #[tokio::test]
    async fn test_empty_resolution_drops_message() {
        let resolver = Arc::new(Recording::default());
        let (dispatcher, mut rx) = setup(resolver, &[MessageType::Streams]);

        let n = dispatcher
            .dispatch_and_wait(message(MessageType::Streams, json!({"name": "s", "empty": true})))
            .await
            .unwrap();
        assert_eq!(n, 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_unresolved_types_pass_through_and_unknown_is_dropped() {
        let resolver = Arc::new(Recording::default());
        let (dispatcher, mut rx) = setup(resolver, &[MessageType::Posts]);

        assert_eq!(dispatcher.dispatch_and_wait(RealtimeMessage::echo()).await.unwrap(), 1);
        assert_eq!(
            dispatcher
                .dispatch_and_wait(message(MessageType::Unknown, json!({})))
                .await
                .unwrap(),
            0
        );

        let emitted = drain(&mut rx);
        assert_eq!(emitted, vec![RealtimeMessage::echo()]);
    }

    #[tokio::test]
    async fn test_subscription_filter_is_replaced_wholesale() {
        let resolver = Arc::new(Recording::default());
        let (dispatcher, mut rx) = setup(resolver, &[MessageType::Posts, MessageType::Streams]);

        dispatcher.subscribe(Some([MessageType::Streams].into_iter().collect()));
        let posts = message(MessageType::Posts, json!({"name": "p"}));
        assert_eq!(dispatcher.dispatch_and_wait(posts.clone()).await.unwrap(), 0);

        dispatcher.subscribe(Some([MessageType::Posts].into_iter().collect()));
        assert_eq!(dispatcher.dispatch_and_wait(posts).await.unwrap(), 1);
        let streams = message(MessageType::Streams, json!({"name": "s"}));
        assert_eq!(dispatcher.dispatch_and_wait(streams).await.unwrap(), 0);

        assert_eq!(drain(&mut rx).len(), 1);
    }

    struct CodemarkResolver;

    #[async_trait]
    impl Resolver for CodemarkResolver {
        async fn resolve(
            &self,
            message: &RealtimeMessage,
            _options: ResolveOptions,
        ) -> Result<Option<Value>, ResolveError> {
            Ok(Some(message.data.clone()))
        }

        fn dependents(&self, resolved: &RealtimeMessage) -> Vec<RealtimeMessage> {
            resolved
                .records()
                .iter()
                .filter_map(|r| r.get("markers").cloned())
                .map(|markers| RealtimeMessage::new(MessageType::Markers, markers))
                .collect()
        }
    }

    #[tokio::test]
    async fn test_dependents_are_emitted_before_primary() {
        let registry = Arc::new(ResolverRegistry::new());
        registry.register(MessageType::Codemarks, Arc::new(CodemarkResolver));
        let markers = Arc::new(Recording::default());
        registry.register(MessageType::Markers, markers.clone());
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let dispatcher = Dispatcher::new(DispatcherConfig::default(), registry, bus);

        let codemark = message(
            MessageType::Codemarks,
            json!([{"id": "c1", "markers": [{"id": "m1", "name": "m1"}]}]),
        );
        assert_eq!(dispatcher.dispatch_and_wait(codemark).await.unwrap(), 2);

        let emitted = drain(&mut rx);
        assert_eq!(emitted[0].message_type, MessageType::Markers);
        assert_eq!(emitted[1].message_type, MessageType::Codemarks);
        assert!(markers.options.lock()[0].1, "dependents resolve with only_if_needed");
    }

    #[tokio::test]
    async fn test_users_batch_splits_self_record() {
        let resolver = Arc::new(Recording::default());
        let (dispatcher, mut rx) = setup(resolver.clone(), &[MessageType::Users]);

        let users = message(
            MessageType::Users,
            json!([
                {"id": "u2", "name": "other"},
                {"id": "me", "name": "me", "lastReads": {"s1": 1}, "preferences": {"theme": "dark"}}
            ]),
        );
        assert_eq!(dispatcher.dispatch_and_wait(users).await.unwrap(), 4);

        let emitted = drain(&mut rx);
        let types: Vec<MessageType> = emitted.iter().map(|m| m.message_type).collect();
        assert_eq!(
            types,
            vec![
                MessageType::Users,
                MessageType::Users,
                MessageType::Unreads,
                MessageType::Preferences
            ]
        );
        assert_eq!(emitted[0].data, json!([{"id": "u2", "name": "other"}]));
        assert_eq!(emitted[1].data[0]["id"], "me");
        assert_eq!(emitted[3].data, json!({"theme": "dark"}));

        let options = resolver.options.lock();
        assert!(!options[0].1, "other users resolve fully");
        assert!(options[1].1, "own record resolves only if needed");
    }

    #[tokio::test]
    async fn test_unchanged_self_record_skips_aggregates() {
        let resolver = Arc::new(Recording::default());
        let (dispatcher, mut rx) = setup(resolver, &[MessageType::Users]);
        let me = json!({"id": "me", "lastReads": {"s1": 1}, "preferences": {"theme": "dark"}});
        dispatcher.seed_self(&me);

        let n = dispatcher
            .dispatch_and_wait(message(MessageType::Users, json!([me])))
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(drain(&mut rx)[0].message_type, MessageType::Users);
    }

    #[tokio::test]
    async fn test_posts_update_unreads() {
        let resolver = Arc::new(Recording::default());
        let (dispatcher, mut rx) = setup(resolver, &[MessageType::Posts]);
        dispatcher.seed_self(&json!({"id": "me", "lastReads": {"s1": 2}}));

        let post = message(
            MessageType::Posts,
            json!([{"name": "p", "streamId": "s1", "seqNum": 5, "creatorId": "u2"}]),
        );
        assert_eq!(dispatcher.dispatch_and_wait(post).await.unwrap(), 2);

        let emitted = drain(&mut rx);
        assert_eq!(emitted[1].message_type, MessageType::Unreads);
        assert_eq!(emitted[1].data["unreads"]["s1"], 3);
        assert_eq!(dispatcher.unreads()["totalUnreads"], 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_in_flight_and_rejects_new_messages() {
        let resolver = Arc::new(Recording::default());
        let (dispatcher, _rx) = setup(resolver.clone(), &[MessageType::Posts]);
        let dispatcher = Arc::new(dispatcher);

        let slow = message(MessageType::Posts, json!({"name": "slow", "delayMs": 60_000})).blocking();
        let waiting = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.dispatch_and_wait(slow).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        dispatcher.shutdown().await;
        assert!(dispatcher.is_shut_down());
        assert!(matches!(waiting.await.unwrap(), Err(DispatchError::ShutDown)));

        let late = message(MessageType::Posts, json!({"name": "late"}));
        assert!(matches!(
            dispatcher.dispatch_and_wait(late).await,
            Err(DispatchError::ShutDown)
        ));
        assert_eq!(*resolver.log.lock(), vec!["start:slow"]);
    }

    struct Counter(Mutex<Vec<MessageType>>);

    impl RealtimeObserver for Counter {
        fn on_realtime(&self, message: &RealtimeMessage) {
            self.0.lock().push(message.message_type);
        }
    }

    #[tokio::test]
    async fn test_observers_see_filtered_messages() {
        let resolver = Arc::new(Recording::default());
        let (dispatcher, _rx) = setup(resolver, &[]);
        let observer = Arc::new(Counter(Mutex::new(Vec::new())));
        dispatcher.add_observer(observer.clone());
        dispatcher.subscribe(Some(HashSet::new()));

        dispatcher.dispatch(RealtimeMessage::echo());
        assert_eq!(*observer.0.lock(), vec![MessageType::Echo]);
    }
}
