use crate::channel::{ChannelError, ChannelFactory, PushChannel, TopicStream};
use crate::config::SubscriptionConfig;
use crate::metrics::RelayMetrics;
use crate::position::{canonical_entity_id, PositionUpdate};
use crate::store::PositionStore;
use crate::subscription::dedup::DedupWindow;
use crate::subscription::ChannelState;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Observer callback. Invoked once per delivered update, in per-entity
/// order. Never invoked after the owning handle was unsubscribed.
pub type OnUpdate = Arc<dyn Fn(&str, PositionUpdate) + Send + Sync>;

/// Caller-misuse errors, reported synchronously from `subscribe`.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscribeError {
    EmptyEntitySet,
    InvalidEntityId(String),
}

impl fmt::Display for SubscribeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscribeError::EmptyEntitySet => write!(f, "entity id set must be non-empty"),
            SubscribeError::InvalidEntityId(id) => write!(f, "invalid entity id '{}'", id),
        }
    }
}

impl std::error::Error for SubscribeError {}

/// Time window for seeding the initial path from the historical track
/// endpoint before live delivery starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeedWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SubscribeOptions {
    pub seed_window: Option<SeedWindow>,
}

/// One observer's interest in one entity topic.
struct Subscription {
    entity_id: String,
    observer_id: String,
    state: RwLock<ChannelState>,
    closed: AtomicBool,
    on_update: OnUpdate,
}

impl Subscription {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close wins over any concurrent transition: once set, set_state is a
    /// no-op and deliver drops everything.
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        *self.state.write().unwrap() = ChannelState::Closed;
    }

    fn set_state(&self, next: ChannelState) {
        let mut state = self.state.write().unwrap();
        if *state != ChannelState::Closed {
            *state = next;
        }
    }

    fn state(&self) -> ChannelState {
        *self.state.read().unwrap()
    }
}

/// One push connection per observer, established lazily by the first
/// worker that needs it. An empty cell after a failed connect lets the
/// next attempt retry.
type SharedConnection = Arc<OnceCell<Arc<dyn PushChannel>>>;

struct SubscriptionSlot {
    subscription: Arc<Subscription>,
    worker: JoinHandle<()>,
}

/// Per-observer bookkeeping. The connection is reference-counted by the
/// subscriptions map: dropping the last slot drops the entry and with it
/// the physical connection.
struct ObserverEntry {
    connection: SharedConnection,
    subscriptions: HashMap<String, SubscriptionSlot>,
}

/// Subscription Manager: lets observers declare interest in entity topics
/// and receive a continuous, deduplicated stream of position updates per
/// entity, degrading gracefully to polling.
///
/// `subscribe` and `unsubscribe` return immediately; handshakes and poll
/// queries run on worker tasks. Must be used within a Tokio runtime.
pub struct SubscriptionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    factory: Arc<dyn ChannelFactory>,
    store: Arc<dyn PositionStore>,
    config: SubscriptionConfig,
    metrics: RelayMetrics,
    observers: Mutex<HashMap<String, ObserverEntry>>,
}

impl SubscriptionManager {
    pub fn new(
        factory: Arc<dyn ChannelFactory>,
        store: Arc<dyn PositionStore>,
        config: SubscriptionConfig,
        metrics: RelayMetrics,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                factory,
                store,
                config,
                metrics,
                observers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Declare interest in a set of entities for one observer.
    ///
    /// Creates one subscription per entity id not already held by this
    /// observer; ids the observer already holds are per-id no-ops. The
    /// entity set must be non-empty and ids must be non-blank; violations
    /// are rejected synchronously. Everything else happens asynchronously,
    /// visible through `on_update` and the handle's `state`.
    pub fn subscribe(
        &self,
        observer_id: &str,
        entity_ids: &[String],
        on_update: OnUpdate,
    ) -> Result<SubscriptionHandle, SubscribeError> {
        self.subscribe_with(observer_id, entity_ids, SubscribeOptions::default(), on_update)
    }

    /// `subscribe` with options (track seeding).
    pub fn subscribe_with(
        &self,
        observer_id: &str,
        entity_ids: &[String],
        options: SubscribeOptions,
        on_update: OnUpdate,
    ) -> Result<SubscriptionHandle, SubscribeError> {
        if entity_ids.is_empty() {
            return Err(SubscribeError::EmptyEntitySet);
        }

        let mut canonical_ids = Vec::with_capacity(entity_ids.len());
        for raw in entity_ids {
            let id = canonical_entity_id(raw);
            if id.is_empty() || id.chars().any(|c| c.is_whitespace()) {
                return Err(SubscribeError::InvalidEntityId(raw.clone()));
            }
            if !canonical_ids.contains(&id) {
                canonical_ids.push(id);
            }
        }

        let mut observers = self.inner.observers.lock().unwrap();
        let entry = observers
            .entry(observer_id.to_string())
            .or_insert_with(|| ObserverEntry {
                connection: Arc::new(OnceCell::new()),
                subscriptions: HashMap::new(),
            });

        let mut owned = Vec::new();
        for entity_id in canonical_ids {
            if entry.subscriptions.contains_key(&entity_id) {
                debug!(
                    observer_id = %observer_id,
                    entity_id = %entity_id,
                    "Observer already subscribed, ignoring duplicate"
                );
                continue;
            }

            let subscription = Arc::new(Subscription {
                entity_id: entity_id.clone(),
                observer_id: observer_id.to_string(),
                state: RwLock::new(ChannelState::Connecting),
                closed: AtomicBool::new(false),
                on_update: Arc::clone(&on_update),
            });

            info!(observer_id = %observer_id, entity_id = %entity_id, "Subscription created");

            let worker = tokio::spawn(run_subscription(
                Arc::clone(&subscription),
                Arc::clone(&entry.connection),
                Arc::clone(&self.inner.factory),
                Arc::clone(&self.inner.store),
                self.inner.config.clone(),
                self.inner.metrics.clone(),
                options.seed_window,
            ));

            entry.subscriptions.insert(
                entity_id,
                SubscriptionSlot {
                    subscription: Arc::clone(&subscription),
                    worker,
                },
            );
            owned.push(subscription);
        }

        Ok(SubscriptionHandle {
            id: Uuid::new_v4(),
            observer_id: observer_id.to_string(),
            manager: Arc::clone(&self.inner),
            subscriptions: owned,
            released: AtomicBool::new(false),
        })
    }

    /// State of one observer/entity subscription, None when not subscribed.
    pub fn state(&self, observer_id: &str, entity_id: &str) -> Option<ChannelState> {
        let observers = self.inner.observers.lock().unwrap();
        observers
            .get(observer_id)?
            .subscriptions
            .get(&canonical_entity_id(entity_id))
            .map(|slot| slot.subscription.state())
    }

    /// Number of active subscriptions held by an observer.
    pub fn active_subscriptions(&self, observer_id: &str) -> usize {
        let observers = self.inner.observers.lock().unwrap();
        observers
            .get(observer_id)
            .map(|entry| entry.subscriptions.len())
            .unwrap_or(0)
    }

    /// Number of observers with at least one active subscription.
    pub fn observer_count(&self) -> usize {
        self.inner.observers.lock().unwrap().len()
    }
}

/// Handle to the subscriptions created by one `subscribe` call.
pub struct SubscriptionHandle {
    id: Uuid,
    observer_id: String,
    manager: Arc<ManagerInner>,
    subscriptions: Vec<Arc<Subscription>>,
    released: AtomicBool,
}

impl SubscriptionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn observer_id(&self) -> &str {
        &self.observer_id
    }

    /// Entity ids this handle owns (canonical form). Ids that were already
    /// subscribed when the handle was created are not included.
    pub fn entity_ids(&self) -> Vec<String> {
        self.subscriptions
            .iter()
            .map(|s| s.entity_id.clone())
            .collect()
    }

    /// Channel state for one of this handle's entities.
    pub fn state(&self, entity_id: &str) -> Option<ChannelState> {
        let id = canonical_entity_id(entity_id);
        self.subscriptions
            .iter()
            .find(|s| s.entity_id == id)
            .map(|s| s.state())
    }

    /// Tear down every subscription this handle owns.
    ///
    /// Idempotent and safe to call while a delivery is in flight: the
    /// closed flag is set before workers are torn down, and every delivery
    /// checks it immediately before the callback, so `on_update` is never
    /// invoked after this returns. Releases the observer's push connection
    /// when its last subscription goes.
    pub fn unsubscribe(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.manager.release(&self.observer_id, &self.subscriptions);
    }
}

impl ManagerInner {
    fn release(&self, observer_id: &str, subscriptions: &[Arc<Subscription>]) {
        // Mark closed before touching workers so an in-flight delivery
        // observes the flag even if its task outlives the abort briefly.
        for subscription in subscriptions {
            subscription.close();
        }

        let mut observers = self.observers.lock().unwrap();
        let Some(entry) = observers.get_mut(observer_id) else {
            return;
        };

        for subscription in subscriptions {
            let owned = entry
                .subscriptions
                .get(&subscription.entity_id)
                .map(|slot| Arc::ptr_eq(&slot.subscription, subscription))
                .unwrap_or(false);
            if owned {
                let slot = entry.subscriptions.remove(&subscription.entity_id).unwrap();
                slot.worker.abort();
                info!(
                    observer_id = %observer_id,
                    entity_id = %subscription.entity_id,
                    "Subscription closed"
                );
            }
        }

        if entry.subscriptions.is_empty() {
            observers.remove(observer_id);
            info!(observer_id = %observer_id, "Last subscription gone, releasing push connection");
        }
    }
}

/// Worker loop for one subscription. Owns the state machine:
/// Connecting → Live | Polling, Live → Polling on drop, Polling → Live on
/// a successful backoff handshake, anything → Closed via the handle.
async fn run_subscription(
    subscription: Arc<Subscription>,
    connection: SharedConnection,
    factory: Arc<dyn ChannelFactory>,
    store: Arc<dyn PositionStore>,
    config: SubscriptionConfig,
    metrics: RelayMetrics,
    seed_window: Option<SeedWindow>,
) {
    let mut dedup = DedupWindow::new(config.dedup_window);

    if let Some(window) = seed_window {
        seed_track(&subscription, &*store, &mut dedup, &metrics, window).await;
    }

    let mut backoff = config.initial_backoff;

    let mut next_stream = match try_handshake(
        &subscription,
        &connection,
        &*factory,
        config.handshake_timeout,
    )
    .await
    {
        Ok(stream) => Some(stream),
        Err(e) => {
            metrics.record_handshake_failure();
            debug!(
                entity_id = %subscription.entity_id,
                error = %e,
                "Push handshake failed, falling back to polling"
            );
            None
        }
    };

    loop {
        if subscription.is_closed() {
            return;
        }

        if let Some(stream) = next_stream.take() {
            subscription.set_state(ChannelState::Live);
            let live_since = Instant::now();
            run_live(&subscription, stream, &mut dedup, &metrics).await;
            if subscription.is_closed() {
                return;
            }
            metrics.record_channel_drop();
            warn!(
                entity_id = %subscription.entity_id,
                "Push channel dropped, falling back to polling"
            );
            // Only a session that held long enough proves the broker is
            // healthy again; a quick drop keeps the grown backoff.
            if live_since.elapsed() >= config.stable_live {
                backoff = config.initial_backoff;
            }
        }

        subscription.set_state(ChannelState::Polling);
        match run_polling(
            &subscription,
            &connection,
            &*factory,
            &*store,
            &mut dedup,
            &metrics,
            &config,
            &mut backoff,
        )
        .await
        {
            Some(stream) => {
                metrics.record_promotion();
                info!(
                    entity_id = %subscription.entity_id,
                    "Push channel recovered, promoting from polling"
                );
                next_stream = Some(stream);
            }
            None => return,
        }
    }
}

/// One handshake attempt: connect (shared, lazy) + topic subscribe, both
/// bounded by the handshake window. No acknowledgment inside the window is
/// a failure.
async fn try_handshake(
    subscription: &Subscription,
    connection: &SharedConnection,
    factory: &dyn ChannelFactory,
    handshake_timeout: Duration,
) -> Result<TopicStream, ChannelError> {
    let attempt = async {
        let channel = connection
            .get_or_try_init(|| factory.connect(&subscription.observer_id))
            .await?;
        channel.subscribe_topic(&subscription.entity_id).await
    };

    match timeout(handshake_timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(ChannelError::HandshakeTimeout),
    }
}

/// Consume the push stream until it ends or the subscription closes.
async fn run_live(
    subscription: &Subscription,
    mut stream: TopicStream,
    dedup: &mut DedupWindow,
    metrics: &RelayMetrics,
) {
    while let Some(payload) = stream.next().await {
        if subscription.is_closed() {
            return;
        }
        match PositionUpdate::from_push_payload(&subscription.entity_id, &payload) {
            Some(update) => deliver(subscription, dedup, metrics, update),
            None => {
                metrics.record_malformed_drop();
                debug!(
                    entity_id = %subscription.entity_id,
                    "Dropping push payload without numeric coordinates"
                );
            }
        }
    }
}

/// Poll on the fixed interval until promoted or closed. Handshake retries
/// run on exponential backoff while the subscription stays in Polling;
/// only a successful subscribe returns the new stream.
#[allow(clippy::too_many_arguments)]
async fn run_polling(
    subscription: &Subscription,
    connection: &SharedConnection,
    factory: &dyn ChannelFactory,
    store: &dyn PositionStore,
    dedup: &mut DedupWindow,
    metrics: &RelayMetrics,
    config: &SubscriptionConfig,
    backoff: &mut Duration,
) -> Option<TopicStream> {
    let mut ticks = interval_at(Instant::now() + config.poll_interval, config.poll_interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut next_retry = Instant::now() + *backoff;

    loop {
        if subscription.is_closed() {
            return None;
        }

        tokio::select! {
            _ = ticks.tick() => {
                poll_once(subscription, store, dedup, metrics).await;
            }
            _ = sleep_until(next_retry) => {
                match try_handshake(subscription, connection, factory, config.handshake_timeout).await {
                    Ok(stream) => {
                        if subscription.is_closed() {
                            return None;
                        }
                        return Some(stream);
                    }
                    Err(e) => {
                        metrics.record_handshake_failure();
                        debug!(
                            entity_id = %subscription.entity_id,
                            error = %e,
                            backoff_seconds = backoff.as_secs(),
                            "Promotion attempt failed, staying on polling"
                        );
                        *backoff = (*backoff * 2).min(config.max_backoff);
                        next_retry = Instant::now() + *backoff;
                    }
                }
            }
        }
    }
}

/// One latest-position query. Failures are skippable: log, count, retry on
/// the next tick. Polling never stops itself, only `unsubscribe` does.
async fn poll_once(
    subscription: &Subscription,
    store: &dyn PositionStore,
    dedup: &mut DedupWindow,
    metrics: &RelayMetrics,
) {
    match store.latest_position(&subscription.entity_id).await {
        Ok(Some(update)) => deliver(subscription, dedup, metrics, update),
        Ok(None) => {}
        Err(e) => {
            metrics.record_poll_failure();
            debug!(
                entity_id = %subscription.entity_id,
                error = %e,
                "Poll tick failed, retrying next tick"
            );
        }
    }
}

/// Replay the historical track through the normal delivery path so live
/// duplicates of seeded fixes are suppressed. A failed fetch degrades to
/// an empty seed.
async fn seed_track(
    subscription: &Subscription,
    store: &dyn PositionStore,
    dedup: &mut DedupWindow,
    metrics: &RelayMetrics,
    window: SeedWindow,
) {
    match store
        .track(&subscription.entity_id, window.from, window.to)
        .await
    {
        Ok(fixes) => {
            debug!(
                entity_id = %subscription.entity_id,
                count = fixes.len(),
                "Seeded initial path from track history"
            );
            for update in fixes {
                if subscription.is_closed() {
                    return;
                }
                deliver(subscription, dedup, metrics, update);
            }
        }
        Err(e) => {
            warn!(
                entity_id = %subscription.entity_id,
                error = %e,
                "Track seed fetch failed, starting with empty path"
            );
        }
    }
}

/// Single delivery point: closed check, dedup, then the callback. The
/// callback is synchronous, so a delivery either completes or never
/// starts; there is no partial invocation to interrupt.
fn deliver(
    subscription: &Subscription,
    dedup: &mut DedupWindow,
    metrics: &RelayMetrics,
    update: PositionUpdate,
) {
    if subscription.is_closed() {
        return;
    }
    if !dedup.insert(update.observed_at) {
        metrics.record_duplicate_suppressed();
        return;
    }
    metrics.record_delivery();
    (subscription.on_update)(&subscription.entity_id, update);
}
