//! # Channel Registry
//!
//! Owns every transport handle, keyed by `ChannelKey`. One entry per key,
//! one handle per entry: however `get_or_create`, `release`, ready acks and
//! `teardown_all` interleave, a key never has two handles open at once.
//!
//! ## Entry lifecycle
//!
//! ```text
//!  get_or_create ──► Opening ──open ok──► Pending ──ack ok──► Live ──lost──► removed
//!                       │                   │                  │
//!                   open err            ack err           last release
//!                       ▼                   ▼                  ▼
//!                    removed             removed        closed + removed
//! ```
//!
//! A live channel the transport drops (connection gone, server error) is
//! removed without a close, so the next subscribe opens a fresh one.
//!
//! An entry whose last subscriber leaves before the ack is kept with no
//! subscribers; the ack then closes it. A new subscriber arriving in the
//! meantime simply reuses it. Transport calls (`open`, `close`) always run
//! outside the registry lock, so transports may call back synchronously.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde_json::Value;

use super::dispatcher::{DispatchResult, EventDispatcher, Handler, Route};
use super::errors::{RealtimeError, RealtimeResult};
use super::factory::ChannelKey;
use super::filter::FilterPredicate;
use super::transport::{lock, ChannelHandle, PayloadCallback, StatusCallback};
use crate::observability::{log_event, Event, MetricsRegistry};

/// Identifies one `subscribe` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Transport-side state of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// `open` is running; no handle yet
    Opening,
    /// Handle started, ready ack outstanding
    Pending,
    /// Ready ack received
    Live,
}

struct ChannelEntry {
    generation: u64,
    state: ChannelState,
    handle: Option<Box<dyn ChannelHandle>>,
    /// Ack that arrived while the entry was still `Opening`
    early_ack: Option<RealtimeResult<()>>,
    predicate: FilterPredicate,
    subscribers: Vec<(SubscriptionId, Handler)>,
}

impl ChannelEntry {
    fn refcount(&self) -> usize {
        self.subscribers.len()
    }
}

#[derive(Default)]
struct RegistryInner {
    next_generation: u64,
    channels: HashMap<ChannelKey, ChannelEntry>,
}

/// Read-only view of one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub key: ChannelKey,
    pub generation: u64,
    pub state: ChannelState,
    pub refcount: usize,
}

/// Registry of open channels
pub struct ChannelRegistry {
    inner: Mutex<RegistryInner>,
    dispatcher: EventDispatcher,
    metrics: Arc<MetricsRegistry>,
    weak_self: Weak<ChannelRegistry>,
}

fn close_handle(key: &ChannelKey, mut handle: Box<dyn ChannelHandle>, metrics: &MetricsRegistry, reason: Event) {
    match handle.close() {
        Ok(()) => {
            metrics.increment_channels_closed();
            log_event(reason, &[("key", key.as_str())]);
        }
        Err(e) => log_event(
            Event::CloseFailed,
            &[("key", key.as_str()), ("category", e.category().as_str()), ("error", &e.to_string())],
        ),
    }
}

impl ChannelRegistry {
    pub fn new(metrics: Arc<MetricsRegistry>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            inner: Mutex::new(RegistryInner::default()),
            dispatcher: EventDispatcher::new(Arc::clone(&metrics)),
            metrics,
            weak_self: weak_self.clone(),
        })
    }

    fn inner(&self) -> MutexGuard<'_, RegistryInner> {
        lock(&self.inner)
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Register `subscriber` on `key`, opening the channel if this is the
    /// first subscriber. `open` receives the entry generation and must
    /// return a started handle; it is only called when no entry exists.
    ///
    /// If `open` fails the entry is removed again and the error is returned;
    /// subscribers that joined while it ran are dropped with it.
    pub fn get_or_create<F>(
        &self,
        key: &ChannelKey,
        predicate: FilterPredicate,
        subscriber: (SubscriptionId, Handler),
        open: F,
    ) -> RealtimeResult<u64>
    where
        F: FnOnce(u64) -> RealtimeResult<Box<dyn ChannelHandle>>,
    {
        let generation = {
            let mut inner = self.inner();

            if let Some(entry) = inner.channels.get_mut(key) {
                entry.subscribers.push(subscriber);
                return Ok(entry.generation);
            }

            inner.next_generation += 1;
            let generation = inner.next_generation;
            inner.channels.insert(
                key.clone(),
                ChannelEntry {
                    generation,
                    state: ChannelState::Opening,
                    handle: None,
                    early_ack: None,
                    predicate,
                    subscribers: vec![subscriber],
                },
            );
            generation
        };

        log_event(Event::ChannelOpen, &[("key", key.as_str()), ("generation", &generation.to_string())]);

        let handle = match open(generation) {
            Ok(handle) => handle,
            Err(e) => {
                let mut inner = self.inner();
                if inner.channels.get(key).map(|e| e.generation) == Some(generation) {
                    inner.channels.remove(key);
                }
                drop(inner);

                self.metrics.increment_open_failures();
                log_event(
                    Event::ChannelOpenFailed,
                    &[("key", key.as_str()), ("error", &e.to_string())],
                );
                return Err(e);
            }
        };
        self.metrics.increment_channels_opened();

        let mut inner = self.inner();
        let Some(entry) = inner
            .channels
            .get_mut(key)
            .filter(|entry| entry.generation == generation)
        else {
            // Torn down while the open ran
            drop(inner);
            close_handle(key, handle, &self.metrics, Event::ChannelClose);
            return Err(RealtimeError::ConnectionError(format!("{} torn down during open", key)));
        };

        match entry.early_ack.take() {
            None => {
                entry.state = ChannelState::Pending;
                entry.handle = Some(handle);
            }
            Some(Ok(())) if entry.refcount() == 0 => {
                inner.channels.remove(key);
                drop(inner);
                close_handle(key, handle, &self.metrics, Event::ChannelOrphanClosed);
            }
            Some(Ok(())) => {
                entry.state = ChannelState::Live;
                entry.handle = Some(handle);
                drop(inner);
                log_event(Event::ChannelReady, &[("key", key.as_str())]);
            }
            Some(Err(e)) => {
                inner.channels.remove(key);
                drop(inner);
                self.fail_async(key, &e);
            }
        }

        Ok(generation)
    }

    fn fail_async(&self, key: &ChannelKey, error: &RealtimeError) {
        self.metrics.increment_open_failures();
        self.metrics.increment_channels_lost();
        log_event(
            Event::ChannelOpenFailed,
            &[
                ("key", key.as_str()),
                ("category", error.category().as_str()),
                ("error", &error.to_string()),
                ("phase", "handshake"),
            ],
        );
    }

    fn lose(&self, key: &ChannelKey, error: &RealtimeError, subscribers: usize) {
        self.metrics.increment_channels_lost();
        log_event(
            Event::ChannelLost,
            &[
                ("key", key.as_str()),
                ("category", error.category().as_str()),
                ("error", &error.to_string()),
                ("subscribers", &subscribers.to_string()),
            ],
        );
    }

    /// Status report from the transport: the handshake outcome, or an `Err`
    /// once a live channel is lost
    pub fn on_ready(&self, key: &ChannelKey, generation: u64, result: RealtimeResult<()>) {
        let mut inner = self.inner();
        let Some(entry) = inner
            .channels
            .get_mut(key)
            .filter(|entry| entry.generation == generation)
        else {
            log_event(Event::EventUnrouted, &[("key", key.as_str()), ("phase", "ready")]);
            return;
        };

        if entry.state == ChannelState::Opening {
            // A failure overrides an earlier ack
            if result.is_err() || entry.early_ack.is_none() {
                entry.early_ack = Some(result);
            }
            return;
        }

        match result {
            Ok(()) if entry.state == ChannelState::Live => {}
            Ok(()) if entry.refcount() == 0 => {
                let handle = inner.channels.remove(key).and_then(|e| e.handle);
                drop(inner);
                if let Some(handle) = handle {
                    close_handle(key, handle, &self.metrics, Event::ChannelOrphanClosed);
                }
            }
            Ok(()) => {
                entry.state = ChannelState::Live;
                drop(inner);
                log_event(Event::ChannelReady, &[("key", key.as_str())]);
            }
            Err(e) => {
                // The transport gave up on this handle; nothing left to close
                let lost = inner.channels.remove(key);
                drop(inner);
                match lost {
                    Some(entry) if entry.state == ChannelState::Live => self.lose(key, &e, entry.refcount()),
                    _ => self.fail_async(key, &e),
                }
            }
        }
    }

    /// Remove one subscriber. The last one out closes a live channel; a
    /// channel still waiting for its ack is closed when the ack arrives.
    pub fn release(&self, key: &ChannelKey, subscription: SubscriptionId) {
        let mut inner = self.inner();

        let Some(entry) = inner.channels.get_mut(key) else {
            drop(inner);
            let error = RealtimeError::TeardownError(key.to_string());
            log_event(Event::TeardownIgnored, &[("key", key.as_str()), ("error", &error.to_string())]);
            return;
        };

        let before = entry.subscribers.len();
        entry.subscribers.retain(|(id, _)| *id != subscription);
        if entry.subscribers.len() == before {
            drop(inner);
            log_event(
                Event::TeardownIgnored,
                &[("key", key.as_str()), ("subscription", &subscription.0.to_string())],
            );
            return;
        }

        if entry.refcount() > 0 || entry.state != ChannelState::Live {
            return;
        }

        let handle = inner.channels.remove(key).and_then(|e| e.handle);
        drop(inner);
        if let Some(handle) = handle {
            close_handle(key, handle, &self.metrics, Event::ChannelClose);
        }
    }

    /// Force-close every channel regardless of refcount; returns how many
    /// handles were closed
    pub fn teardown_all(&self) -> usize {
        let drained: Vec<(ChannelKey, ChannelEntry)> = self.inner().channels.drain().collect();
        self.metrics.increment_forced_teardowns();

        let mut closed = 0;
        for (key, entry) in drained {
            if let Some(handle) = entry.handle {
                close_handle(&key, handle, &self.metrics, Event::ChannelClose);
                closed += 1;
            }
        }

        log_event(Event::TeardownAll, &[("closed", &closed.to_string())]);
        closed
    }

    /// Callback the transport invokes for each payload on this channel
    pub fn payload_callback(&self, key: &ChannelKey, generation: u64) -> PayloadCallback {
        let registry = self.weak_self.clone();
        let key = key.clone();
        Arc::new(move |raw: Value| {
            if let Some(registry) = registry.upgrade() {
                registry.dispatch(&key, generation, raw);
            }
        })
    }

    /// Callback the transport invokes when the handshake settles and when
    /// the channel is lost
    pub fn status_callback(&self, key: &ChannelKey, generation: u64) -> StatusCallback {
        let registry = self.weak_self.clone();
        let key = key.clone();
        Arc::new(move |result| {
            if let Some(registry) = registry.upgrade() {
                registry.on_ready(&key, generation, result);
            }
        })
    }

    fn route(&self, key: &ChannelKey, generation: u64) -> Option<Route> {
        let inner = self.inner();
        let entry = inner.channels.get(key).filter(|e| e.generation == generation)?;
        if entry.subscribers.is_empty() {
            return None;
        }

        Some(Route {
            predicate: entry.predicate.clone(),
            handlers: entry.subscribers.iter().map(|(_, h)| h.clone()).collect(),
        })
    }

    /// Deliver a raw payload that arrived on `key`. Payloads for stale
    /// generations or channels without subscribers are dropped.
    pub fn dispatch(&self, key: &ChannelKey, generation: u64, raw: Value) -> DispatchResult {
        match self.route(key, generation) {
            Some(route) => self.dispatcher.dispatch(key, &route, raw),
            None => {
                log_event(Event::EventUnrouted, &[("key", key.as_str())]);
                DispatchResult::default()
            }
        }
    }

    /// Channels with at least one subscriber
    pub fn active_count(&self) -> usize {
        self.inner().channels.values().filter(|e| e.refcount() > 0).count()
    }

    /// Keys of channels with at least one subscriber, sorted
    pub fn active_keys(&self) -> Vec<ChannelKey> {
        let mut keys: Vec<ChannelKey> = self
            .inner()
            .channels
            .iter()
            .filter(|(_, e)| e.refcount() > 0)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn refcount(&self, key: &ChannelKey) -> usize {
        self.inner().channels.get(key).map(ChannelEntry::refcount).unwrap_or(0)
    }

    pub fn info(&self, key: &ChannelKey) -> Option<ChannelInfo> {
        self.inner().channels.get(key).map(|e| ChannelInfo {
            key: key.clone(),
            generation: e.generation,
            state: e.state,
            refcount: e.refcount(),
        })
    }

    /// Entries including those awaiting an orphan close
    pub fn len(&self) -> usize {
        self.inner().channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.len())
            .field("active", &self.active_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::auth::Identity;
    use crate::realtime::event::RawChangePayload;
    use crate::realtime::transport::{ChannelBinding, MemoryTransport, Transport};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(domain: &str) -> ChannelKey {
        ChannelKey::new(domain, &Identity::new("u1"), None).unwrap()
    }

    fn counting_handler() -> (Handler, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (Handler::new(move |_| { c.fetch_add(1, Ordering::SeqCst); }), count)
    }

    fn open_on<'a>(
        registry: &'a ChannelRegistry,
        transport: &'a MemoryTransport,
        key: &'a ChannelKey,
    ) -> impl FnOnce(u64) -> RealtimeResult<Box<dyn ChannelHandle>> + 'a {
        move |generation| {
            let mut handle = transport.open_channel(key)?;
            handle.on(
                ChannelBinding::new("public", key.domain(), None),
                registry.payload_callback(key, generation),
            );
            handle.start(registry.status_callback(key, generation));
            Ok(handle)
        }
    }

    fn setup() -> (Arc<ChannelRegistry>, MemoryTransport) {
        (ChannelRegistry::new(Arc::new(MetricsRegistry::new())), MemoryTransport::new())
    }

    #[test]
    fn test_dedup_and_refcount() {
        let (registry, transport) = setup();
        let k = key("notifications");

        for i in 0..3 {
            let (h, _) = counting_handler();
            registry
                .get_or_create(&k, FilterPredicate::accept_all(), (SubscriptionId(i), h), open_on(&registry, &transport, &k))
                .unwrap();
        }

        assert_eq!(transport.open_count("notifications:u1"), 1);
        assert_eq!(registry.refcount(&k), 3);
        assert_eq!(registry.info(&k).unwrap().state, ChannelState::Pending);

        transport.ack("notifications:u1");
        assert_eq!(registry.info(&k).unwrap().state, ChannelState::Live);

        registry.release(&k, SubscriptionId(0));
        registry.release(&k, SubscriptionId(1));
        assert_eq!(transport.close_count("notifications:u1"), 0);

        registry.release(&k, SubscriptionId(2));
        assert_eq!(transport.close_count("notifications:u1"), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_open_failure_leaves_no_entry() {
        let (registry, transport) = setup();
        let k = key("sessions");
        transport.fail_next_open("refused");

        let (h, _) = counting_handler();
        let (result, _) = crate::observability::Logger::capture(|| {
            registry.get_or_create(&k, FilterPredicate::accept_all(), (SubscriptionId(1), h), open_on(&registry, &transport, &k))
        });

        assert!(matches!(result, Err(RealtimeError::ConnectionError(_))));
        assert!(registry.is_empty());
        assert_eq!(registry.metrics().snapshot().open_failures, 1);
    }

    #[test]
    fn test_release_before_ack_closes_on_ack() {
        let (registry, transport) = setup();
        let k = key("reflections");

        let (h, _) = counting_handler();
        registry
            .get_or_create(&k, FilterPredicate::accept_all(), (SubscriptionId(1), h), open_on(&registry, &transport, &k))
            .unwrap();
        registry.release(&k, SubscriptionId(1));

        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.len(), 1);
        assert_eq!(transport.close_count("reflections:u1"), 0);

        transport.ack("reflections:u1");
        assert_eq!(transport.close_count("reflections:u1"), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_resubscribe_while_orphaned_reuses_handle() {
        let (registry, transport) = setup();
        let k = key("reflections");

        let (h1, _) = counting_handler();
        registry
            .get_or_create(&k, FilterPredicate::accept_all(), (SubscriptionId(1), h1), open_on(&registry, &transport, &k))
            .unwrap();
        registry.release(&k, SubscriptionId(1));

        let (h2, count) = counting_handler();
        registry
            .get_or_create(&k, FilterPredicate::accept_all(), (SubscriptionId(2), h2), open_on(&registry, &transport, &k))
            .unwrap();
        transport.ack("reflections:u1");

        assert_eq!(transport.open_count("reflections:u1"), 1);
        assert_eq!(transport.close_count("reflections:u1"), 0);
        assert_eq!(registry.info(&k).unwrap().state, ChannelState::Live);

        transport.emit(&RawChangePayload::insert("reflections", json!({"id": 1})));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_async_failure_removes_entry() {
        let (registry, transport) = setup();
        let k = key("coach_notes");

        let (h, _) = counting_handler();
        registry
            .get_or_create(&k, FilterPredicate::accept_all(), (SubscriptionId(1), h), open_on(&registry, &transport, &k))
            .unwrap();

        let ((), _) = crate::observability::Logger::capture(|| {
            transport.fail("coach_notes:u1", "denied");
        });

        assert!(registry.is_empty());
        assert_eq!(transport.close_count("coach_notes:u1"), 0);

        // A later subscribe retries cleanly
        let (h, _) = counting_handler();
        registry
            .get_or_create(&k, FilterPredicate::accept_all(), (SubscriptionId(2), h), open_on(&registry, &transport, &k))
            .unwrap();
        assert_eq!(transport.open_count("coach_notes:u1"), 2);
    }

    #[test]
    fn test_synchronous_ack_during_open() {
        let registry = ChannelRegistry::new(Arc::new(MetricsRegistry::new()));
        let transport = MemoryTransport::with_auto_ack();
        let k = key("notifications");

        let (h, count) = counting_handler();
        registry
            .get_or_create(&k, FilterPredicate::accept_all(), (SubscriptionId(1), h), open_on(&registry, &transport, &k))
            .unwrap();

        assert_eq!(registry.info(&k).unwrap().state, ChannelState::Live);
        transport.emit(&RawChangePayload::insert("notifications", json!({"id": 1})));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_live_channel_loss_removes_entry() {
        let (registry, transport) = setup();
        let k = key("notifications");

        let (h, _) = counting_handler();
        let generation = registry
            .get_or_create(&k, FilterPredicate::accept_all(), (SubscriptionId(1), h), open_on(&registry, &transport, &k))
            .unwrap();
        transport.ack("notifications:u1");

        // Repeated ack on a live channel changes nothing
        let ((), lines) = crate::observability::Logger::capture(|| registry.on_ready(&k, generation, Ok(())));
        assert!(lines.is_empty());
        assert_eq!(registry.info(&k).unwrap().state, ChannelState::Live);

        let (_, lines) = crate::observability::Logger::capture(|| transport.lose("notifications:u1", "socket gone"));
        assert!(lines.iter().any(|l| l.contains("CHANNEL_LOST")));
        assert!(registry.is_empty());
        assert_eq!(transport.close_count("notifications:u1"), 0);

        let snapshot = registry.metrics().snapshot();
        assert_eq!(snapshot.channels_lost, 1);
        assert_eq!(snapshot.open_failures, 0);
        assert_eq!(snapshot.channels_live(), 0);

        // The old guard is stale; a new subscriber reopens
        let ((), _) = crate::observability::Logger::capture(|| registry.release(&k, SubscriptionId(1)));
        let (h, count) = counting_handler();
        registry
            .get_or_create(&k, FilterPredicate::accept_all(), (SubscriptionId(2), h), open_on(&registry, &transport, &k))
            .unwrap();
        transport.ack("notifications:u1");
        assert_eq!(transport.open_count("notifications:u1"), 2);

        transport.emit(&RawChangePayload::insert("notifications", json!({"id": 1})));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_teardown_during_open_closes_new_handle() {
        let (registry, transport) = setup();
        let k = key("sessions");

        let (h, _) = counting_handler();
        let (result, _) = crate::observability::Logger::capture(|| {
            registry.get_or_create(&k, FilterPredicate::accept_all(), (SubscriptionId(1), h), |generation| {
                let handle = open_on(&registry, &transport, &k)(generation)?;
                registry.teardown_all();
                Ok(handle)
            })
        });

        assert!(matches!(result, Err(RealtimeError::ConnectionError(ref m)) if m.contains("torn down")));
        assert_eq!(transport.close_count("sessions:u1"), 1);
        assert!(registry.is_empty());

        // Its ack can no longer fire
        assert_eq!(transport.ack("sessions:u1"), 0);
    }

    #[test]
    fn test_handshake_failure_before_open_returns() {
        let (registry, transport) = setup();
        let k = key("coach_notes");

        let (h, _) = counting_handler();
        let (result, lines) = crate::observability::Logger::capture(|| {
            registry.get_or_create(&k, FilterPredicate::accept_all(), (SubscriptionId(1), h), |generation| {
                let handle = open_on(&registry, &transport, &k)(generation)?;
                transport.fail("coach_notes:u1", "denied");
                Ok(handle)
            })
        });

        assert!(result.is_ok());
        assert!(lines.iter().any(|l| l.contains("CHANNEL_OPEN_FAILED") && l.contains("handshake")));
        assert!(registry.is_empty());
        assert_eq!(transport.close_count("coach_notes:u1"), 0);

        let snapshot = registry.metrics().snapshot();
        assert_eq!(snapshot.open_failures, 1);
        assert_eq!(snapshot.channels_live(), 0);
    }

    #[test]
    fn test_release_and_ack_before_open_returns() {
        let (registry, transport) = setup();
        let k = key("reflections");

        let (h, _) = counting_handler();
        let (result, lines) = crate::observability::Logger::capture(|| {
            registry.get_or_create(&k, FilterPredicate::accept_all(), (SubscriptionId(1), h), |generation| {
                let handle = open_on(&registry, &transport, &k)(generation)?;
                registry.release(&k, SubscriptionId(1));
                transport.ack("reflections:u1");
                Ok(handle)
            })
        });

        assert!(result.is_ok());
        assert!(lines.iter().any(|l| l.contains("CHANNEL_ORPHAN_CLOSED")));
        assert_eq!(transport.close_count("reflections:u1"), 1);
        assert!(registry.is_empty());
        assert_eq!(registry.metrics().snapshot().channels_live(), 0);
    }

    #[test]
    fn test_teardown_all_ignores_refcount() {
        let (registry, transport) = setup();

        for (i, domain) in ["notifications", "sessions", "reflections"].iter().enumerate() {
            let k = key(domain);
            for j in 0..2 {
                let (h, _) = counting_handler();
                registry
                    .get_or_create(
                        &k,
                        FilterPredicate::accept_all(),
                        (SubscriptionId((i * 10 + j) as u64), h),
                        open_on(&registry, &transport, &k),
                    )
                    .unwrap();
            }
        }
        transport.ack("notifications:u1");

        assert_eq!(registry.teardown_all(), 3);
        assert_eq!(transport.total_closes(), 3);
        assert_eq!(registry.active_count(), 0);

        // Late ack for a torn-down channel is ignored
        assert_eq!(transport.ack("sessions:u1"), 0);
        assert_eq!(transport.total_closes(), 3);
    }

    #[test]
    fn test_release_unknown_is_ignored() {
        let (registry, _) = setup();

        let ((), lines) = crate::observability::Logger::capture(|| {
            registry.release(&key("notifications"), SubscriptionId(9));
        });

        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("TEARDOWN_IGNORED"));
    }

    #[test]
    fn test_double_release_is_single_release() {
        let (registry, transport) = setup();
        let k = key("notifications");

        for i in 0..2 {
            let (h, _) = counting_handler();
            registry
                .get_or_create(&k, FilterPredicate::accept_all(), (SubscriptionId(i), h), open_on(&registry, &transport, &k))
                .unwrap();
        }
        transport.ack("notifications:u1");

        registry.release(&k, SubscriptionId(0));
        let ((), _) = crate::observability::Logger::capture(|| registry.release(&k, SubscriptionId(0)));

        assert_eq!(registry.refcount(&k), 1);
        assert_eq!(transport.close_count("notifications:u1"), 0);
    }
}
