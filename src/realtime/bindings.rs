//! # Consumer Bindings
//!
//! The subscribe/unsubscribe facade handed to UI code. `subscribe` returns
//! a `Subscription` guard; dropping it (or calling `unsubscribe`) releases
//! the channel. Calling `subscribe` while signed out is always safe and
//! yields an inert guard.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;

use super::auth::{AuthEvent, AuthLifecycleBinder, AuthSessionProvider, Identity};
use super::dispatcher::Handler;
use super::errors::RealtimeResult;
use super::factory::{ChannelKey, ChannelSpec, Domain, SubscriptionFactory};
use super::registry::{ChannelRegistry, SubscriptionId};
use super::transport::{ChannelHandle, Transport};
use crate::config::RealtimeConfig;
use crate::observability::{log_event, Event, MetricsRegistry, MetricsSnapshot};

struct ClientInner {
    registry: Arc<ChannelRegistry>,
    binder: Arc<AuthLifecycleBinder>,
    transport: Arc<dyn Transport>,
    factory: SubscriptionFactory,
    next_subscription: AtomicU64,
}

/// Shared handle to the subscription manager; clones share all state
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<ClientInner>,
}

impl RealtimeClient {
    pub fn new(transport: Arc<dyn Transport>, config: &RealtimeConfig) -> Self {
        let registry = ChannelRegistry::new(Arc::new(MetricsRegistry::new()));
        let binder = Arc::new(AuthLifecycleBinder::new(Arc::clone(&registry)));

        Self {
            inner: Arc::new(ClientInner {
                registry,
                binder,
                transport,
                factory: SubscriptionFactory::new(&config.schema, config.tables.clone()),
                next_subscription: AtomicU64::new(1),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.inner.registry
    }

    pub fn binder(&self) -> &Arc<AuthLifecycleBinder> {
        &self.inner.binder
    }

    pub fn factory(&self) -> &SubscriptionFactory {
        &self.inner.factory
    }

    /// Follow an identity stream; see `AuthLifecycleBinder::attach`
    pub fn attach(&self, provider: Arc<dyn AuthSessionProvider>) -> Option<JoinHandle<()>> {
        self.inner.binder.attach(provider)
    }

    pub fn sign_in(&self, identity: Identity) {
        self.inner.binder.apply(AuthEvent::SignedIn { identity });
    }

    pub fn sign_out(&self) {
        self.inner.binder.apply(AuthEvent::SignedOut);
    }

    /// Subscribe `handler` to `domain` for the current identity.
    ///
    /// Signed out: returns an inert guard without touching the transport.
    /// A synchronous open failure is returned; handshake failures are only
    /// logged, and the next `subscribe` retries.
    pub fn subscribe(&self, domain: Domain, handler: Handler) -> RealtimeResult<Subscription> {
        // Held until the channel is registered so no identity switch interleaves
        let state = self.inner.binder.read();
        let Some(identity) = state.identity() else {
            log_event(Event::SubscribeDisconnected, &[("domain", domain.name())]);
            return Ok(Subscription::inert());
        };

        let spec = self.inner.factory.resolve(&domain, identity)?;
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));

        let registry = &self.inner.registry;
        registry.get_or_create(
            &spec.key,
            spec.predicate.clone(),
            (id, handler),
            |generation| open_channel(registry, self.inner.transport.as_ref(), &spec, generation),
        )?;
        drop(state);

        Ok(Subscription {
            lease: Some(Lease {
                registry: Arc::clone(registry),
                key: spec.key,
                id,
            }),
            released: AtomicBool::new(false),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.inner.binder.is_connected()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.inner.binder.identity()
    }

    /// Open channels with at least one subscriber
    pub fn active_subscription_count(&self) -> usize {
        self.inner.registry.active_count()
    }

    /// Names of those channels, sorted
    pub fn active_channel_keys(&self) -> Vec<String> {
        self.inner
            .registry
            .active_keys()
            .into_iter()
            .map(|k| k.to_string())
            .collect()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.registry.metrics().snapshot()
    }
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("state", &self.inner.binder.state())
            .field("registry", &self.inner.registry)
            .finish()
    }
}

/// Open a channel for `spec` and wire its callbacks back into the registry
fn open_channel(
    registry: &ChannelRegistry,
    transport: &dyn Transport,
    spec: &ChannelSpec,
    generation: u64,
) -> RealtimeResult<Box<dyn ChannelHandle>> {
    let mut handle = transport.open_channel(&spec.key)?;
    for binding in &spec.bindings {
        handle.on(binding.clone(), registry.payload_callback(&spec.key, generation));
    }
    handle.start(registry.status_callback(&spec.key, generation));
    Ok(handle)
}

struct Lease {
    registry: Arc<ChannelRegistry>,
    key: ChannelKey,
    id: SubscriptionId,
}

/// One consumer's hold on a channel. Released exactly once: by the first
/// `unsubscribe` call or on drop.
pub struct Subscription {
    lease: Option<Lease>,
    released: AtomicBool,
}

impl Subscription {
    fn inert() -> Self {
        Self {
            lease: None,
            released: AtomicBool::new(true),
        }
    }

    /// Channel this subscription holds; `None` for an inert guard
    pub fn key(&self) -> Option<&ChannelKey> {
        self.lease.as_ref().map(|l| &l.key)
    }

    pub fn id(&self) -> Option<SubscriptionId> {
        self.lease.as_ref().map(|l| l.id)
    }

    /// Still holding its channel
    pub fn is_active(&self) -> bool {
        !self.released.load(Ordering::SeqCst)
    }

    /// Release the channel; later calls do nothing
    pub fn unsubscribe(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(lease) = &self.lease {
            lease.registry.release(&lease.key, lease.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key())
            .field("active", &self.is_active())
            .finish()
    }
}
