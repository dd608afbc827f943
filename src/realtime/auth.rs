//! # Auth Lifecycle Binding
//!
//! Connects the identity stream to channel lifetime.
//!
//! ```text
//! Disconnected ──SignedIn(id)──► Connected(id)
//! Connected(id) ──SignedOut──► Disconnected        (teardown_all)
//! Connected(id) ──SignedIn(id2)──► Connected(id2)  (teardown_all first)
//! ```
//!
//! Sign-in never opens channels; they open lazily on the first subscribe.
//! The state lock is held across teardown, so no subscribe can open a
//! channel for the new identity while channels of the old one still exist.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::registry::ChannelRegistry;
use super::transport::lock;
use crate::observability::{log_event, Event};

/// Authenticated user reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity stream event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthEvent {
    SignedIn { identity: Identity },
    SignedOut,
}

/// Connection state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected(Identity),
}

impl ConnectionState {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            ConnectionState::Disconnected => None,
            ConnectionState::Connected(identity) => Some(identity),
        }
    }
}

/// Source of identity transitions
pub trait AuthSessionProvider: Send + Sync {
    /// Identity of the session active right now, if any
    fn current_identity(&self) -> Option<Identity>;

    /// Stream of subsequent transitions
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

/// Broadcast-backed session provider
#[derive(Debug)]
pub struct SessionBroadcaster {
    current: std::sync::Mutex<Option<Identity>>,
    tx: broadcast::Sender<AuthEvent>,
}

impl Default for SessionBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            current: std::sync::Mutex::new(None),
            tx,
        }
    }

    pub fn sign_in(&self, identity: Identity) {
        *lock(&self.current) = Some(identity.clone());
        let _ = self.tx.send(AuthEvent::SignedIn { identity });
    }

    pub fn sign_out(&self) {
        *lock(&self.current) = None;
        let _ = self.tx.send(AuthEvent::SignedOut);
    }
}

impl AuthSessionProvider for SessionBroadcaster {
    fn current_identity(&self) -> Option<Identity> {
        lock(&self.current).clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.tx.subscribe()
    }
}

/// Owns the connection state and performs forced teardown on identity loss
#[derive(Debug)]
pub struct AuthLifecycleBinder {
    state: RwLock<ConnectionState>,
    registry: Arc<ChannelRegistry>,
    attached: AtomicBool,
}

impl AuthLifecycleBinder {
    pub fn new(registry: Arc<ChannelRegistry>) -> Self {
        Self {
            state: RwLock::new(ConnectionState::Disconnected),
            registry,
            attached: AtomicBool::new(false),
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, ConnectionState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ConnectionState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> ConnectionState {
        self.read().clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.read().identity().cloned()
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.read(), ConnectionState::Connected(_))
    }

    /// Apply one identity transition
    pub fn apply(&self, event: AuthEvent) {
        let mut state = self.write();
        let current = state.identity().cloned();

        match (current, event) {
            (None, AuthEvent::SignedIn { identity }) => {
                log_event(Event::IdentitySignedIn, &[("identity", identity.as_str())]);
                *state = ConnectionState::Connected(identity);
            }
            (Some(current), AuthEvent::SignedIn { identity }) => {
                if current == identity {
                    return;
                }
                let closed = self.registry.teardown_all();
                log_event(
                    Event::IdentitySwitched,
                    &[
                        ("from", current.as_str()),
                        ("to", identity.as_str()),
                        ("closed", &closed.to_string()),
                    ],
                );
                *state = ConnectionState::Connected(identity);
            }
            (Some(current), AuthEvent::SignedOut) => {
                let closed = self.registry.teardown_all();
                log_event(
                    Event::IdentitySignedOut,
                    &[("identity", current.as_str()), ("closed", &closed.to_string())],
                );
                *state = ConnectionState::Disconnected;
            }
            (None, AuthEvent::SignedOut) => {}
        }
    }

    /// Follow a session provider for the rest of the process. Seeds from the
    /// provider's current identity, then applies every event on a tokio task.
    /// Only the first call binds; later calls return `None`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach(self: &Arc<Self>, provider: Arc<dyn AuthSessionProvider>) -> Option<JoinHandle<()>> {
        if self.attached.swap(true, Ordering::SeqCst) {
            return None;
        }

        // Subscribe before reading the current identity so nothing slips between
        let mut rx = provider.subscribe();
        self.sync_with(provider.as_ref());

        let binder = Arc::clone(self);
        Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => binder.apply(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log_event(Event::AuthStreamLagged, &[("skipped", &skipped.to_string())]);
                        binder.sync_with(provider.as_ref());
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        log_event(Event::AuthStreamClosed, &[]);
                        break;
                    }
                }
            }
        }))
    }

    fn sync_with(&self, provider: &dyn AuthSessionProvider) {
        match provider.current_identity() {
            Some(identity) => self.apply(AuthEvent::SignedIn { identity }),
            None => self.apply(AuthEvent::SignedOut),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::MetricsRegistry;
    use crate::realtime::dispatcher::Handler;
    use crate::realtime::factory::ChannelKey;
    use crate::realtime::filter::FilterPredicate;
    use crate::realtime::registry::SubscriptionId;
    use crate::realtime::transport::{MemoryTransport, Transport};

    fn setup() -> (Arc<AuthLifecycleBinder>, Arc<ChannelRegistry>, MemoryTransport) {
        let registry = ChannelRegistry::new(Arc::new(MetricsRegistry::new()));
        let binder = Arc::new(AuthLifecycleBinder::new(Arc::clone(&registry)));
        (binder, registry, MemoryTransport::with_auto_ack())
    }

    fn open(registry: &ChannelRegistry, transport: &MemoryTransport, domain: &str, identity: &str) {
        let key = ChannelKey::new(domain, &Identity::new(identity), None).unwrap();
        registry
            .get_or_create(
                &key,
                FilterPredicate::accept_all(),
                (SubscriptionId(1), Handler::new(|_| {})),
                |_| transport.open_channel(&key),
            )
            .unwrap();
    }

    fn signed_in(id: &str) -> AuthEvent {
        AuthEvent::SignedIn {
            identity: Identity::new(id),
        }
    }

    #[test]
    fn test_sign_in_is_lazy() {
        let (binder, registry, transport) = setup();

        binder.apply(signed_in("u1"));

        assert!(binder.is_connected());
        assert_eq!(binder.identity(), Some(Identity::new("u1")));
        assert_eq!(transport.total_opens(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_sign_out_tears_down() {
        let (binder, registry, transport) = setup();
        binder.apply(signed_in("u1"));
        open(&registry, &transport, "notifications", "u1");
        open(&registry, &transport, "sessions", "u1");

        binder.apply(AuthEvent::SignedOut);

        assert_eq!(binder.state(), ConnectionState::Disconnected);
        assert_eq!(transport.total_closes(), 2);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_identity_switch_tears_down_first() {
        let (binder, registry, transport) = setup();
        binder.apply(signed_in("u1"));
        open(&registry, &transport, "notifications", "u1");

        binder.apply(signed_in("u2"));

        assert_eq!(binder.identity(), Some(Identity::new("u2")));
        assert_eq!(transport.close_count("notifications:u1"), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_repeated_sign_in_same_identity_keeps_channels() {
        let (binder, registry, transport) = setup();
        binder.apply(signed_in("u1"));
        open(&registry, &transport, "notifications", "u1");

        binder.apply(signed_in("u1"));

        assert_eq!(transport.total_closes(), 0);
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn test_sign_out_while_disconnected_is_noop() {
        let (binder, registry, _) = setup();
        let ((), lines) = crate::observability::Logger::capture(|| binder.apply(AuthEvent::SignedOut));

        assert!(lines.is_empty());
        assert_eq!(registry.metrics().snapshot().forced_teardowns, 0);
    }

    #[tokio::test]
    async fn test_attach_follows_provider() {
        let (binder, _, _) = setup();
        let provider = Arc::new(SessionBroadcaster::new());
        provider.sign_in(Identity::new("u1"));

        let task = binder.attach(provider.clone()).unwrap();
        assert_eq!(binder.identity(), Some(Identity::new("u1")));
        assert!(binder.attach(provider.clone()).is_none());

        provider.sign_out();
        for _ in 0..100 {
            if !binder.is_connected() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!binder.is_connected());

        provider.sign_in(Identity::new("u2"));
        for _ in 0..100 {
            if binder.is_connected() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(binder.identity(), Some(Identity::new("u2")));

        task.abort();
    }

    #[test]
    fn test_auth_event_serde() {
        let json = serde_json::to_value(signed_in("u1")).unwrap();
        assert_eq!(json["type"], "signed_in");
        assert_eq!(json["identity"], "u1");
    }
}
