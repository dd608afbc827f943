//! # Realtime Subscriptions
//!
//! Channel lifecycle for change-notification subscriptions.
//!
//! ## Architecture
//!
//! - **Factory**: domain + identity → channel key, wire bindings, predicate
//! - **Registry**: one refcounted transport handle per channel key
//! - **Auth**: identity transitions drive forced teardown
//! - **Dispatcher**: payload normalization and handler fan-out
//! - **Bindings**: `RealtimeClient` and the `Subscription` guard
//! - **Transport**: the seam, with in-memory and WebSocket implementations

pub mod auth;
pub mod bindings;
pub mod dispatcher;
pub mod errors;
pub mod event;
pub mod factory;
pub mod filter;
pub mod registry;
pub mod transport;
pub mod websocket;

pub use auth::{AuthEvent, AuthLifecycleBinder, AuthSessionProvider, ConnectionState, Identity, SessionBroadcaster};
pub use bindings::{RealtimeClient, Subscription};
pub use dispatcher::{DispatchResult, EventDispatcher, Handler, HandlerError, HandlerResult};
pub use errors::{ErrorCategory, RealtimeError, RealtimeResult};
pub use event::{Change, ChangeEvent, EventType, RawChangePayload};
pub use factory::{ChannelKey, ChannelSpec, Domain, SubscriptionFactory};
pub use filter::{FilterOp, FilterPredicate, WireFilter};
pub use registry::{ChannelInfo, ChannelRegistry, ChannelState, SubscriptionId};
pub use transport::{ChannelBinding, ChannelHandle, MemoryTransport, PayloadCallback, StatusCallback, Transport};
pub use websocket::{ClientMessage, ServerMessage, WebSocketTransport};
