//! # Event Dispatcher
//!
//! Turns raw transport payloads into `ChangeEvent`s, applies the channel's
//! filter predicate and fans out to every handler registered on the
//! channel, in registration order.
//!
//! Ordering is per channel only: payloads are delivered in the order the
//! transport hands them over. A failing handler (error or panic) is logged
//! and counted; the remaining handlers still see the event.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::errors::RealtimeError;
use super::event::{ChangeEvent, RawChangePayload};
use super::factory::ChannelKey;
use super::filter::FilterPredicate;
use crate::observability::{log_event, Event, MetricsRegistry};

/// Error a handler may return
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result of one handler invocation
pub type HandlerResult = Result<(), HandlerError>;

type HandlerFn = dyn Fn(&ChangeEvent) -> HandlerResult + Send + Sync;

/// A consumer callback. Clones share identity: registering a clone of a
/// handler on the same channel twice still invokes it once per event.
#[derive(Clone)]
pub struct Handler(Arc<HandlerFn>);

impl Handler {
    /// Infallible handler
    pub fn new(f: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> Self {
        Self(Arc::new(move |event: &ChangeEvent| {
            f(event);
            Ok(())
        }))
    }

    /// Handler that may fail; failures are isolated and logged
    pub fn fallible(f: impl Fn(&ChangeEvent) -> HandlerResult + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Handler over a concrete row type; a row that does not decode counts
    /// as a handler failure
    pub fn typed<T, F>(f: F) -> Self
    where
        T: DeserializeOwned + 'static,
        F: Fn(ChangeEvent<T>) -> HandlerResult + Send + Sync + 'static,
    {
        Self(Arc::new(move |event: &ChangeEvent| {
            let typed = event.decode::<T>()?;
            f(typed)
        }))
    }

    /// Same underlying callback
    pub fn same(&self, other: &Handler) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.0) as *const (),
            Arc::as_ptr(&other.0) as *const (),
        )
    }

    fn call(&self, event: &ChangeEvent) -> HandlerResult {
        (self.0)(event)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}

/// Snapshot of what a channel dispatches to, taken under the registry lock
#[derive(Debug, Clone)]
pub struct Route {
    pub predicate: FilterPredicate,
    pub handlers: Vec<Handler>,
}

/// Result of dispatching one payload
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchResult {
    /// Distinct handlers on the channel
    pub matched: usize,
    /// Handler invocations that completed
    pub delivered: usize,
    /// Dropped by the filter predicate
    pub filtered: bool,
    /// Payload failed normalization
    pub malformed: bool,
    /// Handler invocations that failed
    pub failed: usize,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Normalizes, filters and fans out payloads
#[derive(Debug)]
pub struct EventDispatcher {
    metrics: Arc<MetricsRegistry>,
}

impl EventDispatcher {
    pub fn new(metrics: Arc<MetricsRegistry>) -> Self {
        Self { metrics }
    }

    /// Normalize a raw payload
    pub fn normalize(raw: Value) -> Result<ChangeEvent, RealtimeError> {
        RawChangePayload::from_value(raw).and_then(ChangeEvent::from_raw)
    }

    /// Dispatch one raw payload along a route. Nothing here propagates:
    /// malformed payloads, filtered events and handler failures only show
    /// up in the result, the log and the metrics.
    pub fn dispatch(&self, key: &ChannelKey, route: &Route, raw: Value) -> DispatchResult {
        let mut result = DispatchResult::default();
        self.metrics.increment_events_received();

        let event = match Self::normalize(raw) {
            Ok(event) => event,
            Err(e) => {
                self.metrics.increment_events_malformed();
                log_event(
                    Event::EventMalformed,
                    &[("key", key.as_str()), ("category", e.category().as_str()), ("error", &e.to_string())],
                );
                result.malformed = true;
                return result;
            }
        };

        if !route.predicate.test(&event) {
            self.metrics.increment_events_filtered();
            result.filtered = true;
            return result;
        }

        let mut called: Vec<&Handler> = Vec::with_capacity(route.handlers.len());
        for handler in &route.handlers {
            if called.iter().any(|h| h.same(handler)) {
                continue;
            }
            called.push(handler);

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.call(&event)));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(payload) => Some(panic_message(payload)),
            };

            match failure {
                None => {
                    result.delivered += 1;
                    self.metrics.increment_events_delivered();
                }
                Some(message) => {
                    result.failed += 1;
                    self.metrics.increment_handler_failures();
                    let error = RealtimeError::HandlerFailed {
                        channel: key.to_string(),
                        message,
                    };
                    log_event(
                        Event::HandlerFailed,
                        &[
                            ("key", key.as_str()),
                            ("operation", &event.operation().to_string()),
                            ("category", error.category().as_str()),
                            ("error", &error.to_string()),
                        ],
                    );
                }
            }
        }

        result.matched = called.len();
        result
    }
}
