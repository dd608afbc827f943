//! # Transport Seam
//!
//! What the subscription manager needs from a change-notification
//! transport, plus an in-process implementation that records every call.
//!
//! Handshake model: `open_channel` returns a handle synchronously, bindings
//! are accumulated with `on`, and `start` begins the handshake. The ready
//! acknowledgment arrives later through the `StatusCallback`, possibly from
//! another thread, possibly before `start` even returns. The same callback
//! later reports an `Err` if an established channel is lost; after `close`
//! it is never called again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{RealtimeError, RealtimeResult};
use super::event::RawChangePayload;
use super::factory::ChannelKey;
use super::filter::WireFilter;

/// Receives every raw payload pushed for one binding
pub type PayloadCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// Receives the outcome of the channel handshake, then at most one `Err`
/// if the live channel is lost
pub type StatusCallback = Arc<dyn Fn(RealtimeResult<()>) + Send + Sync>;

/// One server-side change subscription multiplexed onto a channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelBinding {
    /// Event kinds, `*` for all
    pub event: String,
    pub schema: String,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<WireFilter>,
}

impl ChannelBinding {
    pub fn new(schema: &str, table: &str, filter: Option<WireFilter>) -> Self {
        Self {
            event: "*".to_string(),
            schema: schema.to_string(),
            table: table.to_string(),
            filter,
        }
    }

    /// Whether the backend would push this payload for this binding
    pub fn matches(&self, payload: &RawChangePayload) -> bool {
        if payload.schema != self.schema || payload.table != self.table {
            return false;
        }
        if self.event != "*" && self.event != payload.event.to_string() {
            return false;
        }

        let Some(filter) = &self.filter else {
            return true;
        };

        [&payload.new, &payload.old]
            .into_iter()
            .flatten()
            .any(|record| filter.matches(record))
    }
}

/// An open (or opening) channel on the transport
pub trait ChannelHandle: Send {
    /// Register a binding; only valid before `start`
    fn on(&mut self, binding: ChannelBinding, callback: PayloadCallback);

    /// Begin the handshake; `status` reports the outcome and any later loss
    fn start(&mut self, status: StatusCallback);

    /// Close the channel; closing twice is a `TeardownError`
    fn close(&mut self) -> RealtimeResult<()>;
}

/// A change-notification transport
pub trait Transport: Send + Sync {
    /// Open a named channel; fails synchronously when the transport is unusable
    fn open_channel(&self, name: &ChannelKey) -> RealtimeResult<Box<dyn ChannelHandle>>;
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// In-memory transport
// =============================================================================

struct MemoryChannel {
    name: String,
    bindings: Vec<(ChannelBinding, PayloadCallback)>,
    status: Option<StatusCallback>,
    live: bool,
    closed: bool,
}

impl MemoryChannel {
    fn pending(&self) -> bool {
        !self.closed && !self.live && self.status.is_some()
    }
}

#[derive(Default)]
struct MemoryState {
    next_id: u64,
    channels: HashMap<u64, MemoryChannel>,
    opens: Vec<String>,
    closes: Vec<String>,
    fail_next_open: Option<String>,
    auto_ack: bool,
}

/// In-process transport. Handshakes stay pending until `ack`/`fail` is
/// called (or immediately succeed with `auto_ack`); `lose` drops live
/// channels; `emit` pushes a payload to every live binding that matches it.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acknowledge every handshake as soon as it starts
    pub fn with_auto_ack() -> Self {
        let transport = Self::new();
        lock(&transport.state).auto_ack = true;
        transport
    }

    /// Make the next `open_channel` fail synchronously
    pub fn fail_next_open(&self, message: &str) {
        lock(&self.state).fail_next_open = Some(message.to_string());
    }

    /// Number of `open_channel` calls for a name
    pub fn open_count(&self, name: &str) -> usize {
        lock(&self.state).opens.iter().filter(|n| *n == name).count()
    }

    /// Number of successful `close` calls for a name
    pub fn close_count(&self, name: &str) -> usize {
        lock(&self.state).closes.iter().filter(|n| *n == name).count()
    }

    pub fn total_opens(&self) -> usize {
        lock(&self.state).opens.len()
    }

    pub fn total_closes(&self) -> usize {
        lock(&self.state).closes.len()
    }

    /// Channels with this name that are neither closed nor failed
    pub fn is_open(&self, name: &str) -> bool {
        lock(&self.state)
            .channels
            .values()
            .any(|c| c.name == name && !c.closed)
    }

    /// Whether a started handshake for this name awaits its ack
    pub fn is_pending(&self, name: &str) -> bool {
        lock(&self.state)
            .channels
            .values()
            .any(|c| c.name == name && c.pending())
    }

    /// Bindings registered on the open channel with this name
    pub fn bindings(&self, name: &str) -> Vec<ChannelBinding> {
        lock(&self.state)
            .channels
            .values()
            .filter(|c| c.name == name && !c.closed)
            .flat_map(|c| c.bindings.iter().map(|(b, _)| b.clone()))
            .collect()
    }

    /// Remove channels selected by `pick`, returning their status callbacks
    fn remove_where(&self, pick: impl Fn(&MemoryChannel) -> bool) -> Vec<StatusCallback> {
        let mut state = lock(&self.state);
        let ids: Vec<u64> = state
            .channels
            .iter()
            .filter(|(_, c)| pick(c))
            .map(|(id, _)| *id)
            .collect();
        ids.iter()
            .filter_map(|id| state.channels.remove(id))
            .filter_map(|c| c.status)
            .collect()
    }

    /// Complete pending handshakes for a name; returns how many completed
    pub fn ack(&self, name: &str) -> usize {
        let acked: Vec<StatusCallback> = {
            let mut state = lock(&self.state);
            state
                .channels
                .values_mut()
                .filter(|c| c.name == name && c.pending())
                .filter_map(|c| {
                    c.live = true;
                    c.status.clone()
                })
                .collect()
        };

        for status in &acked {
            status(Ok(()));
        }
        acked.len()
    }

    /// Fail pending handshakes for a name; the channels are discarded
    pub fn fail(&self, name: &str, message: &str) -> usize {
        let failed = self.remove_where(|c| c.name == name && c.pending());
        for status in &failed {
            status(Err(RealtimeError::ConnectionError(message.to_string())));
        }
        failed.len()
    }

    /// Drop live channels for a name, as a dying connection would
    pub fn lose(&self, name: &str, message: &str) -> usize {
        let lost = self.remove_where(|c| c.name == name && c.live && !c.closed);
        for status in &lost {
            status(Err(RealtimeError::ConnectionError(message.to_string())));
        }
        lost.len()
    }

    /// Push a change to every matching binding on live channels; returns
    /// the number of callbacks invoked
    pub fn emit(&self, payload: &RawChangePayload) -> usize {
        let targets: Vec<PayloadCallback> = {
            let state = lock(&self.state);
            state
                .channels
                .values()
                .filter(|c| c.live && !c.closed)
                .flat_map(|c| c.bindings.iter())
                .filter(|(binding, _)| binding.matches(payload))
                .map(|(_, callback)| Arc::clone(callback))
                .collect()
        };

        let value = serde_json::to_value(payload).unwrap_or(Value::Null);
        for callback in &targets {
            callback(value.clone());
        }
        targets.len()
    }

    /// Push an arbitrary raw value to every binding of a named live channel
    pub fn emit_raw(&self, name: &str, value: Value) -> usize {
        let targets: Vec<PayloadCallback> = {
            let state = lock(&self.state);
            state
                .channels
                .values()
                .filter(|c| c.name == name && c.live && !c.closed)
                .flat_map(|c| c.bindings.iter().map(|(_, cb)| Arc::clone(cb)))
                .collect()
        };

        for callback in &targets {
            callback(value.clone());
        }
        targets.len()
    }
}

impl Transport for MemoryTransport {
    fn open_channel(&self, name: &ChannelKey) -> RealtimeResult<Box<dyn ChannelHandle>> {
        let mut state = lock(&self.state);
        state.opens.push(name.to_string());

        if let Some(message) = state.fail_next_open.take() {
            return Err(RealtimeError::ConnectionError(message));
        }

        state.next_id += 1;
        let id = state.next_id;
        state.channels.insert(
            id,
            MemoryChannel {
                name: name.to_string(),
                bindings: Vec::new(),
                status: None,
                live: false,
                closed: false,
            },
        );

        Ok(Box::new(MemoryChannelHandle {
            id,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MemoryChannelHandle {
    id: u64,
    state: Arc<Mutex<MemoryState>>,
}

impl ChannelHandle for MemoryChannelHandle {
    fn on(&mut self, binding: ChannelBinding, callback: PayloadCallback) {
        if let Some(channel) = lock(&self.state).channels.get_mut(&self.id) {
            channel.bindings.push((binding, callback));
        }
    }

    fn start(&mut self, status: StatusCallback) {
        let immediate = {
            let mut state = lock(&self.state);
            let auto_ack = state.auto_ack;
            match state.channels.get_mut(&self.id) {
                Some(channel) => {
                    channel.status = Some(Arc::clone(&status));
                    channel.live = auto_ack;
                    auto_ack
                }
                None => false,
            }
        };

        if immediate {
            status(Ok(()));
        }
    }

    fn close(&mut self) -> RealtimeResult<()> {
        let mut state = lock(&self.state);
        let name = match state.channels.get_mut(&self.id) {
            Some(channel) if !channel.closed => {
                channel.closed = true;
                channel.status = None;
                channel.name.clone()
            }
            _ => return Err(RealtimeError::TeardownError(format!("memory channel #{}", self.id))),
        };
        state.closes.push(name);
        Ok(())
    }
}
