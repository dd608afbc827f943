//! # WebSocket Transport
//!
//! A `Transport` that multiplexes every channel over one WebSocket.
//!
//! Each binding of a channel is subscribed separately under its own ref
//! (`<handle id>.<binding index>`); the channel is ready once every ref is
//! acknowledged. Writes go through an unbounded command queue drained by a
//! writer task, so `open_channel`, `start` and `close` never block.
//!
//! A started channel keeps its status callback until it is closed. When the
//! socket drops, every registered channel is reported through it, pending
//! and live alike.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
};
use uuid::Uuid;

use super::errors::{RealtimeError, RealtimeResult};
use super::factory::ChannelKey;
use super::transport::{lock, ChannelBinding, ChannelHandle, PayloadCallback, StatusCallback, Transport};
use crate::config::WebSocketConfig;
use crate::observability::{log_event, Event};

/// WebSocket message to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Subscribe one binding of a channel
    Subscribe {
        channel: String,
        #[serde(rename = "ref")]
        ref_id: String,
        schema: String,
        table: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<String>,
    },

    /// Drop every binding of a channel
    Unsubscribe { channel: String },

    /// Keepalive
    Heartbeat,
}

/// WebSocket message from the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Binding acknowledged
    Subscribed {
        channel: String,
        #[serde(rename = "ref")]
        ref_id: String,
    },

    /// Binding rejected, or a connection-level error when `ref` is absent
    Error {
        #[serde(default)]
        channel: Option<String>,
        #[serde(default, rename = "ref")]
        ref_id: Option<String>,
        message: String,
    },

    /// Change payload for one binding
    Event {
        channel: String,
        #[serde(rename = "ref")]
        ref_id: String,
        payload: Value,
    },

    /// Heartbeat reply
    Heartbeat {
        #[serde(default)]
        server_time: Option<i64>,
    },
}

enum Command {
    Send(ClientMessage),
    Shutdown,
}

struct WsChannel {
    name: String,
    callbacks: Vec<PayloadCallback>,
    unacked: usize,
    live: bool,
    status: StatusCallback,
}

struct Shared {
    connection_id: String,
    commands: mpsc::UnboundedSender<Command>,
    connected: AtomicBool,
    next_handle: AtomicU64,
    channels: Mutex<HashMap<u64, WsChannel>>,
}

fn parse_ref(ref_id: &str) -> Option<(u64, usize)> {
    let (handle, index) = ref_id.split_once('.')?;
    Some((handle.parse().ok()?, index.parse().ok()?))
}

impl Shared {
    fn new(commands: mpsc::UnboundedSender<Command>) -> Self {
        Self {
            connection_id: Uuid::new_v4().to_string(),
            commands,
            connected: AtomicBool::new(true),
            next_handle: AtomicU64::new(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn send(&self, message: ClientMessage) -> RealtimeResult<()> {
        self.commands
            .send(Command::Send(message))
            .map_err(|_| RealtimeError::ConnectionClosed)
    }

    fn protocol_error(&self, message: &str) {
        log_event(
            Event::TransportProtocolError,
            &[("connection", &self.connection_id), ("error", message)],
        );
    }

    fn handle_text(&self, text: &str) {
        match serde_json::from_str::<ServerMessage>(text) {
            Ok(message) => self.handle_message(message),
            Err(e) => self.protocol_error(&format!("invalid server message: {}", e)),
        }
    }

    /// Route one server message. Callbacks run after the lock is released.
    fn handle_message(&self, message: ServerMessage) {
        match message {
            ServerMessage::Subscribed { channel, ref_id } => {
                let Some((id, _)) = parse_ref(&ref_id) else {
                    return self.protocol_error(&format!("bad ref {:?} on {}", ref_id, channel));
                };

                let ready = {
                    let mut channels = lock(&self.channels);
                    let Some(entry) = channels.get_mut(&id) else {
                        return;
                    };
                    entry.unacked = entry.unacked.saturating_sub(1);
                    if entry.unacked == 0 && !entry.live {
                        entry.live = true;
                        Some(Arc::clone(&entry.status))
                    } else {
                        None
                    }
                };

                if let Some(status) = ready {
                    status(Ok(()));
                }
            }

            ServerMessage::Error {
                channel,
                ref_id: Some(ref_id),
                message,
            } => {
                let Some((id, _)) = parse_ref(&ref_id) else {
                    return self.protocol_error(&message);
                };

                // Pending: handshake failed. Live: channel lost.
                let removed = lock(&self.channels).remove(&id);
                match removed {
                    Some(entry) => (entry.status)(Err(RealtimeError::ConnectionError(message))),
                    None => log_event(
                        Event::TransportProtocolError,
                        &[
                            ("connection", &self.connection_id),
                            ("channel", channel.as_deref().unwrap_or("")),
                            ("error", &message),
                        ],
                    ),
                }
            }

            ServerMessage::Error { message, .. } => self.protocol_error(&message),

            ServerMessage::Event {
                channel,
                ref_id,
                payload,
            } => {
                let callback = parse_ref(&ref_id).and_then(|(id, index)| {
                    lock(&self.channels)
                        .get(&id)
                        .and_then(|entry| entry.callbacks.get(index).cloned())
                });

                match callback {
                    Some(callback) => callback(payload),
                    None => log_event(Event::EventUnrouted, &[("key", &channel), ("ref", &ref_id)]),
                }
            }

            ServerMessage::Heartbeat { .. } => {}
        }
    }

    /// Socket is gone: report every registered channel and refuse new opens
    fn mark_disconnected(&self, reason: &str) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }

        let dropped: Vec<WsChannel> = lock(&self.channels).drain().map(|(_, entry)| entry).collect();
        let live = dropped.iter().filter(|entry| entry.live).count();

        log_event(
            Event::TransportDisconnected,
            &[
                ("connection", &self.connection_id),
                ("reason", reason),
                ("pending", &(dropped.len() - live).to_string()),
                ("live", &live.to_string()),
            ],
        );

        for entry in dropped {
            (entry.status)(Err(RealtimeError::ConnectionClosed));
        }
    }
}

/// Change-notification transport over a single WebSocket connection
#[derive(Clone)]
pub struct WebSocketTransport {
    shared: Arc<Shared>,
}

impl WebSocketTransport {
    /// Connect and spawn the reader and writer tasks. Must be called from
    /// within a tokio runtime.
    pub async fn connect(config: &WebSocketConfig) -> RealtimeResult<Self> {
        let timeout = Duration::from_secs(config.connect_timeout_secs);
        let (stream, _) = tokio::time::timeout(timeout, connect_async(config.url.as_str()))
            .await
            .map_err(|_| RealtimeError::ConnectionTimeout)?
            .map_err(|e| RealtimeError::ConnectionError(format!("websocket handshake failed: {}", e)))?;

        let (sink, source) = stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new(tx));

        log_event(
            Event::TransportConnected,
            &[("connection", &shared.connection_id), ("url", &config.url)],
        );

        let heartbeat = Duration::from_secs(config.heartbeat_interval_secs.max(1));
        tokio::spawn(write_loop(sink, rx, Arc::clone(&shared), heartbeat));
        tokio::spawn(read_loop(source, Arc::clone(&shared)));

        Ok(Self { shared })
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Close the socket; every open channel reports `ConnectionClosed`
    pub fn disconnect(&self) {
        let _ = self.shared.commands.send(Command::Shutdown);
        self.shared.mark_disconnected("client shutdown");
    }
}

impl Transport for WebSocketTransport {
    fn open_channel(&self, name: &ChannelKey) -> RealtimeResult<Box<dyn ChannelHandle>> {
        if !self.is_connected() {
            return Err(RealtimeError::ConnectionError(format!(
                "cannot open {}: websocket is not connected",
                name
            )));
        }

        Ok(Box::new(WsChannelHandle {
            id: self.shared.next_handle.fetch_add(1, Ordering::Relaxed),
            name: name.to_string(),
            bindings: Vec::new(),
            started: false,
            closed: false,
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct WsChannelHandle {
    id: u64,
    name: String,
    bindings: Vec<(ChannelBinding, PayloadCallback)>,
    started: bool,
    closed: bool,
    shared: Arc<Shared>,
}

impl ChannelHandle for WsChannelHandle {
    fn on(&mut self, binding: ChannelBinding, callback: PayloadCallback) {
        if !self.started {
            self.bindings.push((binding, callback));
        }
    }

    fn start(&mut self, status: StatusCallback) {
        if self.started || self.closed {
            return;
        }
        self.started = true;

        let (bindings, callbacks): (Vec<_>, Vec<_>) = std::mem::take(&mut self.bindings).into_iter().unzip();
        lock(&self.shared.channels).insert(
            self.id,
            WsChannel {
                name: self.name.clone(),
                callbacks,
                unacked: bindings.len(),
                live: bindings.is_empty(),
                status: Arc::clone(&status),
            },
        );

        if bindings.is_empty() {
            status(Ok(()));
            return;
        }

        for (index, binding) in bindings.into_iter().enumerate() {
            let message = ClientMessage::Subscribe {
                channel: self.name.clone(),
                ref_id: format!("{}.{}", self.id, index),
                schema: binding.schema,
                table: binding.table,
                filter: binding.filter.map(|f| f.to_string()),
            };

            if let Err(e) = self.shared.send(message) {
                let removed = lock(&self.shared.channels).remove(&self.id);
                if let Some(entry) = removed {
                    (entry.status)(Err(e));
                }
                return;
            }
        }
    }

    fn close(&mut self) -> RealtimeResult<()> {
        if self.closed {
            return Err(RealtimeError::TeardownError(format!("{} already closed", self.name)));
        }
        self.closed = true;

        let removed = lock(&self.shared.channels).remove(&self.id);
        if let Some(entry) = removed.filter(|entry| !entry.callbacks.is_empty()) {
            // A dead socket already dropped the server side
            let _ = self.shared.send(ClientMessage::Unsubscribe { channel: entry.name });
        }
        Ok(())
    }
}

async fn write_loop<S>(
    mut sink: S,
    mut commands: mpsc::UnboundedReceiver<Command>,
    shared: Arc<Shared>,
    heartbeat: Duration,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);

    loop {
        let message = tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(message)) => message,
                Some(Command::Shutdown) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            _ = ticker.tick() => ClientMessage::Heartbeat,
        };

        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                shared.protocol_error(&format!("failed to serialize message: {}", e));
                continue;
            }
        };

        if let Err(e) = sink.send(Message::Text(text)).await {
            shared.mark_disconnected(&format!("send failed: {}", e));
            break;
        }
    }
}

async fn read_loop<S>(mut source: S, shared: Arc<Shared>)
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let reason = loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => shared.handle_text(&text),
            Some(Ok(Message::Binary(_))) => shared.protocol_error("binary messages not supported"),
            Some(Ok(Message::Close(_))) | None => break "closed by server".to_string(),
            Some(Ok(_)) => {}
            Some(Err(e)) => break format!("receive error: {}", e),
        }
    };

    shared.mark_disconnected(&reason);
}
