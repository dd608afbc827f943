//! Observability events
//!
//! Every observable lifecycle step of the subscription manager is a typed
//! event with a stable log name.

use std::fmt;

use super::logger::Severity;

/// Observable events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Identity
    /// Identity recorded, state is Connected
    IdentitySignedIn,
    /// Identity cleared, state is Disconnected
    IdentitySignedOut,
    /// A different identity replaced the current one
    IdentitySwitched,
    /// Auth stream receiver fell behind and skipped events
    AuthStreamLagged,
    /// Auth stream closed
    AuthStreamClosed,

    // Channels
    /// Transport asked to open a channel
    ChannelOpen,
    /// Transport acknowledged the channel
    ChannelReady,
    /// Channel closed after the last release
    ChannelClose,
    /// Synchronous or asynchronous open failure
    ChannelOpenFailed,
    /// Ready ack arrived for a channel nobody holds anymore
    ChannelOrphanClosed,
    /// Transport dropped a live channel
    ChannelLost,
    /// Every channel force-closed
    TeardownAll,
    /// Release or close of an unknown channel, ignored
    TeardownIgnored,
    /// Transport close reported an error, ignored
    CloseFailed,
    /// Subscribe while Disconnected
    SubscribeDisconnected,

    // Dispatch
    /// Payload did not match the wire contract
    EventMalformed,
    /// Event for a channel that is not registered
    EventUnrouted,
    /// Handler returned an error or panicked
    HandlerFailed,

    // Transport
    /// WebSocket connected
    TransportConnected,
    /// WebSocket disconnected
    TransportDisconnected,
    /// Server message could not be handled
    TransportProtocolError,

    // CLI
    /// `watch` subscribed and is printing events
    WatchStarted,
    /// `watch` released everything and is exiting
    WatchStopped,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            // Identity
            Event::IdentitySignedIn => "IDENTITY_SIGNED_IN",
            Event::IdentitySignedOut => "IDENTITY_SIGNED_OUT",
            Event::IdentitySwitched => "IDENTITY_SWITCHED",
            Event::AuthStreamLagged => "AUTH_STREAM_LAGGED",
            Event::AuthStreamClosed => "AUTH_STREAM_CLOSED",

            // Channels
            Event::ChannelOpen => "CHANNEL_OPEN",
            Event::ChannelReady => "CHANNEL_READY",
            Event::ChannelClose => "CHANNEL_CLOSE",
            Event::ChannelOpenFailed => "CHANNEL_OPEN_FAILED",
            Event::ChannelOrphanClosed => "CHANNEL_ORPHAN_CLOSED",
            Event::ChannelLost => "CHANNEL_LOST",
            Event::TeardownAll => "TEARDOWN_ALL",
            Event::TeardownIgnored => "TEARDOWN_IGNORED",
            Event::CloseFailed => "CHANNEL_CLOSE_FAILED",
            Event::SubscribeDisconnected => "SUBSCRIBE_DISCONNECTED",

            // Dispatch
            Event::EventMalformed => "EVENT_MALFORMED",
            Event::EventUnrouted => "EVENT_UNROUTED",
            Event::HandlerFailed => "HANDLER_FAILED",

            // Transport
            Event::TransportConnected => "TRANSPORT_CONNECTED",
            Event::TransportDisconnected => "TRANSPORT_DISCONNECTED",
            Event::TransportProtocolError => "TRANSPORT_PROTOCOL_ERROR",

            // CLI
            Event::WatchStarted => "WATCH_STARTED",
            Event::WatchStopped => "WATCH_STOPPED",
        }
    }

    /// Severity the event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::ChannelOpenFailed | Event::HandlerFailed => Severity::Error,
            Event::AuthStreamLagged
            | Event::AuthStreamClosed
            | Event::TeardownIgnored
            | Event::CloseFailed
            | Event::ChannelLost
            | Event::EventMalformed
            | Event::TransportDisconnected
            | Event::TransportProtocolError => Severity::Warn,
            Event::SubscribeDisconnected | Event::EventUnrouted | Event::ChannelOrphanClosed => {
                Severity::Trace
            }
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_events_have_string_representation() {
        let events = [
            Event::IdentitySignedIn,
            Event::IdentitySignedOut,
            Event::IdentitySwitched,
            Event::AuthStreamLagged,
            Event::AuthStreamClosed,
            Event::ChannelOpen,
            Event::ChannelReady,
            Event::ChannelClose,
            Event::ChannelOpenFailed,
            Event::ChannelOrphanClosed,
            Event::ChannelLost,
            Event::TeardownAll,
            Event::TeardownIgnored,
            Event::CloseFailed,
            Event::SubscribeDisconnected,
            Event::EventMalformed,
            Event::EventUnrouted,
            Event::HandlerFailed,
            Event::TransportConnected,
            Event::TransportDisconnected,
            Event::TransportProtocolError,
            Event::WatchStarted,
            Event::WatchStopped,
        ];

        for event in events {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert_eq!(s, s.to_uppercase());
            assert_eq!(event.to_string(), s);
        }
    }

    #[test]
    fn test_failure_severities() {
        assert_eq!(Event::HandlerFailed.severity(), Severity::Error);
        assert_eq!(Event::TeardownIgnored.severity(), Severity::Warn);
        assert_eq!(Event::ChannelLost.severity(), Severity::Warn);
        assert_eq!(Event::ChannelOpen.severity(), Severity::Info);
        assert_eq!(Event::WatchStopped.severity(), Severity::Info);
    }
}
