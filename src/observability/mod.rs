//! Observability for the subscription manager
//!
//! - Structured logging (JSON lines)
//! - Typed lifecycle events
//! - Atomic counters
//!
//! Observability never changes behavior and never fails an operation.
//!
//! # Usage
//!
//! ```ignore
//! use coach_realtime::observability::{log_event, Event, MetricsRegistry};
//!
//! log_event(Event::ChannelOpen, &[("key", "notifications:u1")]);
//!
//! let metrics = MetricsRegistry::new();
//! metrics.increment_channels_opened();
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};

/// Log a lifecycle event at its own severity
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}
