//! coach-realtime - Realtime change subscriptions for the coaching platform
//!
//! Subscribes UI consumers to per-user change streams, shares one transport
//! channel per stream and tears everything down when the identity changes.

pub mod cli;
pub mod config;
pub mod observability;
pub mod realtime;
