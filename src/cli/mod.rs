//! CLI module for coach-realtime
//!
//! Provides command-line interface for:
//! - key: Resolve a channel key and its wire bindings offline
//! - watch: Subscribe over WebSocket and print delivered events

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command, DomainArgs};
pub use commands::{key, run, run_command, watch};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{write_event, write_response};
