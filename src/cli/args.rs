//! CLI argument definitions using clap
//!
//! Commands:
//! - coach-realtime key --domain <d> --identity <id>
//! - coach-realtime watch --config <path> --domain <d> --identity <id>

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use super::errors::{CliError, CliResult};
use crate::realtime::Domain;

/// coach-realtime - Realtime change subscriptions for the coaching platform
#[derive(Parser, Debug)]
#[command(name = "coach-realtime")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the channel key and bindings a subscription resolves to
    Key {
        #[command(flatten)]
        target: DomainArgs,
    },

    /// Subscribe and print every delivered event until Ctrl-C
    Watch {
        /// Path to configuration file
        #[arg(long, default_value = "./coach-realtime.json")]
        config: PathBuf,

        /// Override the WebSocket URL from the config file
        #[arg(long)]
        url: Option<String>,

        #[command(flatten)]
        target: DomainArgs,
    },
}

/// What to subscribe to, and as whom
#[derive(Args, Debug, Clone)]
pub struct DomainArgs {
    /// notifications, sessions, reflections, coach_notes, shared_coach_notes or generic
    #[arg(long)]
    pub domain: String,

    /// Signed-in user id
    #[arg(long)]
    pub identity: String,

    /// Table for the generic domain
    #[arg(long)]
    pub table: Option<String>,

    /// Wire filter for the generic domain, e.g. `goal=eq.42`
    #[arg(long)]
    pub filter: Option<String>,

    /// Key suffix for the generic domain (defaults to the table name)
    #[arg(long)]
    pub suffix: Option<String>,
}

impl DomainArgs {
    pub fn to_domain(&self) -> CliResult<Domain> {
        if self.domain != "generic" {
            return Domain::from_name(&self.domain)
                .ok_or_else(|| CliError::invalid_args(format!("unknown domain '{}'", self.domain)));
        }

        let table = self
            .table
            .as_deref()
            .ok_or_else(|| CliError::invalid_args("--table is required for the generic domain"))?;
        let suffix = self.suffix.as_deref().unwrap_or(table);
        Ok(Domain::generic(table, self.filter.as_deref(), suffix))
    }
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
