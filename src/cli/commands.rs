//! CLI command implementations

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::config::RealtimeConfig;
use crate::observability::{log_event, Event, Logger};
use crate::realtime::{Handler, Identity, RealtimeClient, SubscriptionFactory, WebSocketTransport};

use super::args::{Command, DomainArgs};
use super::errors::{CliError, CliResult};
use super::io::{write_event, write_response};

/// Parse arguments and run the selected command
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Key { target } => key(&target),
        Command::Watch { config, url, target } => watch(&config, url, &target),
    }
}

fn describe(factory: &SubscriptionFactory, target: &DomainArgs) -> CliResult<Value> {
    let domain = target.to_domain()?;
    let spec = factory.resolve(&domain, &Identity::new(target.identity.as_str()))?;

    Ok(json!({
        "key": spec.key,
        "domain": domain.name(),
        "bindings": spec.bindings,
        "predicate": spec.predicate.name(),
    }))
}

/// Resolve a channel key offline with the default table layout
pub fn key(target: &DomainArgs) -> CliResult<()> {
    write_response(describe(&SubscriptionFactory::default(), target)?)
}

/// Connect, subscribe and print events until Ctrl-C
pub fn watch(config_path: &Path, url: Option<String>, target: &DomainArgs) -> CliResult<()> {
    let mut config = RealtimeConfig::load(config_path)?;
    if let Some(url) = url {
        config = config.with_url(url);
    }
    config.validate()?;
    Logger::set_min_severity(config.severity()?);

    let domain = target.to_domain()?;
    let identity = Identity::new(target.identity.as_str());

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::realtime_failed(format!("Failed to create tokio runtime: {}", e)))?;

    rt.block_on(async {
        let transport = WebSocketTransport::connect(&config.websocket).await?;
        let client = RealtimeClient::new(Arc::new(transport.clone()), &config);

        client.sign_in(identity);
        let subscription = client.subscribe(
            domain,
            Handler::fallible(|event| write_event(event).map_err(Into::into)),
        )?;

        log_event(
            Event::WatchStarted,
            &[("channels", &client.active_channel_keys().join(","))],
        );

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| CliError::io_error(format!("Failed to wait for Ctrl-C: {}", e)))?;

        subscription.unsubscribe();
        client.sign_out();
        transport.disconnect();

        let metrics = serde_json::to_string(&client.metrics())?;
        log_event(Event::WatchStopped, &[("metrics", &metrics)]);
        Ok::<(), CliError>(())
    })
}
