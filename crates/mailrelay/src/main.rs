//! `mailrelay` - self-hosted mail forwarding relay
//!
//! Accepts SMTP, routes recipients by regular expression, and forwards a
//! plain-text rendition of each message through a relay or directly to the
//! target's MX hosts.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use mailrelay_core::{Config, Database, DeliveryMode, Dispatcher, RelayService};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "mailrelay=info,mailrelay_core=info,mailrelay_smtp=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env().context("invalid configuration")?;
    if let Some(path) = cli.database {
        config.database_path = path;
    }

    let db = Database::connect(&config.database_path)
        .await
        .with_context(|| format!("cannot open database {}", config.database_path))?;

    let mut stdout = std::io::stdout().lock();
    let result = match cli.command {
        Command::Serve => serve(&db, &config).await,
        Command::Rules(command) => commands::rules(&db, command, &mut stdout).await,
        Command::Domains(command) => commands::domains(&db, command, &mut stdout).await,
        Command::Logs(command) => commands::logs(&db, command, &mut stdout).await,
    };

    db.close().await;
    result
}

async fn serve(db: &Database, config: &Config) -> Result<()> {
    let dispatcher = Dispatcher::from_config(config).context("cannot set up delivery")?;
    match dispatcher.mode() {
        DeliveryMode::Relay(relay) => {
            info!(host = %relay.host, port = relay.port, "Forwarding through relay");
        }
        DeliveryMode::Direct(_) => info!("Forwarding directly to MX hosts"),
    }

    let service = RelayService::start(db, Arc::new(dispatcher), config);

    let rules = db.rules().list_active().await?;
    for (rule, diagnostic) in mailrelay_core::invalid_rules(&rules) {
        warn!(rule = %rule.id, pattern = %rule.pattern, "Rule pattern does not compile: {diagnostic}");
    }
    info!(rules = rules.len(), "Loaded forwarding rules");

    let addr = format!("0.0.0.0:{}", config.smtp_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot listen on {addr}"))?;

    tokio::select! {
        () = service.serve(listener) => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("cannot wait for shutdown signal")?;
            info!("Shutdown requested");
        }
    }

    service.shutdown().await;
    info!("Stopped");
    Ok(())
}
