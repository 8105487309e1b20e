//! Delivery through an authenticated upstream relay.

use mailrelay_smtp::connection::{connect, connect_tls};
use mailrelay_smtp::{Client, Connected, StartTlsOutcome};
use std::time::Duration;
use tracing::{debug, warn};

use super::send_transaction;
use crate::config::RelayConfig;
use crate::error::DeliveryError;

/// Sends one message to every target in a single relay transaction.
pub(super) async fn deliver(
    relay: &RelayConfig,
    client_hostname: &str,
    envelope: &str,
    targets: &[String],
    message: &[u8],
    connect_timeout: Duration,
) -> Result<(), DeliveryError> {
    debug!(host = %relay.host, port = relay.port, "Connecting to relay");
    let client = open(relay, client_hostname, connect_timeout).await?;

    let client = if relay.implicit_tls() {
        client
    } else {
        match client.starttls(&relay.host, client_hostname).await {
            StartTlsOutcome::Upgraded(client) => {
                debug!(host = %relay.host, "Relay session upgraded to TLS");
                client
            }
            StartTlsOutcome::Declined(client, None) => client,
            StartTlsOutcome::Declined(client, Some(e)) => {
                warn!(host = %relay.host, "STARTTLS refused, continuing without TLS: {e}");
                client
            }
            StartTlsOutcome::Broken(e) => {
                warn!(host = %relay.host, "STARTTLS failed, reconnecting without TLS: {e}");
                open(relay, client_hostname, connect_timeout).await?
            }
        }
    };

    match relay.credentials() {
        Some((username, password)) => {
            debug!(host = %relay.host, username, "Authenticating to relay");
            let client = client
                .auth_plain(username, password)
                .await
                .map_err(|e| DeliveryError::AuthFailure(e.to_string()))?;
            send_transaction(client, envelope, targets, message).await
        }
        None => send_transaction(client, envelope, targets, message).await,
    }
}

/// Dials the relay and greets it.
async fn open(
    relay: &RelayConfig,
    client_hostname: &str,
    connect_timeout: Duration,
) -> Result<Client<Connected>, DeliveryError> {
    let stream = if relay.implicit_tls() {
        connect_tls(&relay.host, relay.port, connect_timeout).await
    } else {
        connect(&relay.host, relay.port, connect_timeout).await
    }
    .map_err(|e| DeliveryError::DialFailure {
        host: relay.host.clone(),
        port: relay.port,
        reason: e.to_string(),
    })?;

    let client = Client::from_stream(stream)
        .await
        .map_err(|e| DeliveryError::step("greeting", e))?;
    client
        .hello(client_hostname)
        .await
        .map_err(|e| DeliveryError::step("EHLO", e))
}
