//! Forwarding dispatcher.
//!
//! A [`Dispatcher`] turns a [`ForwardRequest`] into one or more outbound
//! SMTP transactions, either through a configured relay or straight to each
//! target's mail exchangers.

mod direct;
mod message;
mod relay;

pub use direct::{DnsResolver, MxRecord, MxResolver, order_exchanges};
pub use message::{DIRECT_SUBJECT_LIMIT, OutgoingMessage, RELAY_SUBJECT_LIMIT, forward_subject};

use async_trait::async_trait;
use mailrelay_smtp::{Address, Client, Ready};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{Config, RelayConfig};
use crate::error::DeliveryError;
use direct::DirectRoute;

/// Default SMTP port of mail exchangers.
pub const MX_PORT: u16 = 25;

/// Connect timeout for the relay.
pub const RELAY_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect timeout per mail exchanger.
pub const MX_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// What to forward and to whom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRequest {
    /// Envelope sender of the received message.
    pub original_from: String,
    /// Decoded subject of the received message.
    pub subject: String,
    /// Extracted plain text body.
    pub body: String,
    /// Forward targets, in rule order.
    pub targets: Vec<String>,
}

/// Anything that can carry out a [`ForwardRequest`].
#[async_trait]
pub trait Deliver: Send + Sync {
    /// Forwards the message to every target.
    ///
    /// # Errors
    ///
    /// Returns the delivery failure to record.
    async fn deliver(&self, request: &ForwardRequest) -> Result<(), DeliveryError>;
}

/// How messages leave the process.
#[derive(Clone)]
pub enum DeliveryMode {
    /// Through an upstream relay.
    Relay(RelayConfig),
    /// Directly to each target's MX hosts.
    Direct(Arc<dyn MxResolver>),
}

impl std::fmt::Debug for DeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Relay(relay) => f.debug_tuple("Relay").field(&relay.host).finish(),
            Self::Direct(_) => f.write_str("Direct"),
        }
    }
}

/// Sends forward requests according to a [`DeliveryMode`].
#[derive(Debug, Clone)]
pub struct Dispatcher {
    mode: DeliveryMode,
    default_envelope: String,
    hostname: String,
    mx_port: u16,
    relay_connect_timeout: Duration,
    mx_connect_timeout: Duration,
}

impl Dispatcher {
    /// Creates a dispatcher.
    ///
    /// `hostname` is announced in EHLO; `default_envelope` is the sender
    /// when the relay has no username and the `From` of direct deliveries.
    #[must_use]
    pub fn new(
        mode: DeliveryMode,
        default_envelope: impl Into<String>,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            mode,
            default_envelope: default_envelope.into(),
            hostname: hostname.into(),
            mx_port: MX_PORT,
            relay_connect_timeout: RELAY_CONNECT_TIMEOUT,
            mx_connect_timeout: MX_CONNECT_TIMEOUT,
        }
    }

    /// Builds the dispatcher described by `config`, reading the system DNS
    /// settings in direct mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the resolver cannot be configured.
    pub fn from_config(config: &Config) -> crate::Result<Self> {
        let mode = match &config.relay {
            Some(relay) => DeliveryMode::Relay(relay.clone()),
            None => DeliveryMode::Direct(Arc::new(DnsResolver::from_system_conf()?)),
        };
        Ok(Self::new(
            mode,
            config.default_envelope.clone(),
            config.smtp_domain.clone(),
        ))
    }

    /// Overrides the port dialed on mail exchangers.
    #[must_use]
    pub const fn with_mx_port(mut self, port: u16) -> Self {
        self.mx_port = port;
        self
    }

    /// Overrides the relay and MX connect timeouts.
    #[must_use]
    pub const fn with_timeouts(mut self, relay: Duration, mx: Duration) -> Self {
        self.relay_connect_timeout = relay;
        self.mx_connect_timeout = mx;
        self
    }

    /// The active delivery mode.
    #[must_use]
    pub const fn mode(&self) -> &DeliveryMode {
        &self.mode
    }

    /// Forwards `request` to all of its targets.
    ///
    /// # Errors
    ///
    /// Returns the failure to record. In direct mode targets are attempted
    /// independently; a single failing target is returned as-is and several
    /// are collected into [`DeliveryError::Multiple`].
    pub async fn forward(&self, request: &ForwardRequest) -> Result<(), DeliveryError> {
        if request.targets.is_empty() {
            return Err(DeliveryError::InvalidTarget("no forward targets".into()));
        }
        if let Some(bad) = request.targets.iter().find(|t| !is_mailbox(t)) {
            return Err(DeliveryError::InvalidTarget(bad.clone()));
        }

        match &self.mode {
            DeliveryMode::Relay(relay) => self.forward_relay(relay, request).await,
            DeliveryMode::Direct(resolver) => self.forward_direct(resolver.as_ref(), request).await,
        }
    }

    async fn forward_relay(
        &self,
        relay: &RelayConfig,
        request: &ForwardRequest,
    ) -> Result<(), DeliveryError> {
        let envelope = relay
            .username
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(&self.default_envelope);

        let subject = forward_subject(&request.original_from, &request.subject, RELAY_SUBJECT_LIMIT);
        let message = request
            .targets
            .iter()
            .fold(OutgoingMessage::new(envelope, subject, request.body.as_str()), |m, t| {
                m.to(t.as_str())
            })
            .original(request.original_from.as_str(), request.subject.as_str())
            .eight_bit(true)
            .to_rfc5322();

        relay::deliver(
            relay,
            &self.hostname,
            envelope,
            &request.targets,
            message.as_bytes(),
            self.relay_connect_timeout,
        )
        .await?;

        info!(host = %relay.host, targets = request.targets.len(), "Forwarded via relay");
        Ok(())
    }

    async fn forward_direct(
        &self,
        resolver: &dyn MxResolver,
        request: &ForwardRequest,
    ) -> Result<(), DeliveryError> {
        let route = DirectRoute {
            resolver,
            client_hostname: &self.hostname,
            envelope: &self.default_envelope,
            port: self.mx_port,
            connect_timeout: self.mx_connect_timeout,
        };
        let subject =
            forward_subject(&request.original_from, &request.subject, DIRECT_SUBJECT_LIMIT);

        let mut failures = Vec::new();
        for target in &request.targets {
            let message = OutgoingMessage::new(
                self.default_envelope.as_str(),
                subject.as_str(),
                request.body.as_str(),
            )
            .to(target.as_str())
            .original(request.original_from.as_str(), request.subject.as_str())
            .to_rfc5322();

            match route.deliver(target, message.as_bytes()).await {
                Ok(()) => info!(target = %target, "Forwarded directly"),
                Err(e) => {
                    warn!(target = %target, "Direct forward failed: {e}");
                    failures.push((target.clone(), e));
                }
            }
        }

        match failures.len() {
            0 => Ok(()),
            1 => Err(failures.remove(0).1),
            _ => Err(DeliveryError::Multiple(failures)),
        }
    }
}

#[async_trait]
impl Deliver for Dispatcher {
    async fn deliver(&self, request: &ForwardRequest) -> Result<(), DeliveryError> {
        self.forward(request).await
    }
}

/// `local@domain` with exactly one `@` and both sides non-empty.
pub(crate) fn is_mailbox(address: &str) -> bool {
    let mut parts = address.split('@');
    matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(local), Some(domain), None) if !local.is_empty() && !domain.is_empty()
    )
}

/// Runs MAIL, RCPT for each target, DATA and QUIT on a ready client.
///
/// A failed QUIT after the message was accepted is only logged.
pub(crate) async fn send_transaction<S: Ready>(
    client: Client<S>,
    envelope: &str,
    targets: &[String],
    message: &[u8],
) -> Result<(), DeliveryError> {
    let (first, rest) = targets
        .split_first()
        .ok_or_else(|| DeliveryError::InvalidTarget("no forward targets".into()))?;

    let sender = Address::new(envelope).map_err(|e| DeliveryError::step("MAIL FROM", e))?;
    let client = client
        .mail_from(sender)
        .await
        .map_err(|e| DeliveryError::step("MAIL FROM", e))?;

    let mut client = client
        .rcpt_to(target_address(first)?)
        .await
        .map_err(|e| DeliveryError::step("RCPT TO", e))?;
    for target in rest {
        client = client
            .rcpt_to(target_address(target)?)
            .await
            .map_err(|e| DeliveryError::step("RCPT TO", e))?;
    }

    let client = client
        .data()
        .await
        .map_err(|e| DeliveryError::step("DATA", e))?
        .send_message(message)
        .await
        .map_err(|e| DeliveryError::step("DATA", e))?;
    debug!(recipients = targets.len(), "Message accepted by remote server");

    if let Err(e) = client.quit().await {
        warn!("QUIT failed after message was accepted: {e}");
    }
    Ok(())
}

fn target_address(target: &str) -> Result<Address, DeliveryError> {
    Address::new(target).map_err(|_| DeliveryError::InvalidTarget(target.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_is_mailbox() {
        assert!(is_mailbox("a@b.c"));
        assert!(!is_mailbox("a@b@c"));
        assert!(!is_mailbox("plain"));
        assert!(!is_mailbox("@b.c"));
        assert!(!is_mailbox("a@"));
    }

    #[tokio::test]
    async fn test_forward_rejects_bad_target_before_dialing() {
        let dispatcher = Dispatcher::new(
            DeliveryMode::Relay(RelayConfig::new("127.0.0.1", 1)),
            "postmaster@localhost",
            "localhost",
        );
        let request = ForwardRequest {
            original_from: "a@b.c".into(),
            subject: "Hi".into(),
            body: String::new(),
            targets: vec!["ok@example.com".into(), "broken".into()],
        };
        let err = dispatcher.forward(&request).await.unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidTarget(ref t) if t == "broken"));
    }
}
