//! Delivery straight to the target domain's mail exchangers.

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use mailrelay_smtp::Client;
use mailrelay_smtp::connection::connect;
use std::time::Duration;
use tracing::{debug, warn};

use super::send_transaction;
use crate::error::DeliveryError;
use crate::{Error, Result};

/// One MX record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MxRecord {
    /// Lower is tried first.
    pub preference: u16,
    /// Exchange hostname without the trailing dot.
    pub exchange: String,
}

impl MxRecord {
    /// Creates a record.
    #[must_use]
    pub fn new(preference: u16, exchange: impl Into<String>) -> Self {
        Self {
            preference,
            exchange: exchange.into(),
        }
    }
}

/// MX lookups.
#[async_trait]
pub trait MxResolver: Send + Sync {
    /// Returns the MX records of `domain` in any order.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::MxLookupFailure`] when the lookup fails.
    async fn lookup_mx(&self, domain: &str) -> std::result::Result<Vec<MxRecord>, DeliveryError>;
}

/// Resolver backed by the system DNS configuration.
pub struct DnsResolver {
    resolver: TokioAsyncResolver,
}

impl DnsResolver {
    /// Reads `/etc/resolv.conf` (or the platform equivalent).
    ///
    /// # Errors
    ///
    /// Returns an error if the system configuration cannot be read.
    pub fn from_system_conf() -> Result<Self> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| Error::Config(format!("DNS resolver: {e}")))?;
        Ok(Self { resolver })
    }
}

#[async_trait]
impl MxResolver for DnsResolver {
    async fn lookup_mx(&self, domain: &str) -> std::result::Result<Vec<MxRecord>, DeliveryError> {
        let response =
            self.resolver
                .mx_lookup(domain)
                .await
                .map_err(|e| DeliveryError::MxLookupFailure {
                    domain: domain.to_string(),
                    reason: e.to_string(),
                })?;

        Ok(response
            .iter()
            .map(|mx| {
                MxRecord::new(
                    mx.preference(),
                    mx.exchange().to_string().trim_end_matches('.'),
                )
            })
            .collect())
    }
}

/// Sorts records by preference, keeping resolver order among equals.
#[must_use]
pub fn order_exchanges(mut records: Vec<MxRecord>) -> Vec<MxRecord> {
    records.sort_by_key(|mx| mx.preference);
    records
}

/// Settings shared by every direct delivery.
pub(super) struct DirectRoute<'a> {
    pub resolver: &'a dyn MxResolver,
    pub client_hostname: &'a str,
    pub envelope: &'a str,
    pub port: u16,
    pub connect_timeout: Duration,
}

impl DirectRoute<'_> {
    /// Delivers to one target, trying its exchanges in preference order
    /// until one accepts.
    pub(super) async fn deliver(
        &self,
        target: &str,
        message: &[u8],
    ) -> std::result::Result<(), DeliveryError> {
        let domain = target
            .split_once('@')
            .map(|(_, domain)| domain)
            .filter(|domain| !domain.is_empty())
            .ok_or_else(|| DeliveryError::InvalidTarget(target.to_string()))?;

        let records = self.resolver.lookup_mx(domain).await?;
        if records.is_empty() {
            return Err(DeliveryError::MxLookupFailure {
                domain: domain.to_string(),
                reason: "no mx records found".to_string(),
            });
        }

        let mut last = None;
        for mx in order_exchanges(records) {
            debug!(exchange = %mx.exchange, preference = mx.preference, target, "Attempting direct delivery");
            match self.try_exchange(&mx.exchange, target, message).await {
                Ok(()) => {
                    debug!(exchange = %mx.exchange, target, "Direct delivery accepted");
                    return Ok(());
                }
                Err(e) => {
                    warn!(exchange = %mx.exchange, target, "Direct delivery failed: {e}");
                    last = Some(e);
                }
            }
        }

        Err(DeliveryError::AllMxFailed {
            last: Box::new(last.unwrap_or_else(|| DeliveryError::Aborted("no exchange tried".into()))),
        })
    }

    async fn try_exchange(
        &self,
        exchange: &str,
        target: &str,
        message: &[u8],
    ) -> std::result::Result<(), DeliveryError> {
        let stream = connect(exchange, self.port, self.connect_timeout)
            .await
            .map_err(|e| DeliveryError::DialFailure {
                host: exchange.to_string(),
                port: self.port,
                reason: e.to_string(),
            })?;

        let client = Client::from_stream(stream)
            .await
            .map_err(|e| DeliveryError::step("greeting", e))?
            .hello(self.client_hostname)
            .await
            .map_err(|e| DeliveryError::step("EHLO", e))?;

        send_transaction(client, self.envelope, &[target.to_string()], message).await
    }
}
