//! SMTP session backend: routing at RCPT, extraction and hand-off at DATA.

use async_trait::async_trait;
use mailrelay_smtp::server::{Backend, Rejection, Session};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::dispatch::{ForwardRequest, is_mailbox};
use crate::error::{DeliveryError, SessionError};
use crate::queue::{DispatchJob, DispatchQueue};
use crate::recorder::Recorder;
use crate::router::Router;
use crate::store::{NewLogEntry, Rule};

/// Shared state behind every connection.
#[derive(Clone)]
pub struct RelayBackend {
    router: Arc<Router>,
    recorder: Recorder,
    queue: DispatchQueue,
}

impl RelayBackend {
    /// Creates a backend.
    #[must_use]
    pub const fn new(router: Arc<Router>, recorder: Recorder, queue: DispatchQueue) -> Self {
        Self {
            router,
            recorder,
            queue,
        }
    }
}

#[async_trait]
impl Backend for RelayBackend {
    type Session = RelaySession;

    async fn new_session(&self, peer: Option<SocketAddr>) -> RelaySession {
        RelaySession {
            backend: self.clone(),
            client_ip: peer.map(|p| p.ip().to_string()).unwrap_or_default(),
            from: String::new(),
            bound: None,
        }
    }
}

/// Per-connection transaction state.
pub struct RelaySession {
    backend: RelayBackend,
    client_ip: String,
    from: String,
    bound: Option<(String, Rule)>,
}

impl RelaySession {
    /// The recipient and rule bound in the current transaction.
    #[must_use]
    pub fn bound(&self) -> Option<(&str, &Rule)> {
        self.bound.as_ref().map(|(to, rule)| (to.as_str(), rule))
    }

    async fn bind(&mut self, to: &str) -> Result<(), SessionError> {
        if !is_mailbox(to) {
            return Err(SessionError::InvalidAddress(to.to_string()));
        }
        if self.bound.is_some() {
            return Err(SessionError::TooManyRecipients);
        }

        let rule = self
            .backend
            .router
            .route(to)
            .await
            .map_err(|e| {
                error!(recipient = to, "Failed to load rules: {e}");
                SessionError::Internal(e.to_string())
            })?
            .ok_or_else(|| SessionError::NoRelay(to.to_string()))?;

        debug!(recipient = to, rule = %rule.id, "Recipient bound");
        self.bound = Some((to.to_string(), rule));
        Ok(())
    }

    async fn accept(&mut self, message: &[u8]) -> Result<(), SessionError> {
        let (to, rule) = self.bound.clone().ok_or(SessionError::NoRecipient)?;
        let backend = &self.backend;

        if backend.queue.is_full() {
            warn!(recipient = %to, "Dispatch queue full, deferring message");
            return Err(SessionError::QueueFull);
        }

        let extracted = mailrelay_mime::extract(message);
        if extracted.subject.degraded || extracted.body.degraded {
            debug!(recipient = %to, "Message content decoded on a best-effort basis");
        }
        let subject = extracted.subject.text;
        let body = extracted.body.text;

        let log_id = backend
            .recorder
            .begin(NewLogEntry {
                from: self.from.clone(),
                to: to.clone(),
                subject: subject.clone(),
                content: body.clone(),
                client_ip: self.client_ip.clone(),
            })
            .await
            .map_err(|e| {
                error!(recipient = %to, "Failed to write log row: {e}");
                SessionError::Internal(e.to_string())
            })?;

        let job = DispatchJob {
            log_id,
            rule_id: rule.id,
            request: ForwardRequest {
                original_from: self.from.clone(),
                subject,
                body,
                targets: rule.targets(),
            },
        };

        if let Err(job) = backend.queue.try_enqueue(job) {
            warn!(log = %job.log_id, "Dispatch queue filled after logging, marking failed");
            let outcome = Err(DeliveryError::QueueFull);
            if let Err(e) = backend.recorder.complete(job.log_id, job.rule_id, &outcome).await {
                error!(log = %job.log_id, "Failed to record queue overflow: {e}");
            }
            return Ok(());
        }

        info!(log = %log_id, rule = %rule.id, recipient = %to, "Message queued for forwarding");
        Ok(())
    }
}

#[async_trait]
impl Session for RelaySession {
    async fn mail(&mut self, from: &str) -> Result<(), Rejection> {
        self.from = from.to_string();
        Ok(())
    }

    async fn rcpt(&mut self, to: &str) -> Result<(), Rejection> {
        self.bind(to).await.map_err(|e| {
            debug!(recipient = to, "RCPT refused: {e}");
            e.into()
        })
    }

    async fn data(&mut self, message: Vec<u8>) -> Result<(), Rejection> {
        self.accept(&message).await.map_err(Rejection::from)
    }

    fn reset(&mut self) {
        self.from.clear();
        self.bound = None;
    }
}
