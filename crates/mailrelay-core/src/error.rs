//! Error types for the core library.

use mailrelay_smtp::ReplyCode;
use mailrelay_smtp::server::Rejection;
use thiserror::Error;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A rule pattern does not compile.
    #[error("Invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Compiler diagnostic.
        source: regex::Error,
    },

    /// A field value was rejected.
    #[error("Invalid value: {0}")]
    Validation(String),

    /// A record does not exist (or was deleted).
    #[error("Not found: {0}")]
    NotFound(String),

    /// A record with the same unique key already exists.
    #[error("Already exists: {0}")]
    Duplicate(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Refusals raised while a client builds a transaction.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The recipient is not of the form `local@domain`.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// No rule matches the recipient.
    #[error("no relay allowed for {0}")]
    NoRelay(String),

    /// DATA without a bound recipient.
    #[error("no recipient")]
    NoRecipient,

    /// A recipient is already bound in this transaction.
    #[error("too many recipients")]
    TooManyRecipients,

    /// The dispatch queue has no room; the client should retry later.
    #[error("dispatch queue is full")]
    QueueFull,

    /// Store or other local failure.
    #[error("local error: {0}")]
    Internal(String),
}

impl SessionError {
    /// SMTP reply sent to the client for this refusal.
    #[must_use]
    pub fn to_rejection(&self) -> Rejection {
        match self {
            Self::InvalidAddress(_) => {
                Rejection::new(ReplyCode::PARAMETER_ERROR, "5.1.3 Invalid address")
            }
            Self::NoRelay(_) => {
                Rejection::new(ReplyCode::MAILBOX_UNAVAILABLE, "5.7.1 Relay access denied")
            }
            Self::NoRecipient => Rejection::new(ReplyCode::BAD_SEQUENCE, "5.5.1 No recipient"),
            Self::TooManyRecipients => Rejection::new(
                ReplyCode::INSUFFICIENT_STORAGE,
                "4.5.3 Too many recipients",
            ),
            Self::QueueFull => Rejection::new(
                ReplyCode::LOCAL_ERROR,
                "4.3.2 System busy, try again later",
            ),
            Self::Internal(_) => Rejection::new(
                ReplyCode::LOCAL_ERROR,
                "4.3.0 Local error in processing",
            ),
        }
    }
}

impl From<SessionError> for Rejection {
    fn from(err: SessionError) -> Self {
        err.to_rejection()
    }
}

/// Why a forwarding attempt failed. Recorded in the log row only.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// MX resolution failed or returned no records.
    #[error("mx lookup failed for {domain}: {reason}")]
    MxLookupFailure {
        /// Queried domain.
        domain: String,
        /// Resolver diagnostic.
        reason: String,
    },

    /// Every exchange was tried and none accepted the message.
    #[error("all mx servers failed, last error: {last}")]
    AllMxFailed {
        /// Failure from the last exchange tried.
        last: Box<DeliveryError>,
    },

    /// TCP connect (or implicit TLS handshake) failed.
    #[error("dial {host}:{port} failed: {reason}")]
    DialFailure {
        /// Remote host.
        host: String,
        /// Remote port.
        port: u16,
        /// Connect diagnostic.
        reason: String,
    },

    /// The relay rejected the credentials.
    #[error("auth failed: {0}")]
    AuthFailure(String),

    /// A greeting, MAIL, RCPT, DATA, or QUIT step failed.
    #[error("{step} failed: {reason}")]
    ProtocolStepFailure {
        /// SMTP step name.
        step: &'static str,
        /// Server reply or transport error.
        reason: String,
    },

    /// A forward target is not a usable address.
    #[error("invalid target address: {0}")]
    InvalidTarget(String),

    /// The job could not be queued.
    #[error("dispatch queue is full")]
    QueueFull,

    /// The delivery task ended without a result.
    #[error("delivery aborted: {0}")]
    Aborted(String),

    /// Several targets failed independently.
    #[error("{}", join_failures(.0))]
    Multiple(Vec<(String, DeliveryError)>),
}

fn join_failures(failures: &[(String, DeliveryError)]) -> String {
    failures
        .iter()
        .map(|(target, err)| format!("{target}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl DeliveryError {
    pub(crate) fn step(step: &'static str, err: impl std::fmt::Display) -> Self {
        Self::ProtocolStepFailure {
            step,
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_replies() {
        let cases = [
            (SessionError::InvalidAddress("x".into()), 501, "5.1.3"),
            (SessionError::NoRelay("a@b".into()), 550, "5.7.1"),
            (SessionError::NoRecipient, 503, "5.5.1"),
            (SessionError::TooManyRecipients, 452, "4.5.3"),
            (SessionError::QueueFull, 451, "4.3.2"),
            (SessionError::Internal("db".into()), 451, "4.3.0"),
        ];
        for (err, code, status) in cases {
            let rejection = err.to_rejection();
            assert_eq!(rejection.code.as_u16(), code);
            assert!(rejection.message.starts_with(status));
        }
    }

    #[test]
    fn test_delivery_error_messages() {
        let err = DeliveryError::AllMxFailed {
            last: Box::new(DeliveryError::DialFailure {
                host: "mx2.example.com".into(),
                port: 25,
                reason: "connection refused".into(),
            }),
        };
        assert_eq!(
            err.to_string(),
            "all mx servers failed, last error: dial mx2.example.com:25 failed: connection refused"
        );

        let err = DeliveryError::Multiple(vec![
            ("a@x.com".into(), DeliveryError::InvalidTarget("a@x.com".into())),
            ("b@y.com".into(), DeliveryError::QueueFull),
        ]);
        assert_eq!(
            err.to_string(),
            "a@x.com: invalid target address: a@x.com; b@y.com: dispatch queue is full"
        );
    }
}
