//! Backend traits the server driver calls into.

use crate::types::{Reply, ReplyCode};
use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;

/// A refusal returned by a session hook, sent to the client as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Reply code.
    pub code: ReplyCode,
    /// Reply text, usually starting with an enhanced status code.
    pub message: String,
}

impl Rejection {
    /// Creates a rejection.
    #[must_use]
    pub fn new(code: ReplyCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Converts the rejection into a wire reply.
    #[must_use]
    pub fn to_reply(&self) -> Reply {
        Reply::single(self.code, self.message.clone())
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message)
    }
}

/// Creates one [`Session`] per accepted connection.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Per-connection session type.
    type Session: Session;

    /// Called once the connection is accepted, before the greeting.
    async fn new_session(&self, peer: Option<SocketAddr>) -> Self::Session;
}

/// Per-connection transaction hooks.
#[async_trait]
pub trait Session: Send {
    /// AUTH PLAIN credentials. Accepts everything unless overridden.
    async fn auth_plain(&mut self, _username: &str, _password: &str) -> Result<(), Rejection> {
        Ok(())
    }

    /// MAIL FROM.
    async fn mail(&mut self, from: &str) -> Result<(), Rejection>;

    /// RCPT TO.
    async fn rcpt(&mut self, to: &str) -> Result<(), Rejection>;

    /// Complete message after the terminating `.` line, unstuffed and
    /// CRLF-terminated.
    async fn data(&mut self, message: Vec<u8>) -> Result<(), Rejection>;

    /// Discards the current transaction (RSET, EHLO, or after DATA).
    fn reset(&mut self);

    /// Connection is closing.
    fn logout(&mut self) {
        self.reset();
    }
}
