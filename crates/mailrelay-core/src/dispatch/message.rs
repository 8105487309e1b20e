//! The forwarded message.
//!
//! Forwarding never passes the original bytes on. Each target receives a
//! fresh plain-text message naming the original sender and subject,
//! followed by the extracted body.

use chrono::Utc;
use mailrelay_mime::ContentType;
use mailrelay_mime::encoding::encode_rfc2047;

/// Subject length cap for relay delivery (RFC 5322 line recommendation).
pub const RELAY_SUBJECT_LIMIT: usize = 78;

/// Subject length cap for direct delivery.
pub const DIRECT_SUBJECT_LIMIT: usize = 200;

/// Builds `[Fwd: <from>] <subject>`, clipped to `limit` characters with a
/// trailing `...` when it is longer.
#[must_use]
pub fn forward_subject(original_from: &str, subject: &str, limit: usize) -> String {
    let full = format!("[Fwd: {original_from}] {subject}");
    if full.chars().count() <= limit {
        return full;
    }
    let mut clipped: String = full.chars().take(limit.saturating_sub(3)).collect();
    clipped.push_str("...");
    clipped
}

/// A message to forward.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// `From` header address.
    pub from: String,
    /// `To` header addresses.
    pub to: Vec<String>,
    /// Subject line, already clipped.
    pub subject: String,
    /// Sender of the original message.
    pub original_from: String,
    /// Decoded subject of the original message.
    pub original_subject: String,
    /// Plain text body.
    pub body: String,
    /// Declare `Content-Transfer-Encoding: 8bit`.
    pub eight_bit: bool,
}

impl OutgoingMessage {
    /// Creates a new outgoing message.
    #[must_use]
    pub fn new(from: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: Vec::new(),
            subject: subject.into(),
            original_from: String::new(),
            original_subject: String::new(),
            body: body.into(),
            eight_bit: false,
        }
    }

    /// Adds a recipient.
    #[must_use]
    pub fn to(mut self, recipient: impl Into<String>) -> Self {
        self.to.push(recipient.into());
        self
    }

    /// Sets the provenance shown at the top of the body.
    #[must_use]
    pub fn original(mut self, from: impl Into<String>, subject: impl Into<String>) -> Self {
        self.original_from = from.into();
        self.original_subject = subject.into();
        self
    }

    /// Declares an 8bit body.
    #[must_use]
    pub const fn eight_bit(mut self, eight_bit: bool) -> Self {
        self.eight_bit = eight_bit;
        self
    }

    /// Builds the RFC 5322 formatted message.
    #[must_use]
    pub fn to_rfc5322(&self) -> String {
        use std::fmt::Write;

        let mut message = String::new();

        // Headers
        let _ = write!(message, "From: {}\r\n", single_line(&self.from));
        let _ = write!(message, "To: {}\r\n", single_line(&self.to.join(", ")));
        let _ = write!(
            message,
            "Subject: {}\r\n",
            encode_rfc2047(&single_line(&self.subject))
        );
        let _ = write!(message, "Date: {}\r\n", Utc::now().to_rfc2822());
        message.push_str("MIME-Version: 1.0\r\n");
        let _ = write!(message, "Content-Type: {}\r\n", ContentType::text_plain());
        if self.eight_bit {
            message.push_str("Content-Transfer-Encoding: 8bit\r\n");
        }

        // Empty line between headers and body
        message.push_str("\r\n");

        let _ = write!(
            message,
            "Original Sender: {}\r\n",
            single_line(&self.original_from)
        );
        let _ = write!(
            message,
            "Original Subject: {}\r\n",
            single_line(&self.original_subject)
        );
        message.push_str("---\r\n\r\n");
        message.push_str(&self.body);

        message
    }
}

/// Collapses line breaks so a value cannot start a new header.
fn single_line(value: &str) -> String {
    value
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect()
}
