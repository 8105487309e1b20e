//! SMTP reply types, shared by the client (parsing) and the server (writing).

/// SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply code (e.g., 250).
    pub code: ReplyCode,
    /// Reply message lines.
    pub message: Vec<String>,
}

impl Reply {
    /// Creates a new reply.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec is not const-compatible
    pub fn new(code: ReplyCode, message: Vec<String>) -> Self {
        Self { code, message }
    }

    /// Creates a single-line reply.
    #[must_use]
    pub fn single(code: ReplyCode, text: impl Into<String>) -> Self {
        Self {
            code,
            message: vec![text.into()],
        }
    }

    /// Returns true if this is a success reply (2xx).
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code.is_success()
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient_error(&self) -> bool {
        self.code.is_transient()
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent_error(&self) -> bool {
        self.code.is_permanent()
    }

    /// Returns the full message as a single string.
    #[must_use]
    pub fn message_text(&self) -> String {
        self.message.join("\n")
    }

    /// Serializes the reply into wire format.
    ///
    /// Multi-line replies use `-` after the code on every line but the last.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let code = self.code.as_u16();

        if self.message.is_empty() {
            buf.extend_from_slice(format!("{code} \r\n").as_bytes());
            return buf;
        }

        let last = self.message.len() - 1;
        for (i, line) in self.message.iter().enumerate() {
            let sep = if i == last { ' ' } else { '-' };
            // Reply text must never carry a bare line break.
            let line = line.replace(['\r', '\n'], " ");
            buf.extend_from_slice(format!("{code}{sep}{line}\r\n").as_bytes());
        }
        buf
    }
}

/// SMTP reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// Creates a new reply code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns true if this is a success code (2xx).
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 >= 200 && self.0 < 300
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient(self) -> bool {
        self.0 >= 400 && self.0 < 500
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(self) -> bool {
        self.0 >= 500 && self.0 < 600
    }

    /// Returns true if this is an intermediate reply (3xx).
    #[must_use]
    pub const fn is_intermediate(self) -> bool {
        self.0 >= 300 && self.0 < 400
    }
}

impl std::fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Common reply codes
impl ReplyCode {
    /// 220 Service ready
    pub const SERVICE_READY: Self = Self(220);
    /// 221 Service closing transmission channel
    pub const CLOSING: Self = Self(221);
    /// 235 Authentication succeeded
    pub const AUTH_SUCCEEDED: Self = Self(235);
    /// 250 Requested mail action okay, completed
    pub const OK: Self = Self(250);
    /// 252 Cannot verify user, will attempt delivery
    pub const CANNOT_VERIFY: Self = Self(252);
    /// 334 Continue with authentication
    pub const AUTH_CONTINUE: Self = Self(334);
    /// 354 Start mail input
    pub const START_DATA: Self = Self(354);
    /// 421 Service not available, closing transmission channel
    pub const SERVICE_UNAVAILABLE: Self = Self(421);
    /// 451 Local error in processing
    pub const LOCAL_ERROR: Self = Self(451);
    /// 452 Insufficient system storage (also: too many recipients)
    pub const INSUFFICIENT_STORAGE: Self = Self(452);
    /// 500 Syntax error, command unrecognized
    pub const SYNTAX_ERROR: Self = Self(500);
    /// 501 Syntax error in parameters or arguments
    pub const PARAMETER_ERROR: Self = Self(501);
    /// 502 Command not implemented
    pub const NOT_IMPLEMENTED: Self = Self(502);
    /// 503 Bad sequence of commands
    pub const BAD_SEQUENCE: Self = Self(503);
    /// 504 Command parameter not implemented
    pub const PARAMETER_NOT_IMPLEMENTED: Self = Self(504);
    /// 550 Mailbox unavailable (not found, access denied)
    pub const MAILBOX_UNAVAILABLE: Self = Self(550);
    /// 552 Exceeded storage allocation
    pub const EXCEEDED_STORAGE: Self = Self(552);
    /// 554 Transaction failed
    pub const TRANSACTION_FAILED: Self = Self(554);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_classes() {
        assert!(ReplyCode::OK.is_success());
        assert!(ReplyCode::START_DATA.is_intermediate());
        assert!(ReplyCode::LOCAL_ERROR.is_transient());
        assert!(ReplyCode::MAILBOX_UNAVAILABLE.is_permanent());
        assert!(!ReplyCode::OK.is_permanent());
        assert_eq!(format!("{}", ReplyCode::BAD_SEQUENCE), "503");
    }

    #[test]
    fn message_text_joins_lines() {
        let reply = Reply::new(
            ReplyCode::SERVICE_READY,
            vec!["relay.local ESMTP".to_string(), "ready".to_string()],
        );
        assert_eq!(reply.message_text(), "relay.local ESMTP\nready");
        assert!(reply.is_success());
        assert!(!reply.is_transient_error());
    }

    #[test]
    fn serialize_single_line() {
        let reply = Reply::single(ReplyCode::OK, "2.0.0 OK");
        assert_eq!(reply.serialize(), b"250 2.0.0 OK\r\n");
    }

    #[test]
    fn serialize_multi_line() {
        let reply = Reply::new(
            ReplyCode::OK,
            vec![
                "relay.local".to_string(),
                "8BITMIME".to_string(),
                "AUTH PLAIN".to_string(),
            ],
        );
        assert_eq!(
            reply.serialize(),
            b"250-relay.local\r\n250-8BITMIME\r\n250 AUTH PLAIN\r\n"
        );
    }

    #[test]
    fn serialize_strips_line_breaks() {
        let reply = Reply::single(ReplyCode::MAILBOX_UNAVAILABLE, "bad\r\nthing");
        assert_eq!(reply.serialize(), b"550 bad  thing\r\n");
    }

    #[test]
    fn serialize_empty_message() {
        let reply = Reply::new(ReplyCode::AUTH_CONTINUE, Vec::new());
        assert_eq!(reply.serialize(), b"334 \r\n");
        assert!(reply.message_text().is_empty());
    }
}
