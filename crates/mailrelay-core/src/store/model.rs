//! Stored records.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Rule identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RuleId(pub i64);

impl RuleId {
    /// Creates a new rule ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A forwarding rule: recipients matching `pattern` go to `forward_to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rule {
    /// Unique identifier.
    pub id: RuleId,
    /// Regular expression tested unanchored against the full recipient.
    pub pattern: String,
    /// Target address, or several separated by commas.
    pub forward_to: String,
    /// Operator note.
    pub description: String,
    /// Completed delivery attempts, successful or not.
    pub hit_count: i64,
    /// When the rule was created.
    pub created_at: DateTime<Utc>,
    /// When the rule was last changed.
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    /// The individual forward targets, trimmed, empty entries dropped.
    #[must_use]
    pub fn targets(&self) -> Vec<String> {
        split_targets(&self.forward_to)
    }
}

/// Splits a comma-separated target list.
#[must_use]
pub fn split_targets(forward_to: &str) -> Vec<String> {
    forward_to
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Fields for a new rule.
#[derive(Debug, Clone, Default)]
pub struct NewRule {
    /// Recipient pattern.
    pub pattern: String,
    /// Forward target(s).
    pub forward_to: String,
    /// Operator note.
    pub description: String,
}

impl NewRule {
    /// Creates a rule definition without a description.
    #[must_use]
    pub fn new(pattern: impl Into<String>, forward_to: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            forward_to: forward_to.into(),
            description: String::new(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Partial update of a rule; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct RuleUpdate {
    /// New pattern.
    pub pattern: Option<String>,
    /// New target(s).
    pub forward_to: Option<String>,
    /// New description.
    pub description: Option<String>,
}

/// Log row identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct LogId(pub i64);

impl LogId {
    /// Creates a new log ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery state of a log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    /// Accepted and waiting for the dispatch attempt.
    #[default]
    Processing,
    /// Forwarded.
    Success,
    /// Forwarding failed; terminal.
    Failed,
}

impl LogStatus {
    /// Parse from database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "success" => Self::Success,
            "failed" => Self::Failed,
            _ => Self::Processing,
        }
    }

    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One accepted message and the outcome of forwarding it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// Unique identifier.
    pub id: LogId,
    /// Envelope sender as given by the client.
    pub from: String,
    /// Matched recipient.
    pub to: String,
    /// Decoded subject.
    pub subject: String,
    /// Extracted text, truncated for storage.
    pub content: String,
    /// Connecting client's IP address; empty when unknown.
    pub client_ip: String,
    /// Delivery state.
    pub status: LogStatus,
    /// Failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the message was accepted.
    pub created_at: DateTime<Utc>,
}

/// Fields for a new log row; the row starts in [`LogStatus::Processing`].
#[derive(Debug, Clone, Default)]
pub struct NewLogEntry {
    /// Envelope sender.
    pub from: String,
    /// Matched recipient.
    pub to: String,
    /// Decoded subject.
    pub subject: String,
    /// Extracted text.
    pub content: String,
    /// Client IP address.
    pub client_ip: String,
}

/// A page of log rows, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct LogPage {
    /// Rows on this page.
    pub entries: Vec<LogEntry>,
    /// Rows across all pages.
    pub total: i64,
    /// 1-based page number.
    pub page: u32,
    /// Rows per page.
    pub page_size: u32,
}

/// A managed domain. Bookkeeping only; routing never consults it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Domain {
    /// Unique identifier.
    pub id: i64,
    /// Lower-cased domain name.
    pub name: String,
    /// When the domain was added.
    pub created_at: DateTime<Utc>,
    /// When the domain was last changed.
    pub updated_at: DateTime<Utc>,
}
