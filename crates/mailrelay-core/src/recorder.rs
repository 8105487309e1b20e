//! Delivery bookkeeping: the log row and the rule counter.

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::DeliveryError;
use crate::store::{LogId, LogStatus, LogStore, NewLogEntry, RuleId, RuleStore};
use crate::Result;

/// Longest stored content, in characters.
pub const MAX_LOGGED_CHARS: usize = 10_000;

/// Appended to content cut at [`MAX_LOGGED_CHARS`].
pub const TRUNCATION_MARKER: &str = "...(truncated)";

/// Cuts `text` to [`MAX_LOGGED_CHARS`] characters, marking the cut.
#[must_use]
pub fn truncate_content(text: &str) -> String {
    match text.char_indices().nth(MAX_LOGGED_CHARS) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &text[..cut]),
        None => text.to_string(),
    }
}

/// Writes log rows and hit counts on behalf of sessions and workers.
#[derive(Clone)]
pub struct Recorder {
    logs: Arc<dyn LogStore>,
    rules: Arc<dyn RuleStore>,
}

impl Recorder {
    /// Creates a recorder over the given stores.
    #[must_use]
    pub fn new(logs: Arc<dyn LogStore>, rules: Arc<dyn RuleStore>) -> Self {
        Self { logs, rules }
    }

    /// Writes the `processing` row for an accepted message, truncating
    /// its content first.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    pub async fn begin(&self, mut entry: NewLogEntry) -> Result<LogId> {
        entry.content = truncate_content(&entry.content);
        let id = self.logs.create_log(&entry).await?;
        info!(log = %id, from = %entry.from, to = %entry.to, "Message accepted");
        Ok(id)
    }

    /// Records the outcome of a dispatch attempt: finishes the row and
    /// counts the attempt against the rule.
    ///
    /// The counter is bumped even if finishing the row fails, but not when
    /// the row had already been finished by an earlier call.
    ///
    /// # Errors
    ///
    /// Returns the first store error.
    pub async fn complete(
        &self,
        log_id: LogId,
        rule_id: RuleId,
        outcome: &std::result::Result<(), DeliveryError>,
    ) -> Result<()> {
        let (status, message) = match outcome {
            Ok(()) => (LogStatus::Success, None),
            Err(e) => (LogStatus::Failed, Some(e.to_string())),
        };

        let finished = self
            .logs
            .finish_log(log_id, status, message.as_deref())
            .await;
        match &finished {
            Ok(true) => info!(log = %log_id, rule = %rule_id, %status, "Delivery recorded"),
            Ok(false) => {
                warn!(log = %log_id, "Log row was already finished");
                return Ok(());
            }
            Err(e) => error!(log = %log_id, "Failed to finish log row: {e}"),
        }

        let counted = self.rules.increment_hit_count(rule_id).await;
        if let Err(e) = &counted {
            error!(rule = %rule_id, "Failed to count rule hit: {e}");
        }

        finished.map(drop).and(counted)
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::{Database, NewRule};

    #[test]
    fn test_truncate_content() {
        let long = "a".repeat(10_050);
        let cut = truncate_content(&long);
        assert_eq!(cut.len(), 10_000 + TRUNCATION_MARKER.len());
        assert!(cut.ends_with(TRUNCATION_MARKER));

        let exact = "b".repeat(10_000);
        assert_eq!(truncate_content(&exact), exact);
    }

    #[test]
    fn test_truncate_counts_characters() {
        let long = "中".repeat(10_001);
        let cut = truncate_content(&long);
        assert_eq!(cut.chars().count(), 10_000 + TRUNCATION_MARKER.len());
    }

    #[tokio::test]
    async fn test_begin_and_complete() {
        let db = Database::in_memory().await.unwrap();
        let rule = db
            .rules()
            .create(NewRule::new("^sales@", "team@example.com"))
            .await
            .unwrap();
        let recorder = Recorder::new(Arc::new(db.logs()), Arc::new(db.rules()));

        let id = recorder
            .begin(NewLogEntry {
                from: "a@b.c".into(),
                to: "sales@co.com".into(),
                subject: "Hi".into(),
                content: "x".repeat(10_050),
                client_ip: String::new(),
            })
            .await
            .unwrap();

        let row = db.logs().get(id).await.unwrap().unwrap();
        assert_eq!(row.status, LogStatus::Processing);
        assert!(row.content.ends_with(TRUNCATION_MARKER));

        let failure = Err(DeliveryError::AuthFailure("535 bad credentials".into()));
        recorder.complete(id, rule.id, &failure).await.unwrap();
        // A second completion changes nothing.
        recorder.complete(id, rule.id, &Ok(())).await.unwrap();

        let row = db.logs().get(id).await.unwrap().unwrap();
        assert_eq!(row.status, LogStatus::Failed);
        assert_eq!(row.error.as_deref(), Some("auth failed: 535 bad credentials"));
        assert_eq!(db.rules().get(rule.id).await.unwrap().unwrap().hit_count, 1);
    }
}
