//! Delivery log storage.

use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::SqlitePool;

use super::model::{LogEntry, LogId, LogPage, LogStatus, NewLogEntry};
use super::{LogStore, now_text, parse_timestamp};
use crate::Result;

/// Largest page the listing returns.
pub const MAX_PAGE_SIZE: u32 = 500;

/// Repository for delivery log rows.
#[derive(Debug, Clone)]
pub struct LogRepository {
    pool: SqlitePool,
}

impl LogRepository {
    pub(crate) const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a row in the `processing` state.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn create(&self, entry: &NewLogEntry) -> Result<LogId> {
        let result = sqlx::query(
            r"
            INSERT INTO logs (mail_from, rcpt_to, subject, content, client_ip, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&entry.from)
        .bind(&entry.to)
        .bind(&entry.subject)
        .bind(&entry.content)
        .bind(&entry.client_ip)
        .bind(LogStatus::Processing.as_str())
        .bind(now_text())
        .execute(&self.pool)
        .await?;

        Ok(LogId::new(result.last_insert_rowid()))
    }

    /// Sets the final status of a `processing` row.
    ///
    /// The update is conditional on the row still being `processing`, so
    /// a row is finished at most once. Returns whether this call did it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn finish(&self, id: LogId, status: LogStatus, error: Option<&str>) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE logs SET status = ?, error = ?
            WHERE id = ? AND status = 'processing'
            ",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Get a row by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, id: LogId) -> Result<Option<LogEntry>> {
        let row = sqlx::query(
            r"
            SELECT id, mail_from, rcpt_to, subject, content, client_ip, status, error, created_at
            FROM logs
            WHERE id = ?
            ",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_entry))
    }

    /// One page of rows, newest first, with the overall row count.
    ///
    /// `page` is 1-based; 0 is treated as 1. `page_size` is clamped to
    /// `1..=MAX_PAGE_SIZE`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list(&self, page: u32, page_size: u32) -> Result<LogPage> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let offset = i64::from(page - 1) * i64::from(page_size);

        let total: i64 = sqlx::query("SELECT COUNT(*) AS total FROM logs")
            .fetch_one(&self.pool)
            .await?
            .get("total");

        let rows = sqlx::query(
            r"
            SELECT id, mail_from, rcpt_to, subject, content, client_ip, status, error, created_at
            FROM logs
            ORDER BY id DESC
            LIMIT ? OFFSET ?
            ",
        )
        .bind(i64::from(page_size))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(LogPage {
            entries: rows.iter().map(row_to_entry).collect(),
            total,
            page,
            page_size,
        })
    }
}

#[async_trait]
impl LogStore for LogRepository {
    async fn create_log(&self, entry: &NewLogEntry) -> Result<LogId> {
        self.create(entry).await
    }

    async fn finish_log(&self, id: LogId, status: LogStatus, error: Option<&str>) -> Result<bool> {
        self.finish(id, status, error).await
    }
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> LogEntry {
    LogEntry {
        id: LogId::new(row.get("id")),
        from: row.get("mail_from"),
        to: row.get("rcpt_to"),
        subject: row.get("subject"),
        content: row.get("content"),
        client_ip: row.get("client_ip"),
        status: LogStatus::parse(row.get("status")),
        error: row.get("error"),
        created_at: parse_timestamp(row.get("created_at")),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::Database;

    fn entry(n: usize) -> NewLogEntry {
        NewLogEntry {
            from: format!("sender{n}@example.org"),
            to: "sales@co.com".into(),
            subject: format!("Subject {n}"),
            content: "body".into(),
            client_ip: "192.0.2.7".into(),
        }
    }

    #[tokio::test]
    async fn test_create_starts_processing() {
        let repo = Database::in_memory().await.unwrap().logs();
        let id = repo.create(&entry(1)).await.unwrap();

        let row = repo.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, LogStatus::Processing);
        assert_eq!(row.from, "sender1@example.org");
        assert_eq!(row.client_ip, "192.0.2.7");
        assert_eq!(row.error, None);
    }

    #[tokio::test]
    async fn test_finish_only_once() {
        let repo = Database::in_memory().await.unwrap().logs();
        let id = repo.create(&entry(1)).await.unwrap();

        assert!(repo.finish(id, LogStatus::Failed, Some("dial failed")).await.unwrap());
        assert!(!repo.finish(id, LogStatus::Success, None).await.unwrap());
        assert!(!repo.finish(LogId::new(42), LogStatus::Success, None).await.unwrap());

        let row = repo.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, LogStatus::Failed);
        assert_eq!(row.error.as_deref(), Some("dial failed"));
    }

    #[tokio::test]
    async fn test_list_pages_newest_first() {
        let repo = Database::in_memory().await.unwrap().logs();
        for n in 1..=5 {
            repo.create(&entry(n)).await.unwrap();
        }

        let first = repo.list(1, 2).await.unwrap();
        assert_eq!(first.total, 5);
        let subjects: Vec<&str> = first.entries.iter().map(|e| e.subject.as_str()).collect();
        assert_eq!(subjects, vec!["Subject 5", "Subject 4"]);

        let last = repo.list(3, 2).await.unwrap();
        assert_eq!(last.entries.len(), 1);
        assert_eq!(last.entries[0].subject, "Subject 1");

        let clamped = repo.list(0, 0).await.unwrap();
        assert_eq!((clamped.page, clamped.page_size), (1, 1));
    }
}
