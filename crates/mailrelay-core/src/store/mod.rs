//! `SQLite` persistence for rules, log rows, and domains.
//!
//! A single [`Database`] owns the connection pool; repositories are cheap
//! handles onto it. The routing and delivery code only sees the narrow
//! [`RuleStore`] and [`LogStore`] traits.

mod domains;
mod logs;
mod model;
mod rules;

pub use domains::DomainRepository;
pub use logs::LogRepository;
pub use model::{
    Domain, LogEntry, LogId, LogPage, LogStatus, NewLogEntry, NewRule, Rule, RuleId, RuleUpdate,
    split_targets,
};
pub use rules::RuleRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::Result;

/// Rule queries needed by routing and delivery.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Active rules in creation order.
    async fn active_rules(&self) -> Result<Vec<Rule>>;

    /// Adds one to the rule's hit counter.
    async fn increment_hit_count(&self, id: RuleId) -> Result<()>;
}

/// Log row writes needed by the delivery recorder.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Inserts a `processing` row.
    async fn create_log(&self, entry: &NewLogEntry) -> Result<LogId>;

    /// Moves a `processing` row to its final status.
    ///
    /// Returns `false` if the row does not exist or was already finished.
    async fn finish_log(&self, id: LogId, status: LogStatus, error: Option<&str>) -> Result<bool>;
}

/// Handle to the service database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database at `database_path`.
    ///
    /// Creates the tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn connect(database_path: &str) -> Result<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let db = Self { pool };
        db.initialize().await?;
        Ok(db)
    }

    /// Create an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        // One connection that never expires: each new connection would see
        // a fresh, empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let db = Self { pool };
        db.initialize().await?;
        Ok(db)
    }

    /// Initialize database schema.
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pattern TEXT NOT NULL,
                forward_to TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                hit_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        // Deleted rules keep their row but free the pattern.
        sqlx::query(
            r"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_rules_active_pattern
            ON rules(pattern) WHERE deleted_at IS NULL
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                mail_from TEXT NOT NULL,
                rcpt_to TEXT NOT NULL,
                subject TEXT NOT NULL,
                content TEXT NOT NULL,
                client_ip TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'processing',
                error TEXT,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        for index in [
            "CREATE INDEX IF NOT EXISTS idx_logs_mail_from ON logs(mail_from)",
            "CREATE INDEX IF NOT EXISTS idx_logs_rcpt_to ON logs(rcpt_to)",
            "CREATE INDEX IF NOT EXISTS idx_logs_created_at ON logs(created_at)",
        ] {
            sqlx::query(index).execute(&self.pool).await?;
        }

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS domains (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_domains_active_name
            ON domains(name) WHERE deleted_at IS NULL
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Rule repository.
    #[must_use]
    pub fn rules(&self) -> RuleRepository {
        RuleRepository::new(self.pool.clone())
    }

    /// Log repository.
    #[must_use]
    pub fn logs(&self) -> LogRepository {
        LogRepository::new(self.pool.clone())
    }

    /// Domain repository.
    #[must_use]
    pub fn domains(&self) -> DomainRepository {
        DomainRepository::new(self.pool.clone())
    }

    /// Closes every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Current time in the stored text format.
pub(crate) fn now_text() -> String {
    Utc::now().to_rfc3339()
}

/// Parses a stored timestamp; unreadable values map to the Unix epoch.
pub(crate) fn parse_timestamp(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

/// Whether a query failed on a unique index.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let db = Database::in_memory().await.unwrap();
        db.initialize().await.unwrap();
        assert!(db.rules().list_active().await.unwrap().is_empty());
    }

    #[test]
    fn test_parse_timestamp() {
        let ts = parse_timestamp("2024-05-01T10:00:00+02:00");
        assert_eq!(ts.to_rfc3339(), "2024-05-01T08:00:00+00:00");
        assert_eq!(parse_timestamp("garbage"), DateTime::<Utc>::default());
    }
}
