//! Managed domain bookkeeping.

use sqlx::Row;
use sqlx::sqlite::SqlitePool;

use super::model::Domain;
use super::{is_unique_violation, now_text, parse_timestamp};
use crate::{Error, Result};

/// Repository for managed domains. Deletion is soft.
#[derive(Debug, Clone)]
pub struct DomainRepository {
    pool: SqlitePool,
}

impl DomainRepository {
    pub(crate) const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Active domains by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list(&self) -> Result<Vec<Domain>> {
        let rows = sqlx::query(
            r"
            SELECT id, name, created_at, updated_at
            FROM domains
            WHERE deleted_at IS NULL
            ORDER BY name ASC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_domain).collect())
    }

    /// Adds a domain. The name is trimmed and lower-cased.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not a plausible domain, is already
    /// active, or the database query fails.
    pub async fn add(&self, name: &str) -> Result<Domain> {
        let name = normalize(name)?;
        let now = now_text();

        let result = sqlx::query(
            r"
            INSERT INTO domains (name, created_at, updated_at)
            VALUES (?, ?, ?)
            ",
        )
        .bind(&name)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::Duplicate(format!("domain {name}"))
            } else {
                Error::Database(e)
            }
        })?;

        let row = sqlx::query("SELECT id, name, created_at, updated_at FROM domains WHERE id = ?")
            .bind(result.last_insert_rowid())
            .fetch_one(&self.pool)
            .await?;
        Ok(row_to_domain(&row))
    }

    /// Soft-deletes a domain by name.
    ///
    /// # Errors
    ///
    /// Returns an error if no active domain has this name or the database
    /// query fails.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let name = normalize(name)?;
        let now = now_text();

        let result = sqlx::query(
            r"
            UPDATE domains SET deleted_at = ?, updated_at = ?
            WHERE name = ? AND deleted_at IS NULL
            ",
        )
        .bind(&now)
        .bind(&now)
        .bind(&name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("domain {name}")));
        }
        Ok(())
    }
}

fn normalize(name: &str) -> Result<String> {
    let name = name.trim().trim_end_matches('.').to_lowercase();
    if name.is_empty()
        || name.contains(|c: char| c.is_whitespace() || c == '@' || c == '/')
    {
        return Err(Error::Validation(format!("not a domain name: {name:?}")));
    }
    Ok(name)
}

fn row_to_domain(row: &sqlx::sqlite::SqliteRow) -> Domain {
    Domain {
        id: row.get("id"),
        name: row.get("name"),
        created_at: parse_timestamp(row.get("created_at")),
        updated_at: parse_timestamp(row.get("updated_at")),
    }
}
