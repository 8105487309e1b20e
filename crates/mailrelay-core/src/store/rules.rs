//! Rule storage.

use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::SqlitePool;
use tracing::debug;

use super::model::{NewRule, Rule, RuleId, RuleUpdate, split_targets};
use super::{RuleStore, is_unique_violation, now_text, parse_timestamp};
use crate::router::validate_pattern;
use crate::{Error, Result};

/// Repository for forwarding rules. Deletion is soft.
#[derive(Debug, Clone)]
pub struct RuleRepository {
    pool: SqlitePool,
}

impl RuleRepository {
    pub(crate) const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Active rules in creation order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list_active(&self) -> Result<Vec<Rule>> {
        let rows = sqlx::query(
            r"
            SELECT id, pattern, forward_to, description, hit_count, created_at, updated_at
            FROM rules
            WHERE deleted_at IS NULL
            ORDER BY id ASC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_rule).collect())
    }

    /// Get an active rule by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, id: RuleId) -> Result<Option<Rule>> {
        let row = sqlx::query(
            r"
            SELECT id, pattern, forward_to, description, hit_count, created_at, updated_at
            FROM rules
            WHERE id = ? AND deleted_at IS NULL
            ",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_rule))
    }

    /// Adds a rule.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern does not compile, a target is not
    /// an address, an active rule already has this pattern, or the
    /// database query fails.
    pub async fn create(&self, rule: NewRule) -> Result<Rule> {
        validate_pattern(&rule.pattern)?;
        validate_targets(&rule.forward_to)?;

        let now = now_text();
        let result = sqlx::query(
            r"
            INSERT INTO rules (pattern, forward_to, description, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ",
        )
        .bind(&rule.pattern)
        .bind(rule.forward_to.trim())
        .bind(&rule.description)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| duplicate_or(e, &rule.pattern))?;

        let id = RuleId::new(result.last_insert_rowid());
        debug!(%id, pattern = %rule.pattern, "Rule created");

        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("rule {id}")))
    }

    /// Changes the given fields of an active rule.
    ///
    /// # Errors
    ///
    /// Returns an error if the rule does not exist, a new value is
    /// invalid, or the database query fails.
    pub async fn update(&self, id: RuleId, update: RuleUpdate) -> Result<Rule> {
        if let Some(pattern) = &update.pattern {
            validate_pattern(pattern)?;
        }
        if let Some(forward_to) = &update.forward_to {
            validate_targets(forward_to)?;
        }

        let result = sqlx::query(
            r"
            UPDATE rules SET
                pattern = COALESCE(?, pattern),
                forward_to = COALESCE(?, forward_to),
                description = COALESCE(?, description),
                updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            ",
        )
        .bind(update.pattern.as_deref())
        .bind(update.forward_to.as_deref().map(str::trim))
        .bind(update.description.as_deref())
        .bind(now_text())
        .bind(id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| duplicate_or(e, update.pattern.as_deref().unwrap_or_default()))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("rule {id}")));
        }

        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("rule {id}")))
    }

    /// Soft-deletes a rule. Its log rows and counter are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the rule does not exist or the database query fails.
    pub async fn delete(&self, id: RuleId) -> Result<()> {
        let now = now_text();
        let result = sqlx::query(
            r"
            UPDATE rules SET deleted_at = ?, updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            ",
        )
        .bind(&now)
        .bind(&now)
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("rule {id}")));
        }
        Ok(())
    }

    /// Atomically adds one to a rule's hit counter, deleted or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn increment_hit_count(&self, id: RuleId) -> Result<()> {
        sqlx::query("UPDATE rules SET hit_count = hit_count + 1 WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RuleStore for RuleRepository {
    async fn active_rules(&self) -> Result<Vec<Rule>> {
        self.list_active().await
    }

    async fn increment_hit_count(&self, id: RuleId) -> Result<()> {
        Self::increment_hit_count(self, id).await
    }
}

fn validate_targets(forward_to: &str) -> Result<()> {
    let targets = split_targets(forward_to);
    if targets.is_empty() {
        return Err(Error::Validation("forward_to needs at least one address".into()));
    }
    if let Some(bad) = targets.iter().find(|t| t.matches('@').count() != 1) {
        return Err(Error::Validation(format!("not an email address: {bad}")));
    }
    Ok(())
}

fn duplicate_or(err: sqlx::Error, pattern: &str) -> Error {
    if is_unique_violation(&err) {
        Error::Duplicate(format!("rule with pattern {pattern:?}"))
    } else {
        Error::Database(err)
    }
}

fn row_to_rule(row: &sqlx::sqlite::SqliteRow) -> Rule {
    Rule {
        id: RuleId::new(row.get("id")),
        pattern: row.get("pattern"),
        forward_to: row.get("forward_to"),
        description: row.get("description"),
        hit_count: row.get("hit_count"),
        created_at: parse_timestamp(row.get("created_at")),
        updated_at: parse_timestamp(row.get("updated_at")),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::Database;

    async fn repo() -> RuleRepository {
        Database::in_memory().await.unwrap().rules()
    }

    #[tokio::test]
    async fn test_create_and_list_in_creation_order() {
        let repo = repo().await;
        repo.create(NewRule::new("^sales@", "team@example.com"))
            .await
            .unwrap();
        repo.create(NewRule::new("@co\\.com$", "all@example.com").description("catch-all"))
            .await
            .unwrap();

        let rules = repo.list_active().await.unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].pattern, "^sales@");
        assert_eq!(rules[1].description, "catch-all");
        assert_eq!(rules[1].hit_count, 0);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let repo = repo().await;
        assert!(matches!(
            repo.create(NewRule::new("(unclosed", "a@b.com")).await,
            Err(Error::InvalidPattern { .. })
        ));
        assert!(matches!(
            repo.create(NewRule::new("x", "not-an-address")).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            repo.create(NewRule::new("x", " , ")).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_pattern_until_deleted() {
        let repo = repo().await;
        let rule = repo.create(NewRule::new("x@", "a@b.com")).await.unwrap();
        assert!(matches!(
            repo.create(NewRule::new("x@", "c@d.com")).await,
            Err(Error::Duplicate(_))
        ));

        repo.delete(rule.id).await.unwrap();
        assert!(repo.get(rule.id).await.unwrap().is_none());
        assert!(repo.list_active().await.unwrap().is_empty());

        // The pattern is free again once the old rule is gone.
        repo.create(NewRule::new("x@", "c@d.com")).await.unwrap();
        assert!(matches!(repo.delete(rule.id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_update() {
        let repo = repo().await;
        let rule = repo.create(NewRule::new("a@", "a@b.com")).await.unwrap();

        let updated = repo
            .update(
                rule.id,
                RuleUpdate {
                    forward_to: Some(" x@y.com, z@y.com ".into()),
                    ..RuleUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.pattern, "a@");
        assert_eq!(updated.forward_to, "x@y.com, z@y.com");
        assert_eq!(updated.targets(), vec!["x@y.com", "z@y.com"]);

        assert!(matches!(
            repo.update(RuleId::new(99), RuleUpdate::default()).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_increment_hit_count() {
        let repo = repo().await;
        let rule = repo.create(NewRule::new("a@", "a@b.com")).await.unwrap();

        repo.increment_hit_count(rule.id).await.unwrap();
        RuleStore::increment_hit_count(&repo, rule.id).await.unwrap();

        assert_eq!(repo.get(rule.id).await.unwrap().unwrap().hit_count, 2);
    }
}
