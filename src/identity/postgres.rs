//! Postgres identity store (see `sql/schema.sql`).

use super::models::{Account, NewAccount, NewUser, Provider, Role, User};
use super::repo::{
    IdentityStore, InsertAccountOutcome, InsertUserOutcome, RepoFuture, UnlinkOutcome,
};
use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{Instrument, info_span};
use uuid::Uuid;

const USER_COLUMNS: &str = "id, email, is_verified, role, image_url, is_deleted";
const ACCOUNT_COLUMNS: &str = "id, user_id, provider, provider_id, password_hash, is_deleted";

fn db_span(operation: &str, statement: &str) -> tracing::Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[derive(Debug, Clone)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_user_tx(&self, user: &NewUser) -> Result<InsertUserOutcome> {
        // User row and role side collections commit together.
        let mut tx = self.pool.begin().await.context("begin signup transaction")?;

        let query = format!(
            r"
            INSERT INTO users (email, is_verified, role, image_url)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}
            "
        );
        let row = sqlx::query_as::<_, User>(&query)
            .bind(&user.email)
            .bind(user.is_verified)
            .bind(user.role.as_str())
            .bind(user.image_url.as_deref())
            .fetch_one(&mut *tx)
            .instrument(db_span("INSERT", &query))
            .await;

        let created = match row {
            Ok(created) => created,
            Err(err) => {
                if is_unique_violation(&err) {
                    let _ = tx.rollback().await;
                    return Ok(InsertUserOutcome::EmailTaken);
                }
                return Err(err).context("failed to insert user");
            }
        };

        for collection in user.role.side_collections() {
            let query = format!("INSERT INTO {} (user_id) VALUES ($1)", collection.table());
            sqlx::query(&query)
                .bind(created.id)
                .execute(&mut *tx)
                .instrument(db_span("INSERT", &query))
                .await
                .with_context(|| format!("failed to create {}", collection.table()))?;
        }

        tx.commit().await.context("commit signup transaction")?;

        Ok(InsertUserOutcome::Created(created))
    }

    async fn soft_delete_account_tx(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> Result<UnlinkOutcome> {
        let mut tx = self.pool.begin().await.context("begin unlink transaction")?;

        // Serializes concurrent unlinks of the same user.
        let query = "SELECT id FROM users WHERE id = $1 FOR UPDATE";
        let locked = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lock user")?;
        if locked.is_none() {
            let _ = tx.rollback().await;
            return Ok(UnlinkOutcome::NotLinked);
        }

        let query = "SELECT provider FROM accounts WHERE user_id = $1 AND is_deleted = FALSE";
        let providers: Vec<String> = sqlx::query_scalar(query)
            .bind(user_id)
            .fetch_all(&mut *tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to list live accounts")?;

        let outcome = decide_unlink(&providers, provider);
        if outcome == UnlinkOutcome::Unlinked {
            soft_delete_account(&mut tx, user_id, provider).await?;
            tx.commit().await.context("commit unlink transaction")?;
        } else {
            let _ = tx.rollback().await;
        }

        Ok(outcome)
    }

    async fn set_user_deleted_tx(&self, user_id: Uuid, deleted: bool) -> Result<bool> {
        let mut tx = self.pool.begin().await.context("begin deactivate transaction")?;

        let query = r"
            UPDATE users SET is_deleted = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING role
        ";
        let role: Option<String> = sqlx::query_scalar(query)
            .bind(user_id)
            .bind(deleted)
            .fetch_optional(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update user")?;
        let Some(role) = role.as_deref().and_then(Role::parse) else {
            let _ = tx.rollback().await;
            return Ok(false);
        };

        // Only accounts suspended with the user come back on reactivation;
        // accounts unlinked earlier stay deleted.
        let query = if deleted {
            r"
            UPDATE accounts SET is_deleted = TRUE, suspended = TRUE
            WHERE user_id = $1 AND is_deleted = FALSE
            "
        } else {
            r"
            UPDATE accounts SET is_deleted = FALSE, suspended = FALSE
            WHERE user_id = $1 AND suspended = TRUE
            "
        };
        sqlx::query(query)
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to cascade to accounts")?;

        for collection in role.side_collections() {
            let query = format!(
                "UPDATE {} SET is_deleted = $2 WHERE user_id = $1",
                collection.table()
            );
            sqlx::query(&query)
                .bind(user_id)
                .bind(deleted)
                .execute(&mut *tx)
                .instrument(db_span("UPDATE", &query))
                .await
                .with_context(|| format!("failed to cascade to {}", collection.table()))?;
        }

        tx.commit().await.context("commit deactivate transaction")?;
        Ok(true)
    }
}

fn decide_unlink(live_providers: &[String], provider: Provider) -> UnlinkOutcome {
    if !live_providers.iter().any(|p| p == provider.as_str()) {
        UnlinkOutcome::NotLinked
    } else if live_providers.len() <= 1 {
        UnlinkOutcome::LastAccount
    } else {
        UnlinkOutcome::Unlinked
    }
}

async fn soft_delete_account(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    provider: Provider,
) -> Result<()> {
    let query = r"
        UPDATE accounts SET is_deleted = TRUE
        WHERE user_id = $1 AND provider = $2 AND is_deleted = FALSE
    ";
    sqlx::query(query)
        .bind(user_id)
        .bind(provider.as_str())
        .execute(&mut **tx)
        .instrument(db_span("UPDATE", query))
        .await
        .context("failed to soft-delete account")?;
    Ok(())
}

impl IdentityStore for PgIdentityStore {
    fn insert_user<'a>(&'a self, user: &'a NewUser) -> RepoFuture<'a, InsertUserOutcome> {
        Box::pin(self.insert_user_tx(user))
    }

    fn delete_user(&self, user_id: Uuid) -> RepoFuture<'_, ()> {
        Box::pin(async move {
            let query = "DELETE FROM users WHERE id = $1";
            sqlx::query(query)
                .bind(user_id)
                .execute(&self.pool)
                .instrument(db_span("DELETE", query))
                .await
                .context("failed to delete user")?;
            Ok(())
        })
    }

    fn find_user_by_email<'a>(&'a self, email: &'a str) -> RepoFuture<'a, Option<User>> {
        Box::pin(async move {
            let query = format!(
                r"
                SELECT {USER_COLUMNS} FROM users
                WHERE lower(email) = lower($1) AND is_deleted = FALSE
                "
            );
            sqlx::query_as::<_, User>(&query)
                .bind(email)
                .fetch_optional(&self.pool)
                .instrument(db_span("SELECT", &query))
                .await
                .context("failed to find user by email")
        })
    }

    fn find_user_by_id(&self, user_id: Uuid) -> RepoFuture<'_, Option<User>> {
        Box::pin(async move {
            let query =
                format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND is_deleted = FALSE");
            sqlx::query_as::<_, User>(&query)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .instrument(db_span("SELECT", &query))
                .await
                .context("failed to find user by id")
        })
    }

    fn insert_account<'a>(
        &'a self,
        account: &'a NewAccount,
    ) -> RepoFuture<'a, InsertAccountOutcome> {
        Box::pin(async move {
            let query = format!(
                r"
                INSERT INTO accounts (user_id, provider, provider_id, password_hash)
                VALUES ($1, $2, $3, $4)
                RETURNING {ACCOUNT_COLUMNS}
                "
            );
            let row = sqlx::query_as::<_, Account>(&query)
                .bind(account.user_id)
                .bind(account.provider.as_str())
                .bind(account.provider_id.as_deref())
                .bind(account.password_hash.as_deref())
                .fetch_one(&self.pool)
                .instrument(db_span("INSERT", &query))
                .await;

            match row {
                Ok(created) => Ok(InsertAccountOutcome::Created(created)),
                Err(err) if is_unique_violation(&err) => Ok(InsertAccountOutcome::AlreadyLinked),
                Err(err) => Err(err).context("failed to insert account"),
            }
        })
    }

    fn find_account(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> RepoFuture<'_, Option<Account>> {
        Box::pin(async move {
            let query = format!(
                r"
                SELECT {ACCOUNT_COLUMNS} FROM accounts
                WHERE user_id = $1 AND provider = $2 AND is_deleted = FALSE
                "
            );
            sqlx::query_as::<_, Account>(&query)
                .bind(user_id)
                .bind(provider.as_str())
                .fetch_optional(&self.pool)
                .instrument(db_span("SELECT", &query))
                .await
                .context("failed to find account")
        })
    }

    fn list_accounts(&self, user_id: Uuid) -> RepoFuture<'_, Vec<Account>> {
        Box::pin(async move {
            let query = format!(
                r"
                SELECT {ACCOUNT_COLUMNS} FROM accounts
                WHERE user_id = $1 AND is_deleted = FALSE
                ORDER BY created_at
                "
            );
            sqlx::query_as::<_, Account>(&query)
                .bind(user_id)
                .fetch_all(&self.pool)
                .instrument(db_span("SELECT", &query))
                .await
                .context("failed to list accounts")
        })
    }

    fn soft_delete_account_unless_last(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> RepoFuture<'_, UnlinkOutcome> {
        Box::pin(self.soft_delete_account_tx(user_id, provider))
    }

    fn set_user_deleted(&self, user_id: Uuid, deleted: bool) -> RepoFuture<'_, bool> {
        Box::pin(self.set_user_deleted_tx(user_id, deleted))
    }

    fn set_verified(&self, user_id: Uuid) -> RepoFuture<'_, bool> {
        Box::pin(async move {
            let query = r"
                UPDATE users SET is_verified = TRUE, updated_at = NOW()
                WHERE id = $1 AND is_verified = FALSE AND is_deleted = FALSE
            ";
            let result = sqlx::query(query)
                .bind(user_id)
                .execute(&self.pool)
                .instrument(db_span("UPDATE", query))
                .await
                .context("failed to verify user")?;
            Ok(result.rows_affected() == 1)
        })
    }

    fn set_image_url_if_missing<'a>(
        &'a self,
        user_id: Uuid,
        image_url: &'a str,
    ) -> RepoFuture<'a, bool> {
        Box::pin(async move {
            let query = r"
                UPDATE users SET image_url = $2, updated_at = NOW()
                WHERE id = $1 AND (image_url IS NULL OR image_url = '')
            ";
            let result = sqlx::query(query)
                .bind(user_id)
                .bind(image_url)
                .execute(&self.pool)
                .instrument(db_span("UPDATE", query))
                .await
                .context("failed to set image url")?;
            Ok(result.rows_affected() == 1)
        })
    }

    fn update_password<'a>(
        &'a self,
        account_id: Uuid,
        password_hash: &'a str,
    ) -> RepoFuture<'a, ()> {
        Box::pin(async move {
            let query = "UPDATE accounts SET password_hash = $2 WHERE id = $1";
            sqlx::query(query)
                .bind(account_id)
                .bind(password_hash)
                .execute(&self.pool)
                .instrument(db_span("UPDATE", query))
                .await
                .context("failed to update password")?;
            Ok(())
        })
    }

    fn ping(&self) -> RepoFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .context("database ping failed")?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live(providers: &[&str]) -> Vec<String> {
        providers.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn unlink_decision_keeps_the_last_account() {
        assert_eq!(
            decide_unlink(&live(&["local"]), Provider::Local),
            UnlinkOutcome::LastAccount
        );
        assert_eq!(
            decide_unlink(&live(&["local", "google"]), Provider::Google),
            UnlinkOutcome::Unlinked
        );
        assert_eq!(
            decide_unlink(&live(&["local"]), Provider::Discord),
            UnlinkOutcome::NotLinked
        );
    }
}
