use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, User};
use crate::error::AppError;

pub type StoreResult<T> = Result<T, AppError>;

const USER_COLUMNS: &str = "id, name, email, password_hash, refresh_token, \
     refresh_token_expires_at, is_verified, is_blocked, password_changed_at, \
     created_at, updated_at";

const UNIQUE_VIOLATION: &str = "23505";

/// Persistence seam for user credentials. Every write bumps `updated_at`;
/// writes against an unknown id fail with [`AppError::NotFound`].
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Inserts a new user. Email uniqueness is enforced here, atomically.
    async fn insert(&self, user: NewUser) -> StoreResult<User>;

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;

    /// `email` must already be normalized.
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    async fn find_by_refresh_token(&self, token: &str) -> StoreResult<Option<User>>;

    /// Replaces the stored refresh token; `None` clears it.
    async fn set_refresh_token(
        &self,
        id: Uuid,
        token: Option<(&str, OffsetDateTime)>,
    ) -> StoreResult<()>;

    /// Stores a freshly minted refresh token, but only while `password_changed_at`
    /// still equals `seen_password_change`, the value read when the session was
    /// admitted. Returns `false` when a password change landed in between.
    async fn issue_refresh_token(
        &self,
        id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
        seen_password_change: Option<OffsetDateTime>,
    ) -> StoreResult<bool>;

    /// Stores a new hash, stamps `password_changed_at` and drops the refresh token.
    async fn update_password(&self, id: Uuid, password_hash: &str) -> StoreResult<User>;

    async fn set_verified(&self, id: Uuid, verified: bool) -> StoreResult<()>;

    async fn set_blocked(&self, id: Uuid, blocked: bool) -> StoreResult<()>;
}

/// PostgreSQL-backed store; uniqueness comes from the `users_email_key` index.
#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn expect_row(rows_affected: u64) -> StoreResult<()> {
    if rows_affected == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn insert(&self, user: NewUser) -> StoreResult<User> {
        let result = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, name, email, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_one(&self.db)
        .await;

        match result {
            Ok(u) => Ok(u),
            Err(sqlx::Error::Database(db_err))
                if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) =>
            {
                Err(AppError::Conflict("Email already registered".into()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_refresh_token(&self, token: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE refresh_token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn set_refresh_token(
        &self,
        id: Uuid,
        token: Option<(&str, OffsetDateTime)>,
    ) -> StoreResult<()> {
        let (token, expires_at) = match token {
            Some((t, exp)) => (Some(t), Some(exp)),
            None => (None, None),
        };
        let done = sqlx::query(
            r#"
            UPDATE users
            SET refresh_token = $2, refresh_token_expires_at = $3, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(token)
        .bind(expires_at)
        .execute(&self.db)
        .await?;
        expect_row(done.rows_affected())
    }

    async fn issue_refresh_token(
        &self,
        id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
        seen_password_change: Option<OffsetDateTime>,
    ) -> StoreResult<bool> {
        let done = sqlx::query(
            r#"
            UPDATE users
            SET refresh_token = $2, refresh_token_expires_at = $3, updated_at = now()
            WHERE id = $1 AND password_changed_at IS NOT DISTINCT FROM $4
            "#,
        )
        .bind(id)
        .bind(token)
        .bind(expires_at)
        .bind(seen_password_change)
        .execute(&self.db)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> StoreResult<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET password_hash = $2,
                password_changed_at = $3,
                refresh_token = NULL,
                refresh_token_expires_at = NULL,
                updated_at = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(password_hash)
        .bind(OffsetDateTime::now_utc())
        .fetch_optional(&self.db)
        .await?;
        user.ok_or(AppError::NotFound)
    }

    async fn set_verified(&self, id: Uuid, verified: bool) -> StoreResult<()> {
        let done = sqlx::query(
            "UPDATE users SET is_verified = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(verified)
        .execute(&self.db)
        .await?;
        expect_row(done.rows_affected())
    }

    async fn set_blocked(&self, id: Uuid, blocked: bool) -> StoreResult<()> {
        let done = sqlx::query(
            "UPDATE users SET is_blocked = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(blocked)
        .execute(&self.db)
        .await?;
        expect_row(done.rows_affected())
    }
}
