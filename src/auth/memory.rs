//! In-memory [`UserStore`], used when no database is configured and in tests.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo::{StoreResult, UserStore};
use super::repo_types::{NewUser, User};
use crate::error::AppError;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    /// normalized email -> id; plays the role of the unique index.
    by_email: HashMap<String, Uuid>,
}

#[derive(Default)]
pub struct InMemoryUserStore {
    tables: RwLock<Tables>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| AppError::Internal(anyhow::anyhow!("user store lock poisoned")))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| AppError::Internal(anyhow::anyhow!("user store lock poisoned")))
    }

    fn update<T>(&self, id: Uuid, f: impl FnOnce(&mut User) -> T) -> StoreResult<T> {
        let mut tables = self.write()?;
        let user = tables.users.get_mut(&id).ok_or(AppError::NotFound)?;
        let out = f(user);
        user.updated_at = OffsetDateTime::now_utc();
        Ok(out)
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn insert(&self, new: NewUser) -> StoreResult<User> {
        // Check and insert under one write lock.
        let mut tables = self.write()?;
        if tables.by_email.contains_key(&new.email) {
            return Err(AppError::Conflict("Email already registered".into()));
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            name: new.name,
            email: new.email,
            password_hash: new.password_hash,
            refresh_token: None,
            refresh_token_expires_at: None,
            is_verified: false,
            is_blocked: false,
            password_changed_at: None,
            created_at: now,
            updated_at: now,
        };
        tables.by_email.insert(user.email.clone(), user.id);
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.read()?.users.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let tables = self.read()?;
        Ok(tables
            .by_email
            .get(email)
            .and_then(|id| tables.users.get(id))
            .cloned())
    }

    async fn find_by_refresh_token(&self, token: &str) -> StoreResult<Option<User>> {
        Ok(self
            .read()?
            .users
            .values()
            .find(|u| u.refresh_token.as_deref() == Some(token))
            .cloned())
    }

    async fn set_refresh_token(
        &self,
        id: Uuid,
        token: Option<(&str, OffsetDateTime)>,
    ) -> StoreResult<()> {
        self.update(id, |user| match token {
            Some((t, exp)) => {
                user.refresh_token = Some(t.to_string());
                user.refresh_token_expires_at = Some(exp);
            }
            None => {
                user.refresh_token = None;
                user.refresh_token_expires_at = None;
            }
        })
    }

    async fn issue_refresh_token(
        &self,
        id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
        seen_password_change: Option<OffsetDateTime>,
    ) -> StoreResult<bool> {
        let mut tables = self.write()?;
        let Some(user) = tables.users.get_mut(&id) else {
            return Ok(false);
        };
        if user.password_changed_at != seen_password_change {
            return Ok(false);
        }
        user.refresh_token = Some(token.to_string());
        user.refresh_token_expires_at = Some(expires_at);
        user.updated_at = OffsetDateTime::now_utc();
        Ok(true)
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> StoreResult<User> {
        self.update(id, |user| {
            user.password_hash = password_hash.to_string();
            user.password_changed_at = Some(OffsetDateTime::now_utc());
            user.refresh_token = None;
            user.refresh_token_expires_at = None;
        })?;
        self.find_by_id(id).await?.ok_or(AppError::NotFound)
    }

    async fn set_verified(&self, id: Uuid, verified: bool) -> StoreResult<()> {
        self.update(id, |user| user.is_verified = verified)
    }

    async fn set_blocked(&self, id: Uuid, blocked: bool) -> StoreResult<()> {
        self.update(id, |user| user.is_blocked = blocked)
    }
}
