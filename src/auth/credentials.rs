use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{info, instrument};
use uuid::Uuid;

use super::password::hash_password_async;
use super::repo::UserStore;
use super::repo_types::{NewUser, User};
use crate::error::{AppError, FieldError};

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_PASSWORD_LEN: usize = 128;
pub const MAX_NAME_LEN: usize = 100;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Trim + lowercase; the form every email is stored and looked up in.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn check_password(password: &str, field: &'static str) -> Option<FieldError> {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LEN {
        Some(FieldError::new(
            field,
            format!("Password must be at least {MIN_PASSWORD_LEN} characters"),
        ))
    } else if len > MAX_PASSWORD_LEN {
        Some(FieldError::new(
            field,
            format!("Password must be at most {MAX_PASSWORD_LEN} characters"),
        ))
    } else {
        None
    }
}

/// Validates already-normalized signup input, reporting every bad field.
fn validate_signup(name: &str, email: &str, password: &str) -> Result<(), AppError> {
    let mut errors = Vec::new();
    if name.is_empty() {
        errors.push(FieldError::new("name", "Name is required"));
    } else if name.chars().count() > MAX_NAME_LEN {
        errors.push(FieldError::new(
            "name",
            format!("Name must be at most {MAX_NAME_LEN} characters"),
        ));
    }
    if !is_valid_email(email) {
        errors.push(FieldError::new("email", "Invalid email format"));
    }
    errors.extend(check_password(password, "password"));

    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(errors))
    }
}

/// Domain front of the user store: the only code that writes credentials,
/// and the only place plaintext passwords are turned into hashes.
#[derive(Clone)]
pub struct CredentialStore {
    users: Arc<dyn UserStore>,
}

impl CredentialStore {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    #[instrument(skip(self, name, password))]
    pub async fn create_user(&self, name: &str, email: &str, password: &str) -> Result<User, AppError> {
        let name = name.trim();
        let email = normalize_email(email);
        validate_signup(name, &email, password)?;

        let password_hash = hash_password_async(password.to_string()).await?;
        let user = self
            .users
            .insert(NewUser {
                name: name.to_string(),
                email,
                password_hash,
            })
            .await?;
        info!(user_id = %user.id, "user created");
        Ok(user)
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        self.users.find_by_email(&normalize_email(email)).await
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        self.users.find_by_id(id).await
    }

    pub async fn find_by_refresh_token(&self, token: &str) -> Result<Option<User>, AppError> {
        if token.is_empty() {
            return Ok(None);
        }
        self.users.find_by_refresh_token(token).await
    }

    pub async fn set_refresh_token(
        &self,
        user_id: Uuid,
        token: Option<(&str, OffsetDateTime)>,
    ) -> Result<(), AppError> {
        self.users.set_refresh_token(user_id, token).await
    }

    /// Guarded write of a new refresh token; see [`UserStore::issue_refresh_token`].
    pub async fn issue_refresh_token(
        &self,
        user: &User,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> Result<bool, AppError> {
        self.users
            .issue_refresh_token(user.id, token, expires_at, user.password_changed_at)
            .await
    }

    /// `new_hash` must come from the password hasher.
    pub async fn update_password(&self, user_id: Uuid, new_hash: &str) -> Result<User, AppError> {
        let user = self.users.update_password(user_id, new_hash).await?;
        info!(user_id = %user_id, "password updated");
        Ok(user)
    }

    pub async fn set_verified(&self, user_id: Uuid, verified: bool) -> Result<(), AppError> {
        self.users.set_verified(user_id, verified).await
    }

    /// Administrative block; lifting it is the only way back.
    pub async fn set_blocked(&self, user_id: Uuid, blocked: bool) -> Result<(), AppError> {
        self.users.set_blocked(user_id, blocked).await?;
        info!(user_id = %user_id, blocked, "account block flag changed");
        Ok(())
    }
}
