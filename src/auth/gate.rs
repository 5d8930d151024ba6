use axum::extract::FromRef;
use tracing::{debug, warn};
use uuid::Uuid;

use super::claims::Scope;
use super::credentials::CredentialStore;
use super::jwt::{unix_millis, JwtKeys};
use crate::error::AppError;
use crate::state::AppState;

/// Who a valid access token speaks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub is_verified: bool,
    pub scope: Scope,
}

/// Resolves access tokens to identities. Read-only.
#[derive(Clone)]
pub struct AuthGate {
    credentials: CredentialStore,
    keys: JwtKeys,
}

impl FromRef<AppState> for AuthGate {
    fn from_ref(state: &AppState) -> Self {
        Self::new(state.credentials.clone(), state.keys.clone())
    }
}

impl AuthGate {
    pub fn new(credentials: CredentialStore, keys: JwtKeys) -> Self {
        Self { credentials, keys }
    }

    pub async fn authenticate(&self, token: &str) -> Result<UserIdentity, AppError> {
        let claims = self.keys.verify(token).map_err(|e| {
            debug!(error = %e, "access token rejected");
            AppError::Unauthorized
        })?;

        let Some(user) = self.credentials.find_by_id(claims.sub).await? else {
            warn!(user_id = %claims.sub, "token for unknown user");
            return Err(AppError::Unauthorized);
        };
        if user.is_blocked {
            warn!(user_id = %user.id, "token for blocked user");
            return Err(AppError::Unauthorized);
        }
        if claims.pwd_at != user.password_changed_at.map(unix_millis) {
            debug!(user_id = %user.id, "token predates password change");
            return Err(AppError::Unauthorized);
        }

        Ok(UserIdentity {
            id: user.id,
            name: user.name,
            email: user.email,
            is_verified: user.is_verified,
            scope: claims.scope,
        })
    }
}
