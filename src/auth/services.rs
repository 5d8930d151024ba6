use axum::extract::FromRef;
use lazy_static::lazy_static;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::claims::Scope;
use super::credentials::{check_password, CredentialStore};
use super::jwt::JwtKeys;
use super::password::{hash_password, hash_password_async, verify_password_async};
use super::repo_types::User;
use crate::config::{AuthPolicy, UnverifiedPolicy};
use crate::error::{AppError, FieldError};
use crate::state::AppState;

lazy_static! {
    /// Hash checked against when the email is unknown, so both login
    /// failure paths cost one argon2 verification.
    static ref DUMMY_HASH: Option<String> = hash_password("teamflow-no-such-user").ok();
}

/// Builds the dummy hash up front so the first unknown-email login costs the
/// same as any other failed login.
pub fn warm_dummy_hash() {
    lazy_static::initialize(&DUMMY_HASH);
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// A signed-in user and the tokens minted for them.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: User,
    pub scope: Scope,
    pub tokens: TokenPair,
}

#[derive(Debug, Clone)]
pub enum SignupOutcome {
    SignedIn(Session),
    /// Account created, but policy forbids unverified logins.
    PendingVerification(User),
}

#[derive(Debug, Clone)]
pub struct Refreshed {
    pub access_token: String,
    /// Only set when refresh tokens rotate.
    pub refresh_token: Option<String>,
}

/// Mints and invalidates sessions. Each user has at most one live refresh
/// token; minting a new one replaces the old.
#[derive(Clone)]
pub struct SessionIssuer {
    credentials: CredentialStore,
    keys: JwtKeys,
    policy: AuthPolicy,
}

impl FromRef<AppState> for SessionIssuer {
    fn from_ref(state: &AppState) -> Self {
        Self::new(
            state.credentials.clone(),
            state.keys.clone(),
            state.config.auth.clone(),
        )
    }
}

impl SessionIssuer {
    pub fn new(credentials: CredentialStore, keys: JwtKeys, policy: AuthPolicy) -> Self {
        Self {
            credentials,
            keys,
            policy,
        }
    }

    /// Account-state gate shared by every path that hands out tokens.
    fn admit(&self, user: &User) -> Result<Scope, AppError> {
        if user.is_blocked {
            warn!(user_id = %user.id, "blocked account refused");
            return Err(AppError::Forbidden("Account is blocked".into()));
        }
        if user.is_verified {
            return Ok(Scope::Full);
        }
        match self.policy.unverified {
            UnverifiedPolicy::Allow => Ok(Scope::Full),
            UnverifiedPolicy::Restricted => Ok(Scope::Limited),
            UnverifiedPolicy::Reject => {
                warn!(user_id = %user.id, "unverified account refused");
                Err(AppError::Forbidden("Email address is not verified".into()))
            }
        }
    }

    /// Stores a new refresh token for `user`, a snapshot read before admission.
    /// Fails if the password changed since that read.
    async fn issue_refresh_token(&self, user: &User) -> Result<String, AppError> {
        let (token, expires_at) = self.keys.new_refresh_token();
        if !self
            .credentials
            .issue_refresh_token(user, &token, expires_at)
            .await?
        {
            warn!(user_id = %user.id, "password changed while issuing session");
            return Err(AppError::Unauthorized);
        }
        Ok(token)
    }

    async fn start_session(&self, user: User, scope: Scope) -> Result<Session, AppError> {
        let refresh_token = self.issue_refresh_token(&user).await?;
        let access_token = self
            .keys
            .sign_access(user.id, scope, user.password_changed_at)?;
        Ok(Session {
            user,
            scope,
            tokens: TokenPair {
                access_token,
                refresh_token,
            },
        })
    }

    #[instrument(skip(self, name, password))]
    pub async fn signup(&self, name: &str, email: &str, password: &str) -> Result<SignupOutcome, AppError> {
        let user = self.credentials.create_user(name, email, password).await?;
        match self.admit(&user) {
            Ok(scope) => Ok(SignupOutcome::SignedIn(self.start_session(user, scope).await?)),
            Err(AppError::Forbidden(_)) => Ok(SignupOutcome::PendingVerification(user)),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, AppError> {
        let Some(user) = self.credentials.find_by_email(email).await? else {
            if let Some(dummy) = &*DUMMY_HASH {
                let _ = verify_password_async(password.to_string(), dummy.clone()).await;
            }
            warn!("login unknown email");
            return Err(AppError::Unauthorized);
        };

        let ok = verify_password_async(password.to_string(), user.password_hash.clone()).await?;
        if !ok {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AppError::Unauthorized);
        }

        let scope = self.admit(&user)?;
        let session = self.start_session(user, scope).await?;
        info!(user_id = %session.user.id, scope = ?scope, "user logged in");
        Ok(session)
    }

    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<Refreshed, AppError> {
        let Some(user) = self.credentials.find_by_refresh_token(refresh_token).await? else {
            warn!("unknown refresh token");
            return Err(AppError::Unauthorized);
        };
        let live = user
            .refresh_token_expires_at
            .is_some_and(|exp| exp > OffsetDateTime::now_utc());
        if !live {
            warn!(user_id = %user.id, "expired refresh token");
            return Err(AppError::Unauthorized);
        }

        let scope = self.admit(&user)?;
        let refresh_token = if self.policy.rotate_refresh_tokens {
            Some(self.issue_refresh_token(&user).await?)
        } else {
            None
        };
        let access_token = self
            .keys
            .sign_access(user.id, scope, user.password_changed_at)?;
        info!(user_id = %user.id, rotated = refresh_token.is_some(), "access token refreshed");
        Ok(Refreshed {
            access_token,
            refresh_token,
        })
    }

    #[instrument(skip(self))]
    pub async fn logout(&self, user_id: Uuid) -> Result<(), AppError> {
        self.credentials.set_refresh_token(user_id, None).await?;
        info!(user_id = %user_id, "user logged out");
        Ok(())
    }

    /// Replaces the password. Every access token issued before this call
    /// stops authenticating; the returned session is the only live one.
    #[instrument(skip(self, current, new))]
    pub async fn change_password(&self, user_id: Uuid, current: &str, new: &str) -> Result<Session, AppError> {
        let user = self
            .credentials
            .find_by_id(user_id)
            .await?
            .ok_or(AppError::Unauthorized)?;

        let mut errors = Vec::new();
        let ok = verify_password_async(current.to_string(), user.password_hash.clone()).await?;
        if !ok {
            errors.push(FieldError::new("current_password", "Current password is incorrect"));
        }
        errors.extend(check_password(new, "new_password"));
        if !errors.is_empty() {
            warn!(user_id = %user_id, "password change rejected");
            return Err(AppError::Validation(errors));
        }

        let new_hash = hash_password_async(new.to_string()).await?;
        let user = self.credentials.update_password(user_id, &new_hash).await?;
        let scope = self.admit(&user)?;
        self.start_session(user, scope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::gate::AuthGate;
    use crate::state::test_support::{config_with, state_with};

    fn issuer(policy: AuthPolicy) -> (SessionIssuer, CredentialStore) {
        let state = state_with(config_with(policy));
        (SessionIssuer::from_ref(&state), state.credentials.clone())
    }

    fn restricted() -> AuthPolicy {
        AuthPolicy::default()
    }

    #[tokio::test]
    async fn signup_then_case_insensitive_login() {
        let (issuer, _) = issuer(restricted());
        issuer.signup("Ann", "Ann@X.com", "secret1").await.unwrap();

        let session = issuer.login("ann@x.com", "secret1").await.unwrap();
        assert_eq!(session.user.email, "ann@x.com");
        assert_ne!(session.tokens.access_token, session.tokens.refresh_token);
        assert!(!session.tokens.access_token.is_empty());
    }

    #[tokio::test]
    async fn login_refresh_token_satisfies_refresh() {
        let (issuer, _) = issuer(restricted());
        issuer.signup("Ann", "ann@x.com", "secret1").await.unwrap();
        let session = issuer.login("ann@x.com", "secret1").await.unwrap();

        let refreshed = issuer.refresh(&session.tokens.refresh_token).await.unwrap();
        assert!(!refreshed.access_token.is_empty());
        assert!(refreshed.refresh_token.is_none());
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized_and_keeps_session() {
        let (issuer, creds) = issuer(restricted());
        issuer.signup("Ann", "ann@x.com", "secret1").await.unwrap();
        let session = issuer.login("ann@x.com", "secret1").await.unwrap();

        let err = issuer.login("ann@x.com", "wrong-pass").await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));

        let stored = creds.find_by_email("ann@x.com").await.unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some(session.tokens.refresh_token.as_str()));
    }

    #[tokio::test]
    async fn unknown_email_is_plain_unauthorized() {
        let (issuer, _) = issuer(restricted());
        let err = issuer.login("unknown@x.com", "x").await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[tokio::test]
    async fn second_login_replaces_refresh_token() {
        let (issuer, _) = issuer(restricted());
        issuer.signup("Ann", "ann@x.com", "secret1").await.unwrap();
        let first = issuer.login("ann@x.com", "secret1").await.unwrap();
        let second = issuer.login("ann@x.com", "secret1").await.unwrap();
        assert_ne!(first.tokens.refresh_token, second.tokens.refresh_token);

        assert!(matches!(
            issuer.refresh(&first.tokens.refresh_token).await,
            Err(AppError::Unauthorized)
        ));
        assert!(issuer.refresh(&second.tokens.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn logout_kills_refresh_token() {
        let (issuer, _) = issuer(restricted());
        issuer.signup("Ann", "ann@x.com", "secret1").await.unwrap();
        let session = issuer.login("ann@x.com", "secret1").await.unwrap();

        issuer.logout(session.user.id).await.unwrap();
        assert!(matches!(
            issuer.refresh(&session.tokens.refresh_token).await,
            Err(AppError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn blocked_account_is_forbidden() {
        let (issuer, creds) = issuer(restricted());
        issuer.signup("Ann", "ann@x.com", "secret1").await.unwrap();
        let session = issuer.login("ann@x.com", "secret1").await.unwrap();
        creds.set_blocked(session.user.id, true).await.unwrap();

        assert!(matches!(
            issuer.login("ann@x.com", "secret1").await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            issuer.refresh(&session.tokens.refresh_token).await,
            Err(AppError::Forbidden(_))
        ));

        creds.set_blocked(session.user.id, false).await.unwrap();
        assert!(issuer.login("ann@x.com", "secret1").await.is_ok());
    }

    #[tokio::test]
    async fn wrong_password_on_blocked_account_stays_unauthorized() {
        let (issuer, creds) = issuer(restricted());
        let SignupOutcome::SignedIn(session) = issuer.signup("Ann", "ann@x.com", "secret1").await.unwrap() else {
            panic!("restricted policy signs new users in");
        };
        creds.set_blocked(session.user.id, true).await.unwrap();
        assert!(matches!(
            issuer.login("ann@x.com", "nope-nope").await,
            Err(AppError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn unverified_policies() {
        let (restricted_issuer, _) = issuer(restricted());
        restricted_issuer.signup("Ann", "ann@x.com", "secret1").await.unwrap();
        let session = restricted_issuer.login("ann@x.com", "secret1").await.unwrap();
        assert_eq!(session.scope, Scope::Limited);

        let (allow_issuer, _) = issuer(AuthPolicy {
            unverified: UnverifiedPolicy::Allow,
            ..AuthPolicy::default()
        });
        allow_issuer.signup("Ann", "ann@x.com", "secret1").await.unwrap();
        assert_eq!(allow_issuer.login("ann@x.com", "secret1").await.unwrap().scope, Scope::Full);

        let (reject_issuer, creds) = issuer(AuthPolicy {
            unverified: UnverifiedPolicy::Reject,
            ..AuthPolicy::default()
        });
        let outcome = reject_issuer.signup("Ann", "ann@x.com", "secret1").await.unwrap();
        let SignupOutcome::PendingVerification(user) = outcome else {
            panic!("reject policy must not sign unverified users in");
        };
        assert!(user.refresh_token.is_none());
        assert!(matches!(
            reject_issuer.login("ann@x.com", "secret1").await,
            Err(AppError::Forbidden(_))
        ));

        creds.set_verified(user.id, true).await.unwrap();
        let session = reject_issuer.login("ann@x.com", "secret1").await.unwrap();
        assert_eq!(session.scope, Scope::Full);
    }

    #[tokio::test]
    async fn rotation_issues_new_refresh_token() {
        let (issuer, _) = issuer(AuthPolicy {
            rotate_refresh_tokens: true,
            ..AuthPolicy::default()
        });
        issuer.signup("Ann", "ann@x.com", "secret1").await.unwrap();
        let session = issuer.login("ann@x.com", "secret1").await.unwrap();

        let refreshed = issuer.refresh(&session.tokens.refresh_token).await.unwrap();
        let rotated = refreshed.refresh_token.expect("rotated token");
        assert_ne!(rotated, session.tokens.refresh_token);

        assert!(matches!(
            issuer.refresh(&session.tokens.refresh_token).await,
            Err(AppError::Unauthorized)
        ));
        assert!(issuer.refresh(&rotated).await.is_ok());
    }

    #[tokio::test]
    async fn expired_refresh_token_is_rejected() {
        let (issuer, creds) = issuer(restricted());
        issuer.signup("Ann", "ann@x.com", "secret1").await.unwrap();
        let session = issuer.login("ann@x.com", "secret1").await.unwrap();

        let past = OffsetDateTime::now_utc() - time::Duration::minutes(1);
        creds
            .set_refresh_token(session.user.id, Some((session.tokens.refresh_token.as_str(), past)))
            .await
            .unwrap();
        assert!(matches!(
            issuer.refresh(&session.tokens.refresh_token).await,
            Err(AppError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn change_password_invalidates_old_tokens() {
        let state = state_with(config_with(restricted()));
        let issuer = SessionIssuer::from_ref(&state);
        let gate = AuthGate::from_ref(&state);

        issuer.signup("Ann", "ann@x.com", "secret1").await.unwrap();
        let old = issuer.login("ann@x.com", "secret1").await.unwrap();
        assert!(gate.authenticate(&old.tokens.access_token).await.is_ok());

        let new = issuer
            .change_password(old.user.id, "secret1", "secret2")
            .await
            .unwrap();

        assert!(matches!(
            gate.authenticate(&old.tokens.access_token).await,
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            issuer.refresh(&old.tokens.refresh_token).await,
            Err(AppError::Unauthorized)
        ));
        assert!(gate.authenticate(&new.tokens.access_token).await.is_ok());
        assert!(issuer.login("ann@x.com", "secret1").await.is_err());
        assert!(issuer.login("ann@x.com", "secret2").await.is_ok());
    }

    #[tokio::test]
    async fn session_admitted_before_password_change_is_refused() {
        let state = state_with(config_with(restricted()));
        let issuer = SessionIssuer::from_ref(&state);
        let gate = AuthGate::from_ref(&state);
        let creds = state.credentials.clone();

        issuer.signup("Ann", "ann@x.com", "secret1").await.unwrap();
        creds
            .set_verified(creds.find_by_email("ann@x.com").await.unwrap().unwrap().id, true)
            .await
            .unwrap();
        // A login that checked the old password and is about to issue tokens.
        let stale = creds.find_by_email("ann@x.com").await.unwrap().unwrap();

        let changed = issuer
            .change_password(stale.id, "secret1", "secret2")
            .await
            .unwrap();

        assert!(matches!(
            issuer.start_session(stale, Scope::Full).await,
            Err(AppError::Unauthorized)
        ));
        let stored = creds.find_by_email("ann@x.com").await.unwrap().unwrap();
        assert_eq!(
            stored.refresh_token.as_deref(),
            Some(changed.tokens.refresh_token.as_str())
        );
        assert!(gate.authenticate(&changed.tokens.access_token).await.is_ok());
    }

    #[tokio::test]
    async fn rotation_after_password_change_is_refused() {
        let (issuer, creds) = issuer(AuthPolicy {
            rotate_refresh_tokens: true,
            ..AuthPolicy::default()
        });
        issuer.signup("Ann", "ann@x.com", "secret1").await.unwrap();
        let stale = creds.find_by_email("ann@x.com").await.unwrap().unwrap();
        let new_hash = hash_password("secret2").unwrap();
        creds.update_password(stale.id, &new_hash).await.unwrap();

        assert!(matches!(
            issuer.issue_refresh_token(&stale).await,
            Err(AppError::Unauthorized)
        ));
        let stored = creds.find_by_id(stale.id).await.unwrap().unwrap();
        assert!(stored.refresh_token.is_none());
    }

    #[test]
    fn dummy_hash_is_ready_after_warm_up() {
        warm_dummy_hash();
        let dummy = DUMMY_HASH.as_deref().expect("dummy hash");
        assert!(dummy.starts_with("$argon2"));
    }

    #[tokio::test]
    async fn change_password_validates_both_fields() {
        let (issuer, _) = issuer(restricted());
        issuer.signup("Ann", "ann@x.com", "secret1").await.unwrap();
        let session = issuer.login("ann@x.com", "secret1").await.unwrap();

        let err = issuer
            .change_password(session.user.id, "not-it", "123")
            .await
            .unwrap_err();
        let fields: Vec<_> = err.fields().iter().map(|f| f.field).collect();
        assert_eq!(fields, vec!["current_password", "new_password"]);
    }
}
