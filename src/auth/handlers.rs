use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            AuthResponse, ChangePasswordRequest, LoginRequest, MeResponse, MessageResponse,
            PublicUser, RefreshRequest, RefreshResponse, SignupRequest,
        },
        extractors::{AppJson, AuthUser, VerifiedUser},
        services::{Session, SessionIssuer, SignupOutcome},
    },
    error::AppError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/password", post(change_password))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

fn session_response(session: Session, message: &str) -> AuthResponse {
    AuthResponse {
        success: true,
        message: message.to_string(),
        token: Some(session.tokens.access_token),
        refresh_token: Some(session.tokens.refresh_token),
        user: PublicUser::from(session.user),
    }
}

#[instrument(skip(issuer, payload))]
pub async fn signup(
    State(issuer): State<SessionIssuer>,
    AppJson(payload): AppJson<SignupRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let body = match issuer
        .signup(&payload.name, &payload.email, &payload.password)
        .await?
    {
        SignupOutcome::SignedIn(session) => session_response(session, "Account created"),
        SignupOutcome::PendingVerification(user) => AuthResponse {
            success: true,
            message: "Account created; verify your email address before logging in".into(),
            token: None,
            refresh_token: None,
            user: PublicUser::from(user),
        },
    };
    Ok((StatusCode::CREATED, Json(body)))
}

#[instrument(skip(issuer, payload))]
pub async fn login(
    State(issuer): State<SessionIssuer>,
    AppJson(payload): AppJson<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let session = issuer.login(&payload.email, &payload.password).await?;
    Ok(Json(session_response(session, "Logged in")))
}

#[instrument(skip(issuer, payload))]
pub async fn refresh(
    State(issuer): State<SessionIssuer>,
    AppJson(payload): AppJson<RefreshRequest>,
) -> Result<Json<RefreshResponse>, AppError> {
    let refreshed = issuer.refresh(&payload.refresh_token).await?;
    Ok(Json(RefreshResponse {
        token: refreshed.access_token,
        refresh_token: refreshed.refresh_token,
    }))
}

#[instrument(skip(issuer, identity), fields(user_id = %identity.id))]
pub async fn logout(
    State(issuer): State<SessionIssuer>,
    AuthUser(identity): AuthUser,
) -> Result<Json<MessageResponse>, AppError> {
    issuer.logout(identity.id).await?;
    Ok(Json(MessageResponse {
        success: true,
        message: "Logged out".into(),
    }))
}

#[instrument(skip(issuer, identity, payload), fields(user_id = %identity.id))]
pub async fn change_password(
    State(issuer): State<SessionIssuer>,
    VerifiedUser(identity): VerifiedUser,
    AppJson(payload): AppJson<ChangePasswordRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let session = issuer
        .change_password(identity.id, &payload.current_password, &payload.new_password)
        .await?;
    Ok(Json(session_response(session, "Password changed")))
}

#[instrument(skip(identity), fields(user_id = %identity.id))]
pub async fn get_me(AuthUser(identity): AuthUser) -> Json<MeResponse> {
    Json(MeResponse {
        id: identity.id,
        name: identity.name,
        email: identity.email,
        is_verified: identity.is_verified,
        scope: identity.scope,
    })
}
