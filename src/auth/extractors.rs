use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRef, FromRequest, FromRequestParts, Request},
    http::{header::AUTHORIZATION, request::Parts},
    Json,
};
use tracing::warn;

use super::claims::Scope;
use super::gate::{AuthGate, UserIdentity};
use crate::error::AppError;

/// Extracts and validates the bearer token, yielding the caller's identity.
pub struct AuthUser(pub UserIdentity);

/// Like [`AuthUser`], but refuses limited-scope (unverified) tokens.
pub struct VerifiedUser(pub UserIdentity);

/// `Json` body extractor whose rejections use the error envelope.
pub struct AppJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await.map_err(|rejection| {
            warn!(status = %rejection.status(), "request body rejected");
            AppError::from(rejection)
        })?;
        Ok(AppJson(value))
    }
}

fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AuthGate: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let gate = AuthGate::from_ref(state);

        // Read Authorization header
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or(AppError::Unauthorized)?;

        // Expect "Bearer <token>"
        let token = bearer_token(header).ok_or_else(|| {
            warn!("invalid auth scheme");
            AppError::Unauthorized
        })?;

        Ok(AuthUser(gate.authenticate(token).await?))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for VerifiedUser
where
    S: Send + Sync,
    AuthGate: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthUser(identity) = AuthUser::from_request_parts(parts, state).await?;
        if identity.scope != Scope::Full {
            return Err(AppError::Forbidden("Email verification required".into()));
        }
        Ok(VerifiedUser(identity))
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{self, header::CONTENT_TYPE},
    };
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct Credentials {
        email: String,
    }

    fn json_request(body: &'static str) -> Request {
        http::Request::builder()
            .method("POST")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_error(req: Request) -> AppError {
        match AppJson::<Credentials>::from_request(req, &()).await {
            Ok(_) => panic!("body should be rejected"),
            Err(err) => err,
        }
    }

    #[tokio::test]
    async fn well_formed_body_is_extracted() {
        let req = json_request(r#"{"email":"a@x.com"}"#);
        let AppJson(body) = AppJson::<Credentials>::from_request(req, &()).await.unwrap();
        assert_eq!(body.email, "a@x.com");
    }

    #[tokio::test]
    async fn bad_bodies_become_validation_errors() {
        for req in [
            json_request(r#"{"password":"x"}"#),
            json_request("{not json"),
            http::Request::builder()
                .method("POST")
                .body(Body::from(r#"{"email":"a@x.com"}"#))
                .unwrap(),
        ] {
            let err = body_error(req).await;
            assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
            let fields: Vec<_> = err.fields().iter().map(|f| f.field).collect();
            assert_eq!(fields, vec!["body"]);
            assert!(!err.fields()[0].message.is_empty());
        }
    }

    #[test]
    fn parses_bearer_scheme_case_insensitively() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer abc"), Some("abc"));
        assert_eq!(bearer_token("BEARER  abc "), Some("abc"));
    }

    #[test]
    fn rejects_other_schemes_and_empty_tokens() {
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Bearer"), None);
        assert_eq!(bearer_token("abc"), None);
    }
}
