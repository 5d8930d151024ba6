use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What an access token is allowed to do.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Full,
    /// Issued to unverified accounts under the `restricted` policy.
    Limited,
}

/// JWT payload of an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,      // user ID
    pub iat: usize,     // issued at (unix timestamp)
    pub exp: usize,     // expires at (unix timestamp)
    pub iss: String,    // issuer
    pub aud: String,    // audience
    pub pwd_at: Option<i64>, // password_changed_at (unix ms) the token was issued under
    pub scope: Scope,
}
