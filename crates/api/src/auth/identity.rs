//! Bearer credential → principal resolution

use std::sync::Arc;

use axum::http::{header::AUTHORIZATION, HeaderMap};
use parley_shared::{Principal, PrincipalId, ProfileDirectory, StoreError};

use super::jwt::{JwtError, JwtManager};

/// Why a handshake credential was refused
#[derive(Debug, thiserror::Error)]
pub enum AuthFailure {
    #[error("Missing bearer credential")]
    MissingToken,
    #[error("Token has expired")]
    Expired,
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    #[error("Unknown principal {0}")]
    UnknownPrincipal(PrincipalId),
    #[error("Token principal {actual} does not match declared user {declared}")]
    PrincipalMismatch { actual: PrincipalId, declared: String },
    #[error("Identity lookup failed: {0}")]
    Unavailable(#[from] StoreError),
}

impl From<JwtError> for AuthFailure {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => AuthFailure::Expired,
            other => AuthFailure::InvalidToken(other.to_string()),
        }
    }
}

/// Pick the bearer token out of the handshake.
///
/// An explicit payload token wins; otherwise `Authorization: Bearer <token>`
/// (scheme matched case-insensitively).
pub fn extract_credential(explicit: Option<&str>, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = explicit.map(str::trim).filter(|t| !t.is_empty()) {
        return Some(token.to_string());
    }

    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token.to_string())
    } else {
        None
    }
}

/// Turns a verified credential into a principal, creating a default
/// profile on first contact.
#[derive(Clone)]
pub struct IdentityResolver {
    jwt: JwtManager,
    directory: Arc<dyn ProfileDirectory>,
}

impl IdentityResolver {
    pub fn new(jwt: JwtManager, directory: Arc<dyn ProfileDirectory>) -> Self {
        Self { jwt, directory }
    }

    pub async fn resolve(&self, token: &str) -> Result<Principal, AuthFailure> {
        let claims = self.jwt.validate_access_token(token)?;

        if !self.directory.user_exists(claims.sub).await? {
            return Err(AuthFailure::UnknownPrincipal(claims.sub));
        }

        let role = self.directory.ensure_profile(claims.sub).await?;
        Ok(Principal { id: claims.sub, role })
    }
}
