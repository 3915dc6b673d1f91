//! JWT token generation and validation

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use parley_shared::PrincipalId;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Claims carried by a bearer token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (principal ID)
    pub sub: PrincipalId,
    /// Issued at
    pub iat: i64,
    /// Expiration
    pub exp: i64,
    /// Token type; refresh tokens from the account service are refused
    pub token_type: TokenType,
    /// JWT ID
    pub jti: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Accepted clock skew when checking `exp`, in seconds
const LEEWAY_SECS: u64 = 60;

/// Signs and verifies HS256 bearer tokens
#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
}

impl JwtManager {
    /// `access_ttl_hours` may be negative to mint already-expired tokens in tests
    pub fn new(secret: &str, access_ttl_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl: Duration::hours(access_ttl_hours),
        }
    }

    /// Issue an access token. Returns `(token, jti)`.
    pub fn generate_access_token(&self, subject: PrincipalId) -> Result<(String, String), JwtError> {
        self.issue(subject, TokenType::Access, self.access_ttl)
    }

    fn issue(&self, subject: PrincipalId, token_type: TokenType, ttl: Duration) -> Result<(String, String), JwtError> {
        let issued_at = OffsetDateTime::now_utc();
        let jti = Uuid::new_v4().to_string();
        let claims = Claims {
            sub: subject,
            iat: issued_at.unix_timestamp(),
            exp: (issued_at + ttl).unix_timestamp(),
            token_type,
            jti: jti.clone(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| JwtError::Encoding(e.to_string()))?;
        Ok((token, jti))
    }

    /// Verify signature and expiry of a token of any type
    pub fn validate_token(&self, token: &str) -> Result<Claims, JwtError> {
        // Pinning the algorithm rejects `none` and RS/HS confusion
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = LEEWAY_SECS;

        let data = decode::<Claims>(token, &self.decoding_key, &validation)?;
        Ok(data.claims)
    }

    /// Verify a token and require it to be an access token
    pub fn validate_access_token(&self, token: &str) -> Result<Claims, JwtError> {
        let claims = self.validate_token(token)?;
        match claims.token_type {
            TokenType::Access => Ok(claims),
            TokenType::Refresh => Err(JwtError::WrongTokenType),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Token has expired")]
    Expired,
    #[error("Invalid token")]
    Invalid,
    #[error("Wrong token type")]
    WrongTokenType,
    #[error("Token encoding failed: {0}")]
    Encoding(String),
    #[error("Token validation failed: {0}")]
    Validation(String),
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => JwtError::Expired,
            ErrorKind::InvalidToken | ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                JwtError::Invalid
            }
            _ => JwtError::Validation(err.to_string()),
        }
    }
}
