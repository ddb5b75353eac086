// Bearer token validation for the principal extractor.
// HS256 with a shared secret; issuance lives here too so operators and tests
// can mint tokens, but there is no login or refresh endpoint.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::UserId;

const ACCESS_TOKEN_TYPE: &str = "access";
const DEFAULT_ACCESS_TOKEN_LIFETIME_MINUTES: i64 = 60;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),

    #[error("wrong token type '{0}'")]
    WrongType(String),

    #[error("malformed subject '{0}'")]
    MalformedSubject(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccessTokenClaims {
    /// Subject (user ID)
    pub sub: String,
    pub token_type: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
}

#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_lifetime: Duration,
}

impl JwtService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_token_lifetime: Duration::minutes(DEFAULT_ACCESS_TOKEN_LIFETIME_MINUTES),
        }
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.access_token_lifetime = lifetime;
        self
    }

    pub fn issue_access_token(&self, user_id: UserId) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = AccessTokenClaims {
            sub: user_id.to_string(),
            token_type: ACCESS_TOKEN_TYPE.to_string(),
            exp: (now + self.access_token_lifetime).timestamp(),
            iat: now.timestamp(),
        };

        Ok(encode(&Header::default(), &claims, &self.encoding_key)?)
    }

    /// Validates signature, expiry and token type, returning the user id.
    pub fn validate_access_token(&self, token: &str) -> Result<UserId, TokenError> {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        let claims = decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)?.claims;
        if claims.token_type != ACCESS_TOKEN_TYPE {
            return Err(TokenError::WrongType(claims.token_type));
        }

        claims
            .sub
            .parse()
            .map_err(|_| TokenError::MalformedSubject(claims.sub))
    }
}
