//! Signed JWT access and refresh tokens.

use crate::auth::repository::UserRepository;
use crate::auth::strategy::AuthStrategy;
use crate::auth::user::{AuthenticatedUser, Credentials, TokenData};
use crate::error::AppError;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

const REFRESH_TOKEN_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    /// `access` or `refresh`.
    #[serde(rename = "type")]
    pub token_type: String,
}

/// JWT strategy settings: `{secret_key, algorithm, expire_minutes}`.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtSettings {
    pub secret_key: String,
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    #[serde(default = "default_expire_minutes")]
    pub expire_minutes: i64,
}

fn default_algorithm() -> String {
    "HS256".to_string()
}

fn default_expire_minutes() -> i64 {
    30
}

pub struct JwtStrategy {
    users: Arc<dyn UserRepository>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    expire_minutes: i64,
}

impl JwtStrategy {
    /// # Errors
    ///
    /// Returns [`AppError::InvalidValue`] for an empty secret or a non-HMAC algorithm.
    pub fn new(settings: &JwtSettings, users: Arc<dyn UserRepository>) -> Result<Self, AppError> {
        if settings.secret_key.is_empty() {
            return Err(AppError::invalid_value("JWT secret_key must not be empty"));
        }

        let algorithm = Algorithm::from_str(&settings.algorithm)
            .map_err(|_| AppError::invalid_value(format!("Unknown JWT algorithm: {}", settings.algorithm)))?;
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(AppError::invalid_value(format!(
                "Unsupported JWT algorithm for shared secrets: {}",
                settings.algorithm
            )));
        }

        let secret = settings.secret_key.as_bytes();
        Ok(Self {
            users,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            algorithm,
            expire_minutes: settings.expire_minutes,
        })
    }

    fn issue(&self, user_id: &str, token_type: &str, lifetime: Duration) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (now + lifetime).timestamp(),
            iat: now.timestamp(),
            token_type: token_type.to_string(),
        };

        encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| AppError::internal(format!("Failed to sign token: {}", e)))
    }

    /// Decodes a token and checks signature, expiry and type.
    pub fn decode_claims(&self, token: &str, expected_type: &str) -> Option<Claims> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;

        match decode::<Claims>(token, &self.decoding_key, &validation) {
            Ok(data) if data.claims.token_type == expected_type => Some(data.claims),
            Ok(data) => {
                debug!(token_type = %data.claims.token_type, "Rejected JWT of wrong type");
                None
            }
            Err(e) => {
                debug!("Rejected JWT: {}", e);
                None
            }
        }
    }

    /// Issues a refresh token valid for seven days.
    pub fn create_refresh_token(&self, user_id: &str) -> Result<String, AppError> {
        self.issue(user_id, "refresh", Duration::days(REFRESH_TOKEN_DAYS))
    }
}

#[async_trait]
impl AuthStrategy for JwtStrategy {
    fn name(&self) -> &'static str {
        "jwt"
    }

    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Option<AuthenticatedUser>, AppError> {
        match credentials {
            Credentials::Password { username, password } => {
                let record = self.users.verify_password(username, password).await?;
                Ok(record.filter(|r| r.active).map(|r| r.to_user(self.name())))
            }
            Credentials::Bearer(token) => self.validate_token(token).await,
            _ => Ok(None),
        }
    }

    async fn create_token(&self, user_id: &str) -> Result<TokenData, AppError> {
        let token = self.issue(user_id, "access", Duration::minutes(self.expire_minutes))?;
        let expires_in = u64::try_from(self.expire_minutes * 60).ok();
        Ok(TokenData::bearer(token, expires_in))
    }

    async fn validate_token(&self, token: &str) -> Result<Option<AuthenticatedUser>, AppError> {
        let Some(claims) = self.decode_claims(token, "access") else {
            return Ok(None);
        };

        let record = self.users.find_by_id(&claims.sub).await?;
        Ok(record.filter(|r| r.active).map(|r| r.to_user(self.name())))
    }

    async fn refresh_token(&self, token: &str) -> Result<Option<TokenData>, AppError> {
        match self.decode_claims(token, "refresh") {
            Some(claims) => self.create_token(&claims.sub).await.map(Some),
            None => Ok(None),
        }
    }
}
