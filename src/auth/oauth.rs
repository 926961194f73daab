//! OAuth2 strategy: exchanges a provider access token for internal tokens.

use crate::auth::strategy::AuthStrategy;
use crate::auth::user::{AuthenticatedUser, Credentials, TokenData};
use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

const ACCESS_PREFIX: &str = "oauth_";
const REFRESH_PREFIX: &str = "oauth_refresh_";

/// Profile returned by an identity provider for a valid access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderUser {
    pub provider_id: String,
    pub username: String,
    pub email: Option<String>,
}

/// A third-party identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Resolves a provider-issued access token. `Ok(None)` if the provider rejects it.
    async fn get_user_info(&self, access_token: &str) -> Result<Option<ProviderUser>, AppError>;
}

#[derive(Debug, Clone)]
struct IssuedToken {
    user_id: String,
    expires_at: DateTime<Utc>,
    refresh: bool,
}

pub struct OAuth2Strategy {
    providers: HashMap<String, Arc<dyn IdentityProvider>>,
    tokens: DashMap<String, IssuedToken>,
    users: DashMap<String, AuthenticatedUser>,
    access_lifetime: Duration,
    refresh_lifetime: Duration,
    default_roles: Vec<String>,
}

impl OAuth2Strategy {
    pub fn new(providers: Vec<Arc<dyn IdentityProvider>>) -> Self {
        Self {
            providers: providers
                .into_iter()
                .map(|p| (p.name().to_string(), p))
                .collect(),
            tokens: DashMap::new(),
            users: DashMap::new(),
            access_lifetime: Duration::hours(1),
            refresh_lifetime: Duration::days(30),
            default_roles: vec!["user".to_string()],
        }
    }

    pub fn with_access_lifetime(mut self, lifetime: Duration) -> Self {
        self.access_lifetime = lifetime;
        self
    }

    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    fn issue(&self, user_id: &str, refresh: bool) -> String {
        let bytes: [u8; 8] = rand::rng().random();
        let prefix = if refresh { REFRESH_PREFIX } else { ACCESS_PREFIX };
        let token = format!("{}{}_{}", prefix, user_id, hex::encode(bytes));
        let lifetime = if refresh {
            self.refresh_lifetime
        } else {
            self.access_lifetime
        };

        self.tokens.insert(
            token.clone(),
            IssuedToken {
                user_id: user_id.to_string(),
                expires_at: Utc::now() + lifetime,
                refresh,
            },
        );
        token
    }

    /// Issues a refresh token for a user this strategy has seen.
    pub fn create_refresh_token(&self, user_id: &str) -> Result<String, AppError> {
        if !self.users.contains_key(user_id) {
            return Err(AppError::not_found("User not found", Some("user")));
        }
        Ok(self.issue(user_id, true))
    }

    /// Looks up a live token, dropping it if it has expired.
    fn live_token(&self, token: &str, refresh: bool) -> Option<IssuedToken> {
        let issued = self.tokens.get(token).map(|t| t.clone())?;
        if issued.expires_at <= Utc::now() {
            self.tokens.remove(token);
            debug!("Dropped expired OAuth token");
            return None;
        }
        (issued.refresh == refresh).then_some(issued)
    }

    /// Removes every expired token. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.tokens.len();
        self.tokens.retain(|_, t| t.expires_at > now);
        before - self.tokens.len()
    }

    async fn login(&self, provider: &str, access_token: &str) -> Result<Option<AuthenticatedUser>, AppError> {
        let Some(identity) = self.providers.get(provider) else {
            warn!(provider, "Unknown OAuth provider");
            return Ok(None);
        };

        let Some(profile) = identity.get_user_info(access_token).await? else {
            return Ok(None);
        };

        let user_id = format!("{}:{}", provider, profile.provider_id);
        let user = AuthenticatedUser {
            id: user_id.clone(),
            username: profile.username,
            email: profile.email,
            roles: self.default_roles.clone(),
            permissions: Vec::new(),
            provider: Some(provider.to_string()),
        };
        self.users.insert(user_id, user.clone());
        Ok(Some(user))
    }
}

#[async_trait]
impl AuthStrategy for OAuth2Strategy {
    fn name(&self) -> &'static str {
        "oauth2"
    }

    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Option<AuthenticatedUser>, AppError> {
        match credentials {
            Credentials::OAuth {
                provider,
                access_token,
            } => self.login(provider, access_token).await,
            Credentials::Bearer(token) if token.starts_with(ACCESS_PREFIX) => {
                self.validate_token(token).await
            }
            _ => Ok(None),
        }
    }

    async fn create_token(&self, user_id: &str) -> Result<TokenData, AppError> {
        if !self.users.contains_key(user_id) {
            return Err(AppError::not_found("User not found", Some("user")));
        }
        let token = self.issue(user_id, false);
        let expires_in = u64::try_from(self.access_lifetime.num_seconds()).ok();
        Ok(TokenData::bearer(token, expires_in))
    }

    async fn validate_token(&self, token: &str) -> Result<Option<AuthenticatedUser>, AppError> {
        if token.starts_with(REFRESH_PREFIX) {
            return Ok(None);
        }
        let Some(issued) = self.live_token(token, false) else {
            return Ok(None);
        };
        Ok(self.users.get(&issued.user_id).map(|u| u.clone()))
    }

    async fn refresh_token(&self, token: &str) -> Result<Option<TokenData>, AppError> {
        match self.live_token(token, true) {
            Some(issued) => self.create_token(&issued.user_id).await.map(Some),
            None => Ok(None),
        }
    }
}
