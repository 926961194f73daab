//! Identity types produced and consumed by auth strategies.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The identity attached to a request once a strategy accepts its credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Strategy or identity provider that vouched for this user.
    pub provider: Option<String>,
}

impl AuthenticatedUser {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            email: None,
            roles: Vec::new(),
            permissions: Vec::new(),
            provider: None,
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_provider(mut self, provider: &str) -> Self {
        self.provider = Some(provider.to_string());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Credentials presented by a client.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Password { username: String, password: String },
    Bearer(String),
    ApiKey(String),
    /// An access token issued by an external identity provider.
    OAuth { provider: String, access_token: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            Self::Bearer(_) => f.write_str("Bearer(***)"),
            Self::ApiKey(_) => f.write_str("ApiKey(***)"),
            Self::OAuth { provider, .. } => f
                .debug_struct("OAuth")
                .field("provider", provider)
                .field("access_token", &"***")
                .finish(),
        }
    }
}

/// A token handed back to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenData {
    pub access_token: String,
    pub token_type: String,
    /// Lifetime in seconds; `None` for tokens that do not expire.
    pub expires_in: Option<u64>,
}

impl TokenData {
    pub fn bearer(access_token: String, expires_in: Option<u64>) -> Self {
        Self {
            access_token,
            token_type: "bearer".to_string(),
            expires_in,
        }
    }
}
