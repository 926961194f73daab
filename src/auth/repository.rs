//! User lookup contract used by the auth strategies.

use crate::auth::signing::Signer;
use crate::auth::user::AuthenticatedUser;
use crate::error::AppError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// A stored user account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub roles: Vec<String>,
    pub active: bool,
}

impl UserRecord {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            email: None,
            roles: Vec::new(),
            active: true,
        }
    }

    pub fn with_roles(mut self, roles: &[&str]) -> Self {
        self.roles = roles.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    pub fn to_user(&self, provider: &str) -> AuthenticatedUser {
        AuthenticatedUser {
            id: self.id.clone(),
            username: self.username.clone(),
            email: self.email.clone(),
            roles: self.roles.clone(),
            permissions: Vec::new(),
            provider: Some(provider.to_string()),
        }
    }
}

/// Account storage the strategies authenticate against.
///
/// Inactive accounts are returned as-is; strategies decide how to treat them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>, AppError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, AppError>;

    /// Returns the account if `password` matches.
    async fn verify_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<UserRecord>, AppError>;
}

/// Process-local accounts with HMAC-hashed passwords.
pub struct InMemoryUserRepository {
    signer: Signer,
    users: RwLock<HashMap<String, (UserRecord, String)>>,
}

impl InMemoryUserRepository {
    pub fn new(password_secret: &str) -> Self {
        Self {
            signer: Signer::new(password_secret),
            users: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, record: UserRecord, password: &str) {
        let hash = self.signer.sign_hex(password);
        self.users.write().insert(record.id.clone(), (record, hash));
    }

    pub fn with_user(self, record: UserRecord, password: &str) -> Self {
        self.insert(record, password);
        self
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>, AppError> {
        Ok(self.users.read().get(id).map(|(record, _)| record.clone()))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, AppError> {
        Ok(self
            .users
            .read()
            .values()
            .find(|(record, _)| record.username == username)
            .map(|(record, _)| record.clone()))
    }

    async fn verify_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<UserRecord>, AppError> {
        let users = self.users.read();
        let found = users
            .values()
            .find(|(record, _)| record.username == username)
            .filter(|(_, hash)| self.signer.verify_hex(password, hash))
            .map(|(record, _)| record.clone());
        Ok(found)
    }
}
