//! Static API keys, stored only as keyed hashes.

use crate::auth::repository::UserRepository;
use crate::auth::signing::Signer;
use crate::auth::strategy::AuthStrategy;
use crate::auth::user::{AuthenticatedUser, Credentials, TokenData};
use crate::error::AppError;
use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

const KEY_PREFIX: &str = "pk_";

pub struct ApiKeyStrategy {
    users: Arc<dyn UserRepository>,
    signer: Signer,
    /// key hash -> user id
    keys: RwLock<HashMap<String, String>>,
}

impl ApiKeyStrategy {
    pub fn new(signing_secret: &str, users: Arc<dyn UserRepository>) -> Self {
        Self {
            users,
            signer: Signer::new(signing_secret),
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Accepts an externally provisioned key for `user_id`.
    pub fn register_key(&self, key: &str, user_id: &str) {
        let hash = self.signer.sign_hex(key);
        self.keys.write().insert(hash, user_id.to_string());
    }

    /// Invalidates a key. Returns false if it was not known.
    pub fn revoke_key(&self, key: &str) -> bool {
        let hash = self.signer.sign_hex(key);
        self.keys.write().remove(&hash).is_some()
    }

    fn generate_key() -> String {
        let bytes: [u8; 24] = rand::rng().random();
        format!("{}{}", KEY_PREFIX, hex::encode(bytes))
    }

    fn owner_of(&self, key: &str) -> Option<String> {
        let hash = self.signer.sign_hex(key);
        self.keys.read().get(&hash).cloned()
    }
}

#[async_trait]
impl AuthStrategy for ApiKeyStrategy {
    fn name(&self) -> &'static str {
        "api_key"
    }

    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Option<AuthenticatedUser>, AppError> {
        match credentials {
            Credentials::ApiKey(key) | Credentials::Bearer(key) => self.validate_token(key).await,
            _ => Ok(None),
        }
    }

    /// Issues a new key for the user. Only its hash is retained, so the
    /// returned value is the single chance to read it.
    async fn create_token(&self, user_id: &str) -> Result<TokenData, AppError> {
        if self.users.find_by_id(user_id).await?.is_none() {
            return Err(AppError::not_found("User not found", Some("user")));
        }

        let key = Self::generate_key();
        self.register_key(&key, user_id);
        info!(user_id, "Issued API key");

        Ok(TokenData {
            access_token: key,
            token_type: "api_key".to_string(),
            expires_in: None,
        })
    }

    async fn validate_token(&self, token: &str) -> Result<Option<AuthenticatedUser>, AppError> {
        let Some(user_id) = self.owner_of(token) else {
            return Ok(None);
        };

        let record = self.users.find_by_id(&user_id).await?;
        Ok(record.filter(|r| r.active).map(|r| r.to_user(self.name())))
    }

    /// Keys do not expire; a valid key refreshes to itself.
    async fn refresh_token(&self, token: &str) -> Result<Option<TokenData>, AppError> {
        Ok(self.owner_of(token).map(|_| TokenData {
            access_token: token.to_string(),
            token_type: "api_key".to_string(),
            expires_in: None,
        }))
    }
}
