//! The contract shared by every authentication strategy.

use crate::auth::user::{AuthenticatedUser, Credentials, TokenData};
use crate::error::AppError;
use async_trait::async_trait;

/// One way of turning credentials or tokens into an [`AuthenticatedUser`].
///
/// `Ok(None)` means "not mine or not valid": the caller moves on to the next
/// strategy. `Err` is reserved for failures of the strategy itself, such as an
/// unreachable user store.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Option<AuthenticatedUser>, AppError>;

    async fn create_token(&self, user_id: &str) -> Result<TokenData, AppError>;

    async fn validate_token(&self, token: &str) -> Result<Option<AuthenticatedUser>, AppError>;

    async fn refresh_token(&self, token: &str) -> Result<Option<TokenData>, AppError>;
}
