//! Authentication strategies and the auth/authorization pipeline stages.
//!
//! All strategies implement [`AuthStrategy`]; [`StrategyFactory`] builds them
//! by name and [`StrategySet`] tries them in order.
//!
//! | name      | credentials                         | tokens                               |
//! |-----------|-------------------------------------|--------------------------------------|
//! | `jwt`     | username/password, bearer JWT       | HS256/384/512 access + refresh JWTs  |
//! | `api_key` | `X-API-Key`, `?api_key=`, bearer    | opaque `pk_...` keys, hashed at rest |
//! | `oauth2`  | provider access token, bearer       | `oauth_...` tokens with expiry       |
//! | `role`    | bearer                              | HMAC-signed `role_<uid>_<sig>`       |

pub mod api_key;
pub mod authorization;
pub mod factory;
pub mod jwt;
pub mod middleware;
pub mod oauth;
pub mod repository;
pub mod role;
pub mod signing;
pub mod strategy;
pub mod user;

pub use api_key::ApiKeyStrategy;
pub use authorization::{AuthorizationMiddleware, AuthorizationSettings};
pub use factory::{StrategyDeps, StrategyFactory, StrategySet};
pub use jwt::{JwtSettings, JwtStrategy};
pub use middleware::{AuthMiddleware, AuthSettings};
pub use oauth::{IdentityProvider, OAuth2Strategy, ProviderUser};
pub use repository::{InMemoryUserRepository, UserRecord, UserRepository};
pub use role::{RoleDefinition, RoleHierarchy, RoleStrategy};
pub use strategy::AuthStrategy;
pub use user::{AuthenticatedUser, Credentials, TokenData};
