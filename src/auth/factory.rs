//! Strategy construction by name and the ordered strategy set.

use crate::auth::api_key::ApiKeyStrategy;
use crate::auth::jwt::{JwtSettings, JwtStrategy};
use crate::auth::oauth::{IdentityProvider, OAuth2Strategy};
use crate::auth::repository::UserRepository;
use crate::auth::role::{RoleDefinition, RoleHierarchy, RoleStrategy};
use crate::auth::strategy::AuthStrategy;
use crate::auth::user::{AuthenticatedUser, Credentials};
use crate::error::AppError;
use crate::pipeline::MiddlewareConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Collaborators strategies may need.
#[derive(Clone)]
pub struct StrategyDeps {
    pub users: Arc<dyn UserRepository>,
    pub providers: Vec<Arc<dyn IdentityProvider>>,
    pub hierarchy: Arc<RoleHierarchy>,
}

impl StrategyDeps {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self {
            users,
            providers: Vec::new(),
            hierarchy: Arc::new(RoleHierarchy::default()),
        }
    }
}

/// Builds strategies by name: `jwt`, `api_key`, `oauth2`, `role`.
pub struct StrategyFactory;

impl StrategyFactory {
    pub const NAMES: [&'static str; 4] = ["jwt", "api_key", "oauth2", "role"];

    /// # Errors
    ///
    /// Returns [`AppError::InvalidValue`] for unknown names or invalid settings.
    pub fn create(
        name: &str,
        config: &MiddlewareConfig,
        deps: &StrategyDeps,
    ) -> Result<Arc<dyn AuthStrategy>, AppError> {
        let strategy: Arc<dyn AuthStrategy> = match name {
            "jwt" => {
                let settings: JwtSettings = config.deserialize()?;
                Arc::new(JwtStrategy::new(&settings, deps.users.clone())?)
            }
            "api_key" => Arc::new(ApiKeyStrategy::new(
                signing_secret(config)?,
                deps.users.clone(),
            )),
            "oauth2" => Arc::new(OAuth2Strategy::new(deps.providers.clone())),
            "role" => {
                let hierarchy = match config.get("role_hierarchy") {
                    Some(value) => {
                        let roles: HashMap<String, RoleDefinition> =
                            serde_json::from_value(value.clone()).map_err(|e| {
                                AppError::invalid_value(format!("Invalid role_hierarchy: {}", e))
                            })?;
                        Arc::new(RoleHierarchy::new(roles))
                    }
                    None => deps.hierarchy.clone(),
                };
                Arc::new(RoleStrategy::new(
                    signing_secret(config)?,
                    deps.users.clone(),
                    hierarchy,
                ))
            }
            other => {
                return Err(AppError::invalid_value(format!(
                    "Unknown auth strategy: {}",
                    other
                )));
            }
        };

        debug!(strategy = name, "Created auth strategy");
        Ok(strategy)
    }
}

fn signing_secret(config: &MiddlewareConfig) -> Result<&str, AppError> {
    config
        .get_str("signing_secret")
        .or_else(|| config.get_str("secret_key"))
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::missing_key("signing_secret"))
}

/// Strategies tried in order by the auth middleware.
#[derive(Clone, Default)]
pub struct StrategySet {
    strategies: Vec<Arc<dyn AuthStrategy>>,
}

impl StrategySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, strategy: Arc<dyn AuthStrategy>) -> Self {
        self.push(strategy);
        self
    }

    pub fn push(&mut self, strategy: Arc<dyn AuthStrategy>) {
        self.strategies.push(strategy);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AuthStrategy>> {
        self.strategies.iter().find(|s| s.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// First non-null user across strategies, in order.
    ///
    /// # Errors
    ///
    /// Propagates the first strategy failure; later strategies are not tried.
    pub async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Option<AuthenticatedUser>, AppError> {
        for strategy in &self.strategies {
            if let Some(user) = strategy.authenticate(credentials).await? {
                debug!(strategy = strategy.name(), user_id = %user.id, "Authenticated");
                return Ok(Some(user));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repository::{InMemoryUserRepository, UserRecord};
    use serde_json::json;

    fn deps() -> StrategyDeps {
        let users = InMemoryUserRepository::new("pepper")
            .with_user(UserRecord::new("u-1", "alice").with_roles(&["user"]), "pw");
        StrategyDeps::new(Arc::new(users))
    }

    #[test]
    fn test_creates_every_named_strategy() {
        let config = MiddlewareConfig::new()
            .with("secret_key", "shared-secret")
            .with("algorithm", "HS256");
        for name in StrategyFactory::NAMES {
            let strategy = StrategyFactory::create(name, &config, &deps()).unwrap();
            assert_eq!(strategy.name(), name);
        }
    }

    #[test]
    fn test_unknown_name_and_missing_secret() {
        assert!(StrategyFactory::create("saml", &MiddlewareConfig::new(), &deps()).is_err());
        let Err(err) = StrategyFactory::create("api_key", &MiddlewareConfig::new(), &deps()) else {
            panic!("api_key without a secret should fail");
        };
        assert!(matches!(err, AppError::MissingKey(_)));
    }

    #[test]
    fn test_role_hierarchy_from_config() {
        let config = MiddlewareConfig::new().with("signing_secret", "s").with(
            "role_hierarchy",
            json!({"editor": {"parents": ["viewer"], "permissions": ["edit"]}, "viewer": {"permissions": ["view"]}}),
        );
        assert!(StrategyFactory::create("role", &config, &deps()).is_ok());

        let bad = MiddlewareConfig::new()
            .with("signing_secret", "s")
            .with("role_hierarchy", json!(["not", "a", "map"]));
        assert!(StrategyFactory::create("role", &bad, &deps()).is_err());
    }

    #[tokio::test]
    async fn test_set_tries_strategies_in_order() {
        let deps = deps();
        let config = MiddlewareConfig::new().with("secret_key", "shared-secret");
        let set = StrategySet::new()
            .with(StrategyFactory::create("jwt", &config, &deps).unwrap())
            .with(StrategyFactory::create("role", &config, &deps).unwrap());
        assert_eq!(set.names(), vec!["jwt", "role"]);

        let role_token = set.get("role").unwrap().create_token("u-1").await.unwrap();
        let user = set
            .authenticate(&Credentials::Bearer(role_token.access_token))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.provider.as_deref(), Some("role"));

        assert!(
            set.authenticate(&Credentials::Bearer("garbage".into()))
                .await
                .unwrap()
                .is_none()
        );
    }
}
