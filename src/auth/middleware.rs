//! Authentication stage: resolves request credentials to a user.

use crate::auth::factory::{StrategyDeps, StrategyFactory, StrategySet};
use crate::auth::oauth::IdentityProvider;
use crate::auth::repository::UserRepository;
use crate::auth::role::RoleHierarchy;
use crate::auth::user::Credentials;
use crate::error::AppError;
use crate::pipeline::{
    Flow, Middleware, MiddlewareConfig, MiddlewareConstructor, Request, RequestContext, Response,
    ServiceContainer, set_header,
};
use crate::utils::path_pattern::matches_any;
use async_trait::async_trait;
use http::{HeaderName, HeaderValue, header};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// Container key for a shared, pre-built [`StrategySet`].
pub const STRATEGIES_SERVICE: &str = "auth_strategies";
/// Container key for the `Arc<dyn UserRepository>` used when strategies are built from config.
pub const USERS_SERVICE: &str = "user_repository";
/// Container key for `Vec<Arc<dyn IdentityProvider>>`.
pub const PROVIDERS_SERVICE: &str = "identity_providers";
/// Container key for a shared `Arc<RoleHierarchy>`.
pub const HIERARCHY_SERVICE: &str = "role_hierarchy";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Paths that skip authentication entirely.
    pub public_paths: Vec<String>,
    /// Paths that authenticate when credentials are present but never reject.
    pub optional_paths: Vec<String>,
    /// Strategy names to build when no shared set is registered.
    pub strategies: Vec<String>,
    pub api_key_header: String,
    pub api_key_query_param: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            public_paths: Vec::new(),
            optional_paths: Vec::new(),
            strategies: vec!["jwt".to_string()],
            api_key_header: "x-api-key".to_string(),
            api_key_query_param: "api_key".to_string(),
        }
    }
}

pub struct AuthMiddleware {
    settings: AuthSettings,
    strategies: Arc<StrategySet>,
}

impl AuthMiddleware {
    pub fn new(settings: AuthSettings, strategies: Arc<StrategySet>) -> Self {
        Self {
            settings,
            strategies,
        }
    }

    /// Uses the shared [`StrategySet`] if one is registered, otherwise builds
    /// `strategies` from this middleware's config.
    pub fn constructor() -> MiddlewareConstructor {
        Arc::new(
            |config: &MiddlewareConfig,
             services: &ServiceContainer|
             -> Result<Arc<dyn Middleware>, AppError> {
                let settings: AuthSettings = config.deserialize()?;
                let strategies = match services.get_service::<Arc<StrategySet>>(STRATEGIES_SERVICE) {
                    Some(set) => set,
                    None => Arc::new(Self::build_strategies(&settings, config, services)?),
                };
                Ok(Arc::new(Self::new(settings, strategies)))
            },
        )
    }

    fn build_strategies(
        settings: &AuthSettings,
        config: &MiddlewareConfig,
        services: &ServiceContainer,
    ) -> Result<StrategySet, AppError> {
        let users = services
            .get_service::<Arc<dyn UserRepository>>(USERS_SERVICE)
            .ok_or_else(|| AppError::missing_key(USERS_SERVICE))?;

        let mut deps = StrategyDeps::new(users);
        if let Some(providers) = services.get_service::<Vec<Arc<dyn IdentityProvider>>>(PROVIDERS_SERVICE) {
            deps.providers = providers;
        }
        if let Some(hierarchy) = services.get_service::<Arc<RoleHierarchy>>(HIERARCHY_SERVICE) {
            deps.hierarchy = hierarchy;
        }

        let mut set = StrategySet::new();
        for name in &settings.strategies {
            set.push(StrategyFactory::create(name, config, &deps)?);
        }
        Ok(set)
    }

    /// Bearer header, then API key header, then API key query parameter.
    fn credentials(&self, ctx: &RequestContext) -> Vec<Credentials> {
        let mut found = Vec::new();

        if let Some(value) = ctx.header(header::AUTHORIZATION.as_str()) {
            if let Some(token) = value
                .strip_prefix("Bearer ")
                .or_else(|| value.strip_prefix("bearer "))
            {
                let token = token.trim();
                if !token.is_empty() {
                    found.push(Credentials::Bearer(token.to_string()));
                }
            }
        }

        if let Some(key) = ctx.header(&self.settings.api_key_header) {
            if !key.is_empty() {
                found.push(Credentials::ApiKey(key.to_string()));
            }
        }

        if let Some(key) = ctx.query_param(&self.settings.api_key_query_param) {
            if !key.is_empty() {
                found.push(Credentials::ApiKey(key));
            }
        }

        found
    }
}

#[async_trait]
impl Middleware for AuthMiddleware {
    fn name(&self) -> &str {
        "auth"
    }

    async fn process_request(
        &self,
        ctx: &mut RequestContext,
        request: Request,
    ) -> Result<Flow, AppError> {
        if matches_any(&self.settings.public_paths, &ctx.path) {
            return Ok(Flow::Continue(request));
        }

        let credentials = self.credentials(ctx);
        for candidate in &credentials {
            if let Some(user) = self.strategies.authenticate(candidate).await? {
                ctx.token = match candidate {
                    Credentials::Bearer(t) | Credentials::ApiKey(t) => Some(t.clone()),
                    _ => None,
                };
                ctx.user = Some(user);
                return Ok(Flow::Continue(request));
            }
        }

        if matches_any(&self.settings.optional_paths, &ctx.path) {
            debug!(path = %ctx.path, "Continuing anonymously on optional-auth path");
            return Ok(Flow::Continue(request));
        }

        if credentials.is_empty() {
            Err(AppError::unauthorized("Authentication required"))
        } else {
            Err(AppError::unauthorized("Invalid or expired credentials"))
        }
    }

    async fn process_response(
        &self,
        ctx: &mut RequestContext,
        mut response: Response,
    ) -> Result<Response, AppError> {
        if let Some(user) = &ctx.user {
            let headers = response.headers_mut();
            headers.insert(
                HeaderName::from_static("x-authenticated"),
                HeaderValue::from_static("true"),
            );
            set_header(headers, HeaderName::from_static("x-user-id"), &user.id);
        }
        Ok(response)
    }
}
