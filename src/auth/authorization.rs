//! Role and permission checks for authenticated users.
//!
//! Requirements are keyed `"<method>:<path pattern>"` with a lowercase method,
//! e.g. `"delete:/api/products/*"`. Endpoints with no requirement pass through.

use crate::auth::middleware::HIERARCHY_SERVICE;
use crate::auth::role::{RoleDefinition, RoleHierarchy};
use crate::error::AppError;
use crate::pipeline::{
    Flow, Middleware, MiddlewareConfig, MiddlewareConstructor, Request, RequestContext,
    ServiceContainer,
};
use crate::utils::path_pattern::{best_match, matches_any};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthorizationSettings {
    pub public_paths: Vec<String>,
    /// Any one of the listed roles is enough.
    pub endpoint_roles: HashMap<String, Vec<String>>,
    /// Every listed permission is required.
    pub endpoint_permissions: HashMap<String, Vec<String>>,
    pub role_hierarchy: Option<HashMap<String, RoleDefinition>>,
}

pub struct AuthorizationMiddleware {
    settings: AuthorizationSettings,
    hierarchy: Arc<RoleHierarchy>,
}

impl AuthorizationMiddleware {
    pub fn new(settings: AuthorizationSettings, hierarchy: Arc<RoleHierarchy>) -> Self {
        Self {
            settings,
            hierarchy,
        }
    }

    /// Hierarchy source: inline `role_hierarchy`, then the shared service, then the default.
    pub fn constructor() -> MiddlewareConstructor {
        Arc::new(
            |config: &MiddlewareConfig,
             services: &ServiceContainer|
             -> Result<Arc<dyn Middleware>, AppError> {
                let settings: AuthorizationSettings = config.deserialize()?;
                let hierarchy = match &settings.role_hierarchy {
                    Some(roles) => Arc::new(RoleHierarchy::new(roles.clone())),
                    None => services
                        .get_service::<Arc<RoleHierarchy>>(HIERARCHY_SERVICE)
                        .unwrap_or_default(),
                };
                Ok(Arc::new(Self::new(settings, hierarchy)))
            },
        )
    }

    fn endpoint_key(ctx: &RequestContext) -> String {
        format!("{}:{}", ctx.method.as_str().to_lowercase(), ctx.path)
    }
}

#[async_trait]
impl Middleware for AuthorizationMiddleware {
    fn name(&self) -> &str {
        "authorization"
    }

    async fn process_request(
        &self,
        ctx: &mut RequestContext,
        request: Request,
    ) -> Result<Flow, AppError> {
        if matches_any(&self.settings.public_paths, &ctx.path) {
            return Ok(Flow::Continue(request));
        }

        let key = Self::endpoint_key(ctx);
        let roles = best_match(&self.settings.endpoint_roles, &key);
        let permissions = best_match(&self.settings.endpoint_permissions, &key);
        if roles.is_none() && permissions.is_none() {
            return Ok(Flow::Continue(request));
        }

        let Some(user) = ctx.user.as_mut() else {
            return Err(AppError::unauthorized("Authentication required"));
        };

        if let Some(required) = roles {
            if !required.iter().any(|r| self.hierarchy.has_role(&user.roles, r)) {
                warn!(user_id = %user.id, endpoint = %key, "Missing required role");
                return Err(AppError::forbidden(format!(
                    "Requires one of roles: {}",
                    required.join(", ")
                )));
            }
        }

        if let Some(required) = permissions {
            if let Some(missing) = required
                .iter()
                .find(|p| !self.hierarchy.has_permission(&user.roles, p))
            {
                warn!(user_id = %user.id, endpoint = %key, permission = %missing, "Missing permission");
                return Err(AppError::forbidden(format!("Missing permission: {}", missing)));
            }
        }

        user.permissions = self.hierarchy.permissions_for(&user.roles).into_iter().collect();
        Ok(Flow::Continue(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthenticatedUser;
    use bytes::Bytes;
    use serde_json::json;

    fn middleware() -> Arc<dyn Middleware> {
        let config = MiddlewareConfig::from_value(json!({
            "public_paths": ["/health"],
            "endpoint_roles": {"get:/api/admin*": ["admin"]},
            "endpoint_permissions": {"delete:/api/products/*": ["delete"]}
        }));
        (AuthorizationMiddleware::constructor())(&config, &ServiceContainer::new()).unwrap()
    }

    async fn check(method: &str, path: &str, roles: Option<&[&str]>) -> (Result<Flow, AppError>, RequestContext) {
        let request = http::Request::builder()
            .method(method)
            .uri(path)
            .body(Bytes::new())
            .unwrap();
        let mut ctx = RequestContext::new(&request, None);
        ctx.user = roles.map(|r| AuthenticatedUser::new("u-1", "alice").with_roles(r.iter().copied()));
        let flow = middleware().process_request(&mut ctx, request).await;
        (flow, ctx)
    }

    #[tokio::test]
    async fn test_unprotected_endpoint_needs_no_user() {
        let (flow, _) = check("GET", "/api/products", None).await;
        assert!(matches!(flow, Ok(Flow::Continue(_))));
    }

    #[tokio::test]
    async fn test_protected_endpoint_without_user_is_401() {
        let (flow, _) = check("GET", "/api/admin/stats", None).await;
        assert!(matches!(flow, Err(AppError::Authentication { .. })));
    }

    #[tokio::test]
    async fn test_role_requirement_uses_hierarchy() {
        let (flow, _) = check("GET", "/api/admin/stats", Some(&["super_admin"])).await;
        assert!(matches!(flow, Ok(Flow::Continue(_))));

        let (flow, _) = check("GET", "/api/admin/stats", Some(&["manager"])).await;
        assert!(matches!(flow, Err(AppError::Authorization { .. })));
    }

    #[tokio::test]
    async fn test_permission_requirement_and_effective_permissions() {
        let (flow, ctx) = check("DELETE", "/api/products/9", Some(&["admin"])).await;
        assert!(matches!(flow, Ok(Flow::Continue(_))));
        let permissions = ctx.user.unwrap().permissions;
        assert!(permissions.contains(&"delete".to_string()));
        assert!(permissions.contains(&"read".to_string()));

        let (flow, _) = check("DELETE", "/api/products/9", Some(&["user"])).await;
        let err = flow.unwrap_err();
        assert_eq!(err.to_string(), "Missing permission: delete");
    }
}
