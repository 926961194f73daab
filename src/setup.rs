//! Default pipeline assembly.
//!
//! | priority | name             | group          |
//! |----------|------------------|----------------|
//! | 5        | `cors`           | security       |
//! | 8        | `request_logger` | logging        |
//! | 10       | `auth`           | authentication |
//! | 15       | `authorization`  | authorization  |
//! | 20       | `rate_limit`     | performance    |
//! | 30       | `cache`          | performance    |

use crate::auth::{AuthMiddleware, AuthorizationMiddleware};
use crate::cache::CacheMiddleware;
use crate::config::Config;
use crate::dispatch::{DispatcherSettings, ExceptionDispatcher};
use crate::middlewares::{CorsMiddleware, RequestLoggerMiddleware};
use crate::pipeline::{
    MiddlewareConfig, MiddlewareDescriptor, MiddlewareRegistry, RegistryError, ServiceContainer,
};
use crate::rate_limit::RateLimitMiddleware;
use serde_json::json;
use std::sync::Arc;

/// Paths served without credentials.
pub const PUBLIC_PATHS: &[&str] = &["/health", "/auth/*"];

pub fn cors_config(config: &Config) -> MiddlewareConfig {
    MiddlewareConfig::new().with("allowed_origins", json!(config.cors_allowed_origins))
}

pub fn auth_config(config: &Config) -> MiddlewareConfig {
    MiddlewareConfig::from_value(json!({
        "strategies": ["jwt", "api_key"],
        "secret_key": config.jwt_secret,
        "algorithm": config.jwt_algorithm,
        "expire_minutes": config.jwt_expire_minutes,
        "signing_secret": config.api_key_signing_secret,
        "public_paths": PUBLIC_PATHS,
        "optional_paths": ["/api/products*"],
    }))
}

pub fn authorization_config() -> MiddlewareConfig {
    MiddlewareConfig::from_value(json!({
        "public_paths": PUBLIC_PATHS,
        "endpoint_roles": {"get:/api/admin*": ["admin"]},
        "endpoint_permissions": {
            "post:/api/products": ["write"],
            "delete:/api/products/*": ["delete"],
        },
    }))
}

pub fn rate_limit_config(config: &Config) -> MiddlewareConfig {
    MiddlewareConfig::from_value(json!({
        "algorithm": config.rate_limit_algorithm,
        "capacity": config.rate_limit_capacity,
        "refill_rate": config.rate_limit_refill_rate,
        "limit": config.rate_limit_limit,
        "window_seconds": config.rate_limit_window_seconds,
        "trust_proxy_headers": config.behind_proxy,
        "excluded_paths": ["/health"],
    }))
}

pub fn cache_config(config: &Config) -> MiddlewareConfig {
    MiddlewareConfig::from_value(json!({
        "backend": config.cache_backend,
        "default_ttl": config.cache_default_ttl,
        "excluded_paths": ["/health", "/auth/*", "/api/me", "/api/admin*"],
        "endpoint_ttls": {"/api/products*": 60},
    }))
}

/// Registers the standard middleware set in a fresh registry.
///
/// `auth` needs an `Arc<dyn UserRepository>` under
/// [`USERS_SERVICE`](crate::auth::middleware::USERS_SERVICE) or a shared
/// strategy set; without either it fails to build and is skipped.
pub fn default_registry(
    config: &Config,
    services: Arc<ServiceContainer>,
) -> Result<MiddlewareRegistry, RegistryError> {
    let registry = MiddlewareRegistry::new(services);

    registry.register(
        MiddlewareDescriptor::new("cors", CorsMiddleware::constructor())
            .priority(5)
            .group("security")
            .config(cors_config(config)),
    )?;
    registry.register(
        MiddlewareDescriptor::new("request_logger", RequestLoggerMiddleware::constructor())
            .priority(8)
            .group("logging"),
    )?;
    registry.register(
        MiddlewareDescriptor::new("auth", AuthMiddleware::constructor())
            .priority(10)
            .group("authentication")
            .config(auth_config(config)),
    )?;
    registry.register(
        MiddlewareDescriptor::new("authorization", AuthorizationMiddleware::constructor())
            .priority(15)
            .group("authorization")
            .config(authorization_config()),
    )?;
    registry.register(
        MiddlewareDescriptor::new("rate_limit", RateLimitMiddleware::constructor())
            .priority(20)
            .group("performance")
            .config(rate_limit_config(config)),
    )?;
    registry.register(
        MiddlewareDescriptor::new("cache", CacheMiddleware::constructor())
            .priority(30)
            .group("performance")
            .config(cache_config(config)),
    )?;

    Ok(registry)
}

pub fn default_dispatcher(config: &Config) -> ExceptionDispatcher {
    ExceptionDispatcher::new(DispatcherSettings {
        debug_mode: config.debug_mode,
        log_exceptions: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::middleware::USERS_SERVICE;
    use crate::auth::{InMemoryUserRepository, UserRepository};

    fn config() -> Config {
        Config {
            listen_addr: "127.0.0.1:0".to_string(),
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            debug_mode: false,
            jwt_secret: "jwt".to_string(),
            jwt_algorithm: "HS256".to_string(),
            jwt_expire_minutes: 30,
            api_key_signing_secret: "keys".to_string(),
            rate_limit_algorithm: "sliding_window".to_string(),
            rate_limit_capacity: 100,
            rate_limit_refill_rate: 10.0,
            rate_limit_limit: 5,
            rate_limit_window_seconds: 60,
            behind_proxy: false,
            cache_backend: "memory".to_string(),
            cache_default_ttl: 120,
            redis_url: None,
            cors_allowed_origins: vec!["*".to_string()],
        }
    }

    #[test]
    fn test_default_registry_order_and_groups() {
        let services = Arc::new(ServiceContainer::new());
        let users: Arc<dyn UserRepository> = Arc::new(InMemoryUserRepository::new("pepper"));
        services.register_service(USERS_SERVICE, users);

        let registry = default_registry(&config(), services).unwrap();
        assert_eq!(
            registry.list_registered(),
            vec!["cors", "request_logger", "auth", "authorization", "rate_limit", "cache"]
        );
        assert_eq!(registry.descriptor_names_in("performance"), vec!["rate_limit", "cache"]);

        let built: Vec<String> = registry
            .get_all_ordered()
            .into_iter()
            .map(|stage| stage.name)
            .collect();
        assert_eq!(built.len(), 6);
    }

    #[test]
    fn test_auth_is_skipped_without_user_repository() {
        let registry = default_registry(&config(), Arc::new(ServiceContainer::new())).unwrap();
        assert!(registry.get("auth").is_none());
        assert!(registry.get("cache").is_some());
    }

    #[test]
    fn test_configs_carry_process_settings() {
        let rate = rate_limit_config(&config());
        assert_eq!(rate.get_str("algorithm"), Some("sliding_window"));
        assert_eq!(rate.get_u64("limit"), Some(5));
        assert_eq!(cache_config(&config()).get_u64("default_ttl"), Some(120));
        assert_eq!(auth_config(&config()).get_str("signing_secret"), Some("keys"));
    }
}
