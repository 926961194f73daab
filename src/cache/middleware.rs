//! Response cache stage.
//!
//! Only `GET` requests outside `excluded_paths` are eligible. A hit short-circuits
//! with the stored response; a miss records the key on the context and the
//! response phase stores any status below 400.

use super::backend::CacheBackend;
use super::entry::CachedResponse;
use super::key::{KeyOptions, cache_key};
use super::{InMemoryCache, NullCache};
use crate::error::AppError;
use crate::pipeline::{
    Flow, Middleware, MiddlewareConfig, MiddlewareConstructor, Request, RequestContext, Response,
    ServiceContainer, set_header,
};
use crate::utils::path_pattern::{best_match, matches_any};
use async_trait::async_trait;
use http::{HeaderName, HeaderValue, Method, header};
use metrics::counter;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Container key for the external `Arc<dyn CacheBackend>`.
pub const BACKEND_SERVICE: &str = "cache_backend";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Memory,
    External,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub backend: BackendKind,
    pub default_ttl: u64,
    pub excluded_paths: Vec<String>,
    /// Path pattern to TTL in seconds; exact patterns win over wildcards.
    pub endpoint_ttls: HashMap<String, u64>,
    pub user_specific_cache: bool,
    /// Request headers that vary the key.
    pub cache_headers: Vec<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            default_ttl: 300,
            excluded_paths: Vec::new(),
            endpoint_ttls: HashMap::new(),
            user_specific_cache: false,
            cache_headers: Vec::new(),
        }
    }
}

pub struct CacheMiddleware {
    settings: CacheSettings,
    backend: Arc<dyn CacheBackend>,
}

impl CacheMiddleware {
    pub fn new(settings: CacheSettings, backend: Arc<dyn CacheBackend>) -> Self {
        Self { settings, backend }
    }

    /// `memory` gets a private [`InMemoryCache`]; `external` uses the registered
    /// backend, or [`NullCache`] when none is registered.
    pub fn constructor() -> MiddlewareConstructor {
        Arc::new(
            |config: &MiddlewareConfig,
             services: &ServiceContainer|
             -> Result<Arc<dyn Middleware>, AppError> {
                let settings: CacheSettings = config.deserialize()?;
                let backend: Arc<dyn CacheBackend> = match settings.backend {
                    BackendKind::Memory => Arc::new(InMemoryCache::new()),
                    BackendKind::External => services
                        .get_service::<Arc<dyn CacheBackend>>(BACKEND_SERVICE)
                        .unwrap_or_else(|| {
                            warn!("No external cache backend registered, caching disabled");
                            Arc::new(NullCache::new())
                        }),
                };
                Ok(Arc::new(Self::new(settings, backend)))
            },
        )
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    pub fn ttl_for(&self, path: &str) -> u64 {
        best_match(&self.settings.endpoint_ttls, path)
            .copied()
            .unwrap_or(self.settings.default_ttl)
    }

    fn is_eligible(&self, ctx: &RequestContext) -> bool {
        ctx.method == Method::GET && !matches_any(&self.settings.excluded_paths, &ctx.path)
    }

    fn key(&self, ctx: &RequestContext) -> String {
        cache_key(
            ctx,
            &KeyOptions {
                user_specific: self.settings.user_specific_cache,
                headers: &self.settings.cache_headers,
            },
        )
    }

    async fn lookup(&self, key: &str) -> Option<Response> {
        let raw = self.backend.get(key).await?;
        match CachedResponse::decode(&raw).and_then(CachedResponse::into_response) {
            Ok(response) => Some(response),
            Err(e) => {
                warn!(key, error = %e, "Discarding unreadable cache entry");
                self.backend.delete(key).await;
                None
            }
        }
    }
}

fn tag(response: &mut Response, status: &'static str, key: &str) {
    let headers = response.headers_mut();
    headers.insert(HeaderName::from_static("x-cache"), HeaderValue::from_static(status));
    set_header(headers, HeaderName::from_static("x-cache-key"), key);
}

#[async_trait]
impl Middleware for CacheMiddleware {
    fn name(&self) -> &str {
        "cache"
    }

    async fn process_request(
        &self,
        ctx: &mut RequestContext,
        request: Request,
    ) -> Result<Flow, AppError> {
        if !self.is_eligible(ctx) {
            return Ok(Flow::Continue(request));
        }

        let key = self.key(ctx);
        if let Some(mut response) = self.lookup(&key).await {
            debug!(request_id = %ctx.request_id, key = %key, "Cache HIT");
            counter!("cache_hits_total").increment(1);
            tag(&mut response, "HIT", &key);
            return Ok(Flow::Respond(response));
        }

        counter!("cache_misses_total").increment(1);
        ctx.cache_key = Some(key);
        Ok(Flow::Continue(request))
    }

    async fn process_response(
        &self,
        ctx: &mut RequestContext,
        mut response: Response,
    ) -> Result<Response, AppError> {
        let Some(key) = ctx.cache_key.clone() else {
            return Ok(response);
        };
        if response.status().as_u16() >= 400 {
            return Ok(response);
        }

        let ttl = self.ttl_for(&ctx.path);
        match CachedResponse::from_response(&response, ttl).encode() {
            Ok(raw) => {
                if !self.backend.set(&key, &raw, ttl).await {
                    debug!(key = %key, backend = self.backend.name(), "Response not stored");
                }
            }
            Err(e) => warn!(key = %key, error = %e, "Failed to serialize response for cache"),
        }

        tag(&mut response, "MISS", &key);
        set_header(
            response.headers_mut(),
            header::CACHE_CONTROL,
            &format!("max-age={}", ttl),
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::MockCacheBackend;
    use crate::pipeline::json_response;
    use bytes::Bytes;
    use http::StatusCode;
    use serde_json::json;

    fn request(method: &str, uri: &str) -> Request {
        http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Bytes::new())
            .unwrap()
    }

    fn middleware(config: serde_json::Value) -> CacheMiddleware {
        let settings: CacheSettings =
            MiddlewareConfig::from_value(config).deserialize().unwrap();
        CacheMiddleware::new(settings, Arc::new(InMemoryCache::new()))
    }

    async fn miss_then_store(mw: &CacheMiddleware, uri: &str, status: StatusCode) -> Response {
        let req = request("GET", uri);
        let mut ctx = RequestContext::new(&req, None);
        assert!(matches!(mw.process_request(&mut ctx, req).await.unwrap(), Flow::Continue(_)));
        mw.process_response(&mut ctx, json_response(status, &json!({"items": [1, 2]})))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let mw = middleware(json!({}));
        let response = miss_then_store(&mw, "/api/products?page=1", StatusCode::OK).await;
        assert_eq!(response.headers()["x-cache"], "MISS");
        assert_eq!(response.headers()["cache-control"], "max-age=300");
        let key = response.headers()["x-cache-key"].to_str().unwrap().to_string();

        let req = request("GET", "/api/products?page=1");
        let mut ctx = RequestContext::new(&req, None);
        let Flow::Respond(hit) = mw.process_request(&mut ctx, req).await.unwrap() else {
            panic!("expected a cache hit");
        };
        assert_eq!(hit.status(), StatusCode::OK);
        assert_eq!(hit.headers()["x-cache"], "HIT");
        assert_eq!(hit.headers()["x-cache-key"], key.as_str());
        assert_eq!(hit.headers()["content-type"], "application/json");
        let body: serde_json::Value = serde_json::from_slice(hit.body()).unwrap();
        assert_eq!(body, json!({"items": [1, 2]}));
        assert!(ctx.cache_key.is_none());
    }

    #[tokio::test]
    async fn test_errors_and_non_get_are_not_cached() {
        let mw = middleware(json!({}));
        let response = miss_then_store(&mw, "/api/broken", StatusCode::NOT_FOUND).await;
        assert!(response.headers().get("x-cache").is_none());

        let req = request("GET", "/api/broken");
        let mut ctx = RequestContext::new(&req, None);
        assert!(matches!(mw.process_request(&mut ctx, req).await.unwrap(), Flow::Continue(_)));

        let req = request("POST", "/api/products");
        let mut ctx = RequestContext::new(&req, None);
        assert!(matches!(mw.process_request(&mut ctx, req).await.unwrap(), Flow::Continue(_)));
        assert!(ctx.cache_key.is_none());
    }

    #[tokio::test]
    async fn test_excluded_paths_and_endpoint_ttls() {
        let mw = middleware(json!({
            "excluded_paths": ["/api/me"],
            "endpoint_ttls": {"/api/products*": 60, "/api/products/featured": 10}
        }));
        assert_eq!(mw.ttl_for("/api/products/1"), 60);
        assert_eq!(mw.ttl_for("/api/products/featured"), 10);
        assert_eq!(mw.ttl_for("/api/orders"), 300);

        let req = request("GET", "/api/me");
        let mut ctx = RequestContext::new(&req, None);
        mw.process_request(&mut ctx, req).await.unwrap();
        assert!(ctx.cache_key.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss_and_deleted() {
        let mut backend = MockCacheBackend::new();
        backend
            .expect_get()
            .returning(|_| Some("{broken".to_string()));
        backend.expect_delete().times(1).returning(|_| true);

        let mw = CacheMiddleware::new(CacheSettings::default(), Arc::new(backend));
        let req = request("GET", "/api/products");
        let mut ctx = RequestContext::new(&req, None);
        let flow = mw.process_request(&mut ctx, req).await.unwrap();
        assert!(matches!(flow, Flow::Continue(_)));
        assert!(ctx.cache_key.is_some());
    }

    #[tokio::test]
    async fn test_backend_failure_does_not_fail_response() {
        let mut backend = MockCacheBackend::new();
        backend.expect_get().returning(|_| None);
        backend.expect_set().returning(|_, _, _| false);
        backend.expect_name().return_const("mock");

        let mw = CacheMiddleware::new(CacheSettings::default(), Arc::new(backend));
        let req = request("GET", "/api/products");
        let mut ctx = RequestContext::new(&req, None);
        mw.process_request(&mut ctx, req).await.unwrap();
        let response = mw
            .process_response(&mut ctx, json_response(StatusCode::OK, &json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-cache"], "MISS");
    }

    #[test]
    fn test_external_backend_without_registration_falls_back() {
        let config = MiddlewareConfig::new().with("backend", "external");
        let built = (CacheMiddleware::constructor())(&config, &ServiceContainer::new());
        assert!(built.is_ok());
    }
}
