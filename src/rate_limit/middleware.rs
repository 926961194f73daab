//! Rate-limit stage. Denied requests short-circuit with a 429 envelope.

use super::{RateLimiter, SlidingWindowLimiter, TokenBucketLimiter};
use crate::dispatch::{DispatcherSettings, handlers};
use crate::error::AppError;
use crate::pipeline::{
    Flow, Middleware, MiddlewareConfig, MiddlewareConstructor, RateLimitInfo, Request,
    RequestContext, Response, ServiceContainer,
};
use crate::utils::path_pattern::matches_any;
use async_trait::async_trait;
use chrono::Utc;
use http::{HeaderName, HeaderValue};
use metrics::counter;
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::warn;

/// Container key for an injected `Arc<dyn RateLimiter>` shared across pipelines.
pub const LIMITER_SERVICE: &str = "rate_limiter";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    TokenBucket,
    SlidingWindow,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub algorithm: Algorithm,
    pub capacity: u64,
    pub refill_rate: f64,
    pub limit: u64,
    pub window_seconds: u64,
    pub excluded_paths: Vec<String>,
    /// Key anonymous clients by `X-Forwarded-For`/`X-Real-IP` instead of the peer address.
    pub trust_proxy_headers: bool,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::TokenBucket,
            capacity: 100,
            refill_rate: 10.0,
            limit: 100,
            window_seconds: 60,
            excluded_paths: Vec::new(),
            trust_proxy_headers: false,
        }
    }
}

impl RateLimitSettings {
    pub fn build_limiter(&self) -> Arc<dyn RateLimiter> {
        match self.algorithm {
            Algorithm::TokenBucket => Arc::new(TokenBucketLimiter::new(self.capacity, self.refill_rate)),
            Algorithm::SlidingWindow => Arc::new(SlidingWindowLimiter::new(
                self.limit,
                Duration::from_secs(self.window_seconds),
            )),
        }
    }
}

pub struct RateLimitMiddleware {
    settings: RateLimitSettings,
    limiter: Arc<dyn RateLimiter>,
}

impl RateLimitMiddleware {
    pub fn new(settings: RateLimitSettings, limiter: Arc<dyn RateLimiter>) -> Self {
        Self { settings, limiter }
    }

    /// Uses the injected limiter if one is registered, otherwise builds one from config.
    pub fn constructor() -> MiddlewareConstructor {
        Arc::new(
            |config: &MiddlewareConfig,
             services: &ServiceContainer|
             -> Result<Arc<dyn Middleware>, AppError> {
                let settings: RateLimitSettings = config.deserialize()?;
                let limiter = services
                    .get_service::<Arc<dyn RateLimiter>>(LIMITER_SERVICE)
                    .unwrap_or_else(|| settings.build_limiter());
                Ok(Arc::new(Self::new(settings, limiter)))
            },
        )
    }

    /// `user:<id>`, then `api_key:<key>`, then `ip:<addr>`.
    pub fn identifier(&self, ctx: &RequestContext) -> String {
        if let Some(user_id) = ctx.user_id() {
            return format!("user:{}", user_id);
        }
        if let Some(key) = ctx.header("x-api-key").filter(|k| !k.is_empty()) {
            return format!("api_key:{}", key);
        }
        let ip = if self.settings.trust_proxy_headers {
            ctx.client_ip()
        } else {
            ctx.peer_ip().map(|ip| ip.to_string())
        };
        match ip {
            Some(ip) => format!("ip:{}", ip),
            None => "ip:unknown".to_string(),
        }
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &str {
        "rate_limit"
    }

    async fn process_request(
        &self,
        ctx: &mut RequestContext,
        request: Request,
    ) -> Result<Flow, AppError> {
        if matches_any(&self.settings.excluded_paths, &ctx.path) {
            return Ok(Flow::Continue(request));
        }

        let identifier = self.identifier(ctx);
        let allowed = self.limiter.is_allowed(&identifier).await;
        let remaining = self.limiter.get_remaining(&identifier).await;

        if allowed {
            ctx.rate_limit = Some(RateLimitInfo {
                limit: self.limiter.limit(),
                remaining,
            });
            return Ok(Flow::Continue(request));
        }

        let wait = self.limiter.reset_after(&identifier).await;
        let retry_after = wait.as_secs_f64().ceil().max(1.0) as u64;
        let reset = Utc::now()
            .timestamp()
            .saturating_add(i64::try_from(retry_after).unwrap_or(i64::MAX));

        warn!(
            request_id = %ctx.request_id,
            identifier = %identifier,
            algorithm = self.limiter.algorithm(),
            retry_after,
            "Rate limit exceeded"
        );
        counter!("rate_limit_denied_total", "algorithm" => self.limiter.algorithm()).increment(1);

        let error = AppError::rate_limited(remaining, reset, retry_after);
        Ok(Flow::Respond(handlers::rate_limited(
            ctx,
            &error,
            &DispatcherSettings::default(),
        )))
    }

    async fn process_response(
        &self,
        ctx: &mut RequestContext,
        mut response: Response,
    ) -> Result<Response, AppError> {
        if let Some(info) = ctx.rate_limit {
            let headers = response.headers_mut();
            headers.insert(
                HeaderName::from_static("x-ratelimit-limit"),
                HeaderValue::from(info.limit),
            );
            headers.insert(
                HeaderName::from_static("x-ratelimit-remaining"),
                HeaderValue::from(info.remaining),
            );
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthenticatedUser;
    use crate::pipeline::empty_response;
    use bytes::Bytes;
    use http::StatusCode;
    use serde_json::json;
    use std::net::SocketAddr;

    fn middleware(config: serde_json::Value) -> Arc<dyn Middleware> {
        (RateLimitMiddleware::constructor())(&MiddlewareConfig::from_value(config), &ServiceContainer::new())
            .unwrap()
    }

    fn request(path: &str, headers: &[(&str, &str)]) -> Request {
        let mut builder = http::Request::builder().uri(path);
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(Bytes::new()).unwrap()
    }

    fn context(request: &Request, peer: &str) -> RequestContext {
        let addr: SocketAddr = peer.parse().unwrap();
        RequestContext::new(request, Some(addr))
    }

    #[tokio::test(start_paused = true)]
    async fn test_denial_short_circuits_with_429() {
        let mw = middleware(json!({"capacity": 2, "refill_rate": 0.5}));

        for expected_remaining in [1u64, 0] {
            let req = request("/api/products", &[]);
            let mut ctx = context(&req, "10.0.0.1:5000");
            let flow = mw.process_request(&mut ctx, req).await.unwrap();
            assert!(matches!(flow, Flow::Continue(_)));
            assert_eq!(ctx.rate_limit.unwrap().remaining, expected_remaining);

            let response = mw
                .process_response(&mut ctx, empty_response(StatusCode::OK))
                .await
                .unwrap();
            assert_eq!(response.headers()["x-ratelimit-limit"], "2");
        }

        let req = request("/api/products", &[]);
        let mut ctx = context(&req, "10.0.0.1:5000");
        let Flow::Respond(response) = mw.process_request(&mut ctx, req).await.unwrap() else {
            panic!("expected a 429");
        };
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
        assert_eq!(response.headers()["retry-after"], "2");
        assert!(response.headers().contains_key("x-ratelimit-reset"));

        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["error"], "RATE_LIMIT_EXCEEDED");
        assert_eq!(body["status_code"], 429);
        assert_eq!(body["retry_after"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denial_with_negligible_refill_rate_still_answers_429() {
        let mw = middleware(json!({"capacity": 1, "refill_rate": 1e-20}));

        let req = request("/api/products", &[]);
        let mut ctx = context(&req, "10.0.0.2:5000");
        assert!(matches!(
            mw.process_request(&mut ctx, req).await.unwrap(),
            Flow::Continue(_)
        ));

        let req = request("/api/products", &[]);
        let mut ctx = context(&req, "10.0.0.2:5000");
        let Flow::Respond(response) = mw.process_request(&mut ctx, req).await.unwrap() else {
            panic!("expected a 429");
        };
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = response.headers()["retry-after"].to_str().unwrap().parse().unwrap();
        assert_eq!(retry_after, u64::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_window_and_excluded_paths() {
        let mw = middleware(json!({
            "algorithm": "sliding_window",
            "limit": 1,
            "window_seconds": 30,
            "excluded_paths": ["/health"]
        }));

        for _ in 0..3 {
            let req = request("/health", &[]);
            let mut ctx = context(&req, "10.0.0.1:5000");
            assert!(matches!(mw.process_request(&mut ctx, req).await.unwrap(), Flow::Continue(_)));
            assert!(ctx.rate_limit.is_none());
        }

        let req = request("/api", &[]);
        let mut ctx = context(&req, "10.0.0.1:5000");
        assert!(matches!(mw.process_request(&mut ctx, req).await.unwrap(), Flow::Continue(_)));

        let req = request("/api", &[]);
        let mut ctx = context(&req, "10.0.0.1:5000");
        assert!(matches!(mw.process_request(&mut ctx, req).await.unwrap(), Flow::Respond(_)));
    }

    #[test]
    fn test_identifier_precedence() {
        let mw = RateLimitMiddleware::new(
            RateLimitSettings::default(),
            RateLimitSettings::default().build_limiter(),
        );

        let req = request("/", &[("x-api-key", "pk_abc"), ("x-forwarded-for", "1.2.3.4")]);
        let mut ctx = context(&req, "10.0.0.9:1234");
        assert_eq!(mw.identifier(&ctx), "api_key:pk_abc");

        ctx.user = Some(AuthenticatedUser::new("u-7", "bob"));
        assert_eq!(mw.identifier(&ctx), "user:u-7");

        let req = request("/", &[("x-forwarded-for", "1.2.3.4")]);
        let ctx = context(&req, "10.0.0.9:1234");
        assert_eq!(mw.identifier(&ctx), "ip:10.0.0.9");

        let ctx = RequestContext::new(&req, None);
        assert_eq!(mw.identifier(&ctx), "ip:unknown");

        let trusting = RateLimitMiddleware::new(
            RateLimitSettings {
                trust_proxy_headers: true,
                ..RateLimitSettings::default()
            },
            RateLimitSettings::default().build_limiter(),
        );
        let ctx = context(&req, "10.0.0.9:1234");
        assert_eq!(trusting.identifier(&ctx), "ip:1.2.3.4");
    }
}
