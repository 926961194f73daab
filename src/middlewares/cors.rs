//! CORS stage: answers preflights and tags responses for allowed origins.

use crate::error::AppError;
use crate::pipeline::{
    Flow, Middleware, MiddlewareConfig, MiddlewareConstructor, Request, RequestContext, Response,
    ServiceContainer, json_response, set_header,
};
use async_trait::async_trait;
use http::{HeaderValue, Method, StatusCode, header};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorsSettings {
    /// `*`, exact origins, or `*.example.com` subdomain patterns.
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age: u64,
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_methods: ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            allowed_headers: vec!["*".to_string()],
            allow_credentials: false,
            max_age: 600,
        }
    }
}

impl CorsSettings {
    /// Requests without an `Origin` are always allowed.
    pub fn is_origin_allowed(&self, origin: Option<&str>) -> bool {
        let Some(origin) = origin else {
            return true;
        };
        self.allowed_origins.iter().any(|allowed| {
            if allowed == "*" || allowed == origin {
                return true;
            }
            match allowed.strip_prefix("*.") {
                Some(domain) => origin_host(origin)
                    .is_some_and(|host| host.ends_with(&format!(".{}", domain))),
                None => false,
            }
        })
    }

    pub fn is_method_allowed(&self, method: &str) -> bool {
        self.allowed_methods
            .iter()
            .any(|m| m == "*" || m.eq_ignore_ascii_case(method))
    }
}

/// Host part of `scheme://host[:port]`.
fn origin_host(origin: &str) -> Option<&str> {
    let rest = origin.split_once("://").map_or(origin, |(_, rest)| rest);
    rest.split([':', '/']).next().filter(|h| !h.is_empty())
}

pub struct CorsMiddleware {
    settings: CorsSettings,
}

impl CorsMiddleware {
    pub fn new(settings: CorsSettings) -> Self {
        Self { settings }
    }

    pub fn constructor() -> MiddlewareConstructor {
        Arc::new(
            |config: &MiddlewareConfig,
             _: &ServiceContainer|
             -> Result<Arc<dyn Middleware>, AppError> {
                Ok(Arc::new(Self::new(config.deserialize()?)))
            },
        )
    }

    fn preflight(&self, origin: Option<&str>, ctx: &RequestContext) -> Response {
        if !self.settings.is_origin_allowed(origin) {
            warn!(origin = origin.unwrap_or("-"), "CORS preflight: origin not allowed");
            return json_response(StatusCode::FORBIDDEN, &json!({"error": "CORS: Origin not allowed"}));
        }

        if let Some(method) = ctx.header("access-control-request-method") {
            if !self.settings.is_method_allowed(method) {
                warn!(method, "CORS preflight: method not allowed");
                return json_response(
                    StatusCode::METHOD_NOT_ALLOWED,
                    &json!({"error": "CORS: Method not allowed"}),
                );
            }
        }

        let mut response = json_response(StatusCode::OK, &json!({}));
        let headers = response.headers_mut();
        set_header(headers, header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.unwrap_or("*"));
        set_header(
            headers,
            header::ACCESS_CONTROL_ALLOW_METHODS,
            &self.settings.allowed_methods.join(", "),
        );
        set_header(
            headers,
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            &self.settings.allowed_headers.join(", "),
        );
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from(self.settings.max_age));
        if self.settings.allow_credentials {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
        debug!(origin = origin.unwrap_or("-"), "CORS preflight handled");
        response
    }
}

#[async_trait]
impl Middleware for CorsMiddleware {
    fn name(&self) -> &str {
        "cors"
    }

    async fn process_request(
        &self,
        ctx: &mut RequestContext,
        request: Request,
    ) -> Result<Flow, AppError> {
        let origin = ctx.header("origin");
        if ctx.method == Method::OPTIONS {
            return Ok(Flow::Respond(self.preflight(origin, ctx)));
        }
        if !self.settings.is_origin_allowed(origin) {
            // Served without CORS headers; the browser enforces the block.
            warn!(origin = origin.unwrap_or("-"), "CORS: origin not allowed");
        }
        Ok(Flow::Continue(request))
    }

    async fn process_response(
        &self,
        ctx: &mut RequestContext,
        mut response: Response,
    ) -> Result<Response, AppError> {
        let origin = ctx.header("origin");
        if self.settings.is_origin_allowed(origin) {
            let headers = response.headers_mut();
            set_header(headers, header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.unwrap_or("*"));
            if self.settings.allow_credentials {
                headers.insert(
                    header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                    HeaderValue::from_static("true"),
                );
            }
            headers.insert(header::VARY, HeaderValue::from_static("Origin"));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::empty_response;
    use bytes::Bytes;

    fn settings() -> CorsSettings {
        CorsSettings {
            allowed_origins: vec!["https://app.example.com".into(), "*.trusted.io".into()],
            allowed_methods: vec!["GET".into(), "POST".into()],
            allow_credentials: true,
            ..CorsSettings::default()
        }
    }

    fn request(method: &str, headers: &[(&str, &str)]) -> Request {
        let mut builder = http::Request::builder().method(method).uri("/api/products");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(Bytes::new()).unwrap()
    }

    async fn preflight(headers: &[(&str, &str)]) -> Response {
        let mw = CorsMiddleware::new(settings());
        let req = request("OPTIONS", headers);
        let mut ctx = RequestContext::new(&req, None);
        match mw.process_request(&mut ctx, req).await.unwrap() {
            Flow::Respond(response) => response,
            Flow::Continue(_) => panic!("preflight must short-circuit"),
        }
    }

    #[test]
    fn test_origin_patterns() {
        let s = settings();
        assert!(s.is_origin_allowed(None));
        assert!(s.is_origin_allowed(Some("https://app.example.com")));
        assert!(s.is_origin_allowed(Some("https://api.trusted.io:8443")));
        assert!(!s.is_origin_allowed(Some("https://untrusted.io")));
        assert!(!s.is_origin_allowed(Some("https://eviltrusted.io")));
        assert!(!s.is_origin_allowed(Some("https://other.example.com")));
        assert!(CorsSettings::default().is_origin_allowed(Some("https://anything")));
    }

    #[tokio::test]
    async fn test_preflight_outcomes() {
        let ok = preflight(&[
            ("origin", "https://app.example.com"),
            ("access-control-request-method", "POST"),
        ])
        .await;
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(ok.headers()["access-control-allow-origin"], "https://app.example.com");
        assert_eq!(ok.headers()["access-control-allow-methods"], "GET, POST");
        assert_eq!(ok.headers()["access-control-max-age"], "600");
        assert_eq!(ok.headers()["access-control-allow-credentials"], "true");

        let forbidden = preflight(&[("origin", "https://evil.com")]).await;
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

        let bad_method = preflight(&[
            ("origin", "https://app.example.com"),
            ("access-control-request-method", "DELETE"),
        ])
        .await;
        assert_eq!(bad_method.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_response_headers_only_for_allowed_origin() {
        let mw = CorsMiddleware::new(settings());

        let req = request("GET", &[("origin", "https://api.trusted.io")]);
        let mut ctx = RequestContext::new(&req, None);
        let response = mw
            .process_response(&mut ctx, empty_response(StatusCode::OK))
            .await
            .unwrap();
        assert_eq!(response.headers()["access-control-allow-origin"], "https://api.trusted.io");
        assert_eq!(response.headers()["vary"], "Origin");

        let req = request("GET", &[("origin", "https://evil.com")]);
        let mut ctx = RequestContext::new(&req, None);
        assert!(matches!(
            mw.process_request(&mut ctx, req).await.unwrap(),
            Flow::Continue(_)
        ));
        let response = mw
            .process_response(&mut ctx, empty_response(StatusCode::OK))
            .await
            .unwrap();
        assert!(response.headers().get("access-control-allow-origin").is_none());
    }
}
