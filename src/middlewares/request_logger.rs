//! Request/response logging stage.
//!
//! Response lines use the access-log layout:
//!
//! ```text
//! {ip} - {user} "{method} {path} {version}" {status} {bytes} "{referer}" "{ua}" {ms}ms
//! ```

use crate::error::AppError;
use crate::pipeline::{
    Flow, Middleware, MiddlewareConfig, MiddlewareConstructor, Request, RequestContext, Response,
    ServiceContainer, set_header,
};
use crate::utils::path_pattern::matches_any;
use async_trait::async_trait;
use http::{HeaderName, Method, header};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};

const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_LOGGED_BODY: usize = 1000;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RequestLoggerSettings {
    pub log_requests: bool,
    pub log_responses: bool,
    pub log_headers: bool,
    /// Logs up to 1000 bytes of `POST`/`PUT`/`PATCH` bodies.
    pub log_body: bool,
    pub excluded_paths: Vec<String>,
}

impl Default for RequestLoggerSettings {
    fn default() -> Self {
        Self {
            log_requests: true,
            log_responses: true,
            log_headers: false,
            log_body: false,
            excluded_paths: vec!["/health".to_string(), "/metrics".to_string()],
        }
    }
}

/// Marker stored in the context extensions of logged requests.
#[derive(Debug, Clone)]
struct Logged {
    version: http::Version,
}

pub struct RequestLoggerMiddleware {
    settings: RequestLoggerSettings,
}

impl RequestLoggerMiddleware {
    pub fn new(settings: RequestLoggerSettings) -> Self {
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

    fn header_names(headers: &http::HeaderMap) -> String {
        headers
            .keys()
            .map(HeaderName::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    fn body_preview(request: &Request) -> Option<String> {
        if !matches!(*request.method(), Method::POST | Method::PUT | Method::PATCH) {
            return None;
        }
        let body = request.body();
        if body.is_empty() {
            return None;
        }
        let end = body.len().min(MAX_LOGGED_BODY);
        Some(String::from_utf8_lossy(&body[..end]).into_owned())
    }
}

#[async_trait]
impl Middleware for RequestLoggerMiddleware {
    fn name(&self) -> &str {
        "request_logger"
    }

    async fn process_request(
        &self,
        ctx: &mut RequestContext,
        request: Request,
    ) -> Result<Flow, AppError> {
        if let Some(incoming) = ctx
            .header(REQUEST_ID_HEADER)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
        {
            ctx.request_id = incoming;
        }

        if matches_any(&self.settings.excluded_paths, &ctx.path) {
            return Ok(Flow::Continue(request));
        }
        ctx.extensions.insert(Logged {
            version: request.version(),
        });

        if self.settings.log_requests {
            let headers = self
                .settings
                .log_headers
                .then(|| Self::header_names(&ctx.headers));
            let body = if self.settings.log_body {
                Self::body_preview(&request)
            } else {
                None
            };
            info!(
                request_id = %ctx.request_id,
                method = %ctx.method,
                path = %ctx.path,
                query = ctx.query.as_deref().unwrap_or(""),
                client_ip = ctx.client_ip().as_deref().unwrap_or("-"),
                user_agent = ctx.header("user-agent").unwrap_or("-"),
                headers = headers.as_deref(),
                body = body.as_deref(),
                "HTTP Request: {} {}",
                ctx.method,
                ctx.path
            );
        }

        Ok(Flow::Continue(request))
    }

    async fn process_response(
        &self,
        ctx: &mut RequestContext,
        mut response: Response,
    ) -> Result<Response, AppError> {
        set_header(
            response.headers_mut(),
            HeaderName::from_static(REQUEST_ID_HEADER),
            &ctx.request_id,
        );

        let Some(logged) = ctx.extensions.get::<Logged>() else {
            return Ok(response);
        };
        if !self.settings.log_responses {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let line = format!(
            r#"{ip} - {user} "{method} {path} {version:?}" {status} {bytes} "{referer}" "{ua}" {ms}ms"#,
            ip = ctx.client_ip().as_deref().unwrap_or("-"),
            user = ctx.user_id().unwrap_or("-"),
            method = ctx.method,
            path = ctx.path,
            version = logged.version,
            status = status,
            bytes = response.body().len(),
            referer = ctx.header(header::REFERER.as_str()).unwrap_or("-"),
            ua = ctx.header(header::USER_AGENT.as_str()).unwrap_or("-"),
            ms = ctx.elapsed().as_millis(),
        );

        if status >= 500 {
            error!(request_id = %ctx.request_id, status, "{}", line);
        } else if status >= 400 {
            warn!(request_id = %ctx.request_id, status, "{}", line);
        } else {
            info!(request_id = %ctx.request_id, status, "{}", line);
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::empty_response;
    use bytes::Bytes;
    use http::StatusCode;

    fn request(path: &str, headers: &[(&str, &str)]) -> Request {
        let mut builder = http::Request::builder().uri(path);
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(Bytes::new()).unwrap()
    }

    async fn round_trip(mw: &RequestLoggerMiddleware, req: Request, status: StatusCode) -> (RequestContext, Response) {
        let mut ctx = RequestContext::new(&req, None);
        mw.process_request(&mut ctx, req).await.unwrap();
        let response = mw.process_response(&mut ctx, empty_response(status)).await.unwrap();
        (ctx, response)
    }

    #[tokio::test]
    async fn test_sets_request_id_header() {
        let mw = RequestLoggerMiddleware::new(RequestLoggerSettings::default());
        let (ctx, response) = round_trip(&mw, request("/api/products", &[]), StatusCode::OK).await;
        assert_eq!(ctx.request_id.len(), 8);
        assert_eq!(response.headers()["x-request-id"], ctx.request_id.as_str());
        assert!(ctx.extensions.get::<Logged>().is_some());
    }

    #[tokio::test]
    async fn test_reuses_incoming_request_id() {
        let mw = RequestLoggerMiddleware::new(RequestLoggerSettings::default());
        let req = request("/api/products", &[("x-request-id", "upstream-42")]);
        let (ctx, response) = round_trip(&mw, req, StatusCode::INTERNAL_SERVER_ERROR).await;
        assert_eq!(ctx.request_id, "upstream-42");
        assert_eq!(response.headers()["x-request-id"], "upstream-42");
    }

    #[tokio::test]
    async fn test_excluded_paths_are_not_logged() {
        let mw = RequestLoggerMiddleware::new(RequestLoggerSettings::default());
        let (ctx, response) = round_trip(&mw, request("/health", &[]), StatusCode::OK).await;
        assert!(ctx.extensions.get::<Logged>().is_none());
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[test]
    fn test_body_preview_is_bounded_and_method_specific() {
        let long = "x".repeat(5000);
        let post = http::Request::builder()
            .method("POST")
            .uri("/")
            .body(Bytes::from(long.clone()))
            .unwrap();
        assert_eq!(RequestLoggerMiddleware::body_preview(&post).unwrap().len(), MAX_LOGGED_BODY);

        let get = http::Request::builder().uri("/").body(Bytes::from(long)).unwrap();
        assert!(RequestLoggerMiddleware::body_preview(&get).is_none());
    }
}
