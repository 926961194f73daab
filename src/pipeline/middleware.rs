//! The middleware and handler contracts.

use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::pipeline::context::RequestContext;
use crate::pipeline::types::{Flow, Request, Response};
use async_trait::async_trait;
use std::future::Future;

/// One stage of the pipeline.
///
/// The executor calls [`process_request`](Middleware::process_request) in
/// ascending priority order and
/// [`process_response`](Middleware::process_response) in the exact reverse
/// order of the stages whose forward phase ran.
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    /// Forward phase. Return [`Flow::Respond`] to short-circuit the chain.
    async fn process_request(
        &self,
        ctx: &mut RequestContext,
        request: Request,
    ) -> Result<Flow, AppError>;

    /// Backward phase. May annotate or replace the response.
    async fn process_response(
        &self,
        _ctx: &mut RequestContext,
        response: Response,
    ) -> Result<Response, AppError> {
        Ok(response)
    }

    /// Gives a stage that already ran a chance to turn an error into a response
    /// before the exception dispatcher sees it.
    async fn handle_exception(&self, _ctx: &RequestContext, _error: &AppError) -> Option<Response> {
        None
    }
}

/// Read-only view of the context handed to business handlers built with [`handler_fn`].
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub request_id: String,
    pub user: Option<AuthenticatedUser>,
    pub client_ip: Option<String>,
}

impl From<&RequestContext> for HandlerContext {
    fn from(ctx: &RequestContext) -> Self {
        Self {
            request_id: ctx.request_id.clone(),
            user: ctx.user.clone(),
            client_ip: ctx.client_ip(),
        }
    }
}

/// The business endpoint the pipeline wraps.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, ctx: &mut RequestContext, request: Request) -> Result<Response, AppError>;
}

/// Adapter returned by [`handler_fn`].
pub struct HandlerFn<F> {
    f: F,
}

/// Wraps an async closure as a [`Handler`].
///
/// ```
/// use request_pipeline::pipeline::{handler_fn, json_response};
/// use http::StatusCode;
///
/// let handler = handler_fn(|_req, _ctx| async move {
///     Ok(json_response(StatusCode::OK, &serde_json::json!({"status": "ok"})))
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Request, HandlerContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response, AppError>> + Send,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Request, HandlerContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response, AppError>> + Send,
{
    async fn call(&self, ctx: &mut RequestContext, request: Request) -> Result<Response, AppError> {
        (self.f)(request, HandlerContext::from(&*ctx)).await
    }
}
