//! Two-phase execution of the registered middleware chain around a handler.

use crate::dispatch::ExceptionDispatcher;
use crate::error::AppError;
use crate::pipeline::context::RequestContext;
use crate::pipeline::middleware::Handler;
use crate::pipeline::registry::{MiddlewareRegistry, PipelineInstance};
use crate::pipeline::types::{Flow, Request, Response};
use metrics::counter;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// How a pipeline run ended.
#[derive(Debug)]
pub enum PipelineOutcome {
    Completed(Response),
    /// The transport gave up on the request; no response was produced.
    Cancelled,
}

impl PipelineOutcome {
    pub fn into_response(self) -> Option<Response> {
        match self {
            Self::Completed(response) => Some(response),
            Self::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

enum Forward {
    Reached(Request),
    ShortCircuit(Response),
}

/// Runs requests through the enabled middlewares of a registry.
///
/// Forward phases run in ascending priority order. A stage that returns
/// [`Flow::Respond`] ends the forward phase; the handler is skipped and the
/// backward phase runs only for the stages before it, in reverse. Any error
/// ends the run: stages that already ran may claim it through
/// [`Middleware::handle_exception`](crate::pipeline::Middleware::handle_exception),
/// otherwise the dispatcher renders it, and no further phases run.
pub struct PipelineExecutor {
    registry: Arc<MiddlewareRegistry>,
    dispatcher: Arc<ExceptionDispatcher>,
}

impl PipelineExecutor {
    pub fn new(registry: Arc<MiddlewareRegistry>, dispatcher: Arc<ExceptionDispatcher>) -> Self {
        Self {
            registry,
            dispatcher,
        }
    }

    pub fn registry(&self) -> &Arc<MiddlewareRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<ExceptionDispatcher> {
        &self.dispatcher
    }

    pub async fn execute(
        &self,
        request: Request,
        client_addr: Option<SocketAddr>,
        handler: &dyn Handler,
        cancel: &CancellationToken,
    ) -> PipelineOutcome {
        let mut ctx = RequestContext::new(&request, client_addr);
        self.execute_in(&mut ctx, request, handler, cancel).await
    }

    /// Like [`execute`](Self::execute) but with a caller-owned context, which
    /// stays inspectable after the run.
    pub async fn execute_in(
        &self,
        ctx: &mut RequestContext,
        request: Request,
        handler: &dyn Handler,
        cancel: &CancellationToken,
    ) -> PipelineOutcome {
        let chain = self.registry.get_all_ordered();
        counter!("pipeline_requests_total").increment(1);

        let mut completed = 0;
        let mut request = request;

        let forward = 'forward: {
            for (index, stage) in chain.iter().enumerate() {
                trace!(middleware = %stage.name, "process_request");
                let Some(result) =
                    guarded(cancel, stage.middleware.process_request(ctx, request)).await
                else {
                    return cancelled(ctx, &stage.name);
                };

                match result {
                    Ok(Flow::Continue(next)) => {
                        ctx.trace.push(stage.name.clone());
                        completed = index + 1;
                        request = next;
                    }
                    Ok(Flow::Respond(response)) => {
                        debug!(
                            request_id = %ctx.request_id,
                            middleware = %stage.name,
                            status = response.status().as_u16(),
                            "Pipeline short-circuited"
                        );
                        counter!("pipeline_short_circuits_total", "middleware" => stage.name.clone())
                            .increment(1);
                        break 'forward Forward::ShortCircuit(response);
                    }
                    Err(error) => {
                        let response = self.recover(&chain[..=index], ctx, error).await;
                        return PipelineOutcome::Completed(response);
                    }
                }
            }
            Forward::Reached(request)
        };

        let mut response = match forward {
            Forward::ShortCircuit(response) => response,
            Forward::Reached(request) => {
                match guarded(cancel, handler.call(ctx, request)).await {
                    None => return cancelled(ctx, "handler"),
                    Some(Ok(response)) => response,
                    Some(Err(error)) => {
                        let response = self.recover(&chain[..completed], ctx, error).await;
                        return PipelineOutcome::Completed(response);
                    }
                }
            }
        };

        let ran = &chain[..completed];
        for stage in ran.iter().rev() {
            trace!(middleware = %stage.name, "process_response");
            let Some(result) =
                guarded(cancel, stage.middleware.process_response(ctx, response)).await
            else {
                return cancelled(ctx, &stage.name);
            };

            match result {
                Ok(next) => response = next,
                Err(error) => {
                    let response = self.recover(ran, ctx, error).await;
                    return PipelineOutcome::Completed(response);
                }
            }
        }

        PipelineOutcome::Completed(response)
    }

    /// Offers the error to the stages that ran, innermost first, then to the dispatcher.
    async fn recover(
        &self,
        stages: &[PipelineInstance],
        ctx: &mut RequestContext,
        error: AppError,
    ) -> Response {
        for stage in stages.iter().rev() {
            if let Some(response) = stage.middleware.handle_exception(ctx, &error).await {
                debug!(middleware = %stage.name, error = %error, "Error handled by middleware");
                return response;
            }
        }

        self.dispatcher.handle(ctx, &error)
    }
}

/// Runs `fut` unless the token fires first.
async fn guarded<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = fut => Some(output),
    }
}

fn cancelled(ctx: &RequestContext, at: &str) -> PipelineOutcome {
    debug!(request_id = %ctx.request_id, at, "Request cancelled");
    PipelineOutcome::Cancelled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatcherSettings;
    use crate::pipeline::config::MiddlewareConfig;
    use crate::pipeline::container::ServiceContainer;
    use crate::pipeline::middleware::{Middleware, handler_fn};
    use crate::pipeline::registry::{MiddlewareConstructor, MiddlewareDescriptor};
    use crate::pipeline::types::{empty_response, json_response};
    use async_trait::async_trait;
    use bytes::Bytes;
    use http::StatusCode;
    use parking_lot::Mutex;
    use serde_json::json;

    type Log = Arc<Mutex<Vec<String>>>;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Pass,
        ShortCircuit,
        FailRequest,
        FailResponse,
        Recover,
    }

    struct Recorder {
        name: String,
        log: Log,
        behaviour: Behaviour,
    }

    #[async_trait]
    impl Middleware for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        async fn process_request(
            &self,
            _ctx: &mut RequestContext,
            request: Request,
        ) -> Result<Flow, AppError> {
            self.log.lock().push(format!("{}.request", self.name));
            match self.behaviour {
                Behaviour::ShortCircuit => Ok(Flow::Respond(empty_response(StatusCode::ACCEPTED))),
                Behaviour::FailRequest => Err(AppError::validation("bad input", Some("name"))),
                _ => Ok(Flow::Continue(request)),
            }
        }

        async fn process_response(
            &self,
            _ctx: &mut RequestContext,
            response: Response,
        ) -> Result<Response, AppError> {
            self.log.lock().push(format!("{}.response", self.name));
            match self.behaviour {
                Behaviour::FailResponse => Err(AppError::internal("response phase broke")),
                _ => Ok(response),
            }
        }

        async fn handle_exception(&self, _ctx: &RequestContext, _error: &AppError) -> Option<Response> {
            match self.behaviour {
                Behaviour::Recover => {
                    self.log.lock().push(format!("{}.recover", self.name));
                    Some(empty_response(StatusCode::SERVICE_UNAVAILABLE))
                }
                _ => None,
            }
        }
    }

    fn recorder(name: &str, log: &Log, behaviour: Behaviour) -> MiddlewareConstructor {
        let name = name.to_string();
        let log = log.clone();
        Arc::new(
            move |_: &MiddlewareConfig,
                  _: &ServiceContainer|
                  -> Result<Arc<dyn Middleware>, AppError> {
                Ok(Arc::new(Recorder {
                    name: name.clone(),
                    log: log.clone(),
                    behaviour,
                }))
            },
        )
    }

    fn executor(stages: &[(&str, i32, Behaviour)], log: &Log) -> PipelineExecutor {
        let registry = Arc::new(MiddlewareRegistry::new(Arc::new(ServiceContainer::new())));
        for (name, priority, behaviour) in stages {
            registry
                .register(
                    MiddlewareDescriptor::new(*name, recorder(name, log, *behaviour))
                        .priority(*priority),
                )
                .unwrap();
        }
        let dispatcher = Arc::new(ExceptionDispatcher::new(DispatcherSettings::default()));
        PipelineExecutor::new(registry, dispatcher)
    }

    fn request() -> Request {
        http::Request::builder()
            .uri("/api/orders")
            .body(Bytes::new())
            .unwrap()
    }

    async fn run(executor: &PipelineExecutor, log: &Log) -> (Response, RequestContext) {
        let req = request();
        let mut ctx = RequestContext::new(&req, None);
        let handler_log = log.clone();
        let handler = handler_fn(move |_req, _ctx| {
            let log = handler_log.clone();
            async move {
                log.lock().push("handler".to_string());
                Ok(json_response(StatusCode::OK, &json!({"ok": true})))
            }
        });
        let outcome = executor
            .execute_in(&mut ctx, req, &handler, &CancellationToken::new())
            .await;
        (outcome.into_response().unwrap(), ctx)
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().clone()
    }

    #[tokio::test]
    async fn test_forward_then_reverse_order() {
        let log = Log::default();
        let executor = executor(&[("b", 10, Behaviour::Pass), ("a", 5, Behaviour::Pass)], &log);

        let (response, ctx) = run(&executor, &log).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            entries(&log),
            vec!["a.request", "b.request", "handler", "b.response", "a.response"]
        );
        assert_eq!(ctx.trace, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_handler_and_later_stages() {
        let log = Log::default();
        let executor = executor(
            &[
                ("a", 1, Behaviour::Pass),
                ("b", 2, Behaviour::Pass),
                ("gate", 3, Behaviour::ShortCircuit),
                ("d", 4, Behaviour::Pass),
            ],
            &log,
        );

        let (response, ctx) = run(&executor, &log).await;

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(
            entries(&log),
            vec!["a.request", "b.request", "gate.request", "b.response", "a.response"]
        );
        assert_eq!(ctx.trace, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_forward_error_goes_to_dispatcher_without_backward_phase() {
        let log = Log::default();
        let executor = executor(
            &[("a", 1, Behaviour::Pass), ("bad", 2, Behaviour::FailRequest), ("c", 3, Behaviour::Pass)],
            &log,
        );

        let (response, _) = run(&executor, &log).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["error"], "VALIDATION_ERROR");
        assert_eq!(body["field"], "name");
        assert_eq!(body["path"], "/api/orders");
        assert_eq!(entries(&log), vec!["a.request", "bad.request"]);
    }

    #[tokio::test]
    async fn test_backward_error_stops_remaining_backward_stages() {
        let log = Log::default();
        let executor = executor(
            &[("outer", 1, Behaviour::Pass), ("inner", 2, Behaviour::FailResponse)],
            &log,
        );

        let (response, _) = run(&executor, &log).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            entries(&log),
            vec!["outer.request", "inner.request", "handler", "inner.response"]
        );
    }

    #[tokio::test]
    async fn test_middleware_may_claim_an_error() {
        let log = Log::default();
        let executor = executor(
            &[("guard", 1, Behaviour::Recover), ("bad", 2, Behaviour::FailRequest)],
            &log,
        );

        let (response, _) = run(&executor, &log).await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(entries(&log), vec!["guard.request", "bad.request", "guard.recover"]);
    }

    #[tokio::test]
    async fn test_handler_error_is_dispatched() {
        let log = Log::default();
        let executor = executor(&[("a", 1, Behaviour::Pass)], &log);
        let handler = handler_fn(|_req, _ctx| async move {
            Err::<Response, _>(AppError::not_found("Order not found", Some("order")))
        });

        let outcome = executor
            .execute(request(), None, &handler, &CancellationToken::new())
            .await;
        let response = outcome.into_response().unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["resource"], "order");
        assert_eq!(entries(&log), vec!["a.request"]);
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_the_run() {
        let log = Log::default();
        let executor = executor(&[("a", 1, Behaviour::Pass)], &log);
        let handler = handler_fn(|_req, _ctx| async move { Ok(empty_response(StatusCode::OK)) });
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = executor.execute(request(), None, &handler, &cancel).await;

        assert!(outcome.is_cancelled());
        assert!(entries(&log).is_empty());
    }
}
