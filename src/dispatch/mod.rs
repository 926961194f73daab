//! Exception dispatcher: resolves an [`AppError`] to a rendered error envelope.
//!
//! Handlers are kept in an ordered list of `(matcher, handler)` pairs.
//! Resolution for an error of kind `K`:
//!
//! 1. the first entry registered for exactly `K`;
//! 2. otherwise the first entry, in registration order, whose kind `K` is-a
//!    (or whose predicate accepts the error);
//! 3. otherwise the generic 500 handler.
//!
//! Every dispatch is logged before the handler runs. Logging failures are
//! swallowed; a panicking handler yields a bare 500 envelope.

pub mod envelope;
pub mod handlers;

pub use envelope::ErrorEnvelope;

use crate::error::{AppError, ErrorKind, kinds};
use crate::pipeline::{RequestContext, Response};
use metrics::counter;
use serde::Deserialize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{error, warn};

/// Renders one error into a response.
pub type ErrorHandler =
    Arc<dyn Fn(&RequestContext, &AppError, &DispatcherSettings) -> Response + Send + Sync>;

/// Wraps a closure as an [`ErrorHandler`].
pub fn error_handler<F>(f: F) -> ErrorHandler
where
    F: Fn(&RequestContext, &AppError, &DispatcherSettings) -> Response + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Dispatcher config: `{debug_mode, log_exceptions}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    /// Adds exception type, message and a stack trace to generic 500 envelopes.
    pub debug_mode: bool,
    pub log_exceptions: bool,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            debug_mode: false,
            log_exceptions: true,
        }
    }
}

/// What gets logged for each dispatched error.
#[derive(Debug, Clone)]
pub struct ExceptionRecord<'a> {
    pub error: &'a AppError,
    pub request_id: &'a str,
    pub method: &'a str,
    pub path: &'a str,
    pub client_ip: Option<String>,
    pub user_agent: Option<&'a str>,
    pub user_id: Option<&'a str>,
}

#[derive(Debug, thiserror::Error)]
#[error("exception logging failed: {0}")]
pub struct LogError(pub String);

/// Sink for dispatch records.
pub trait ExceptionLogger: Send + Sync {
    fn log(&self, record: &ExceptionRecord<'_>) -> Result<(), LogError>;
}

/// Logs client errors at `warn` and everything else at `error`.
pub struct TracingExceptionLogger;

impl ExceptionLogger for TracingExceptionLogger {
    fn log(&self, record: &ExceptionRecord<'_>) -> Result<(), LogError> {
        let err = record.error;
        let client_ip = record.client_ip.as_deref().unwrap_or("-");
        let user_agent = record.user_agent.unwrap_or("-");
        let user_id = record.user_id.unwrap_or("-");

        if err.is_client_error() {
            warn!(
                request_id = record.request_id,
                method = record.method,
                path = record.path,
                client_ip,
                user_agent,
                user_id,
                exception_type = err.kind().name(),
                status = err.status().as_u16(),
                "Application error: {}",
                err
            );
        } else {
            error!(
                request_id = record.request_id,
                method = record.method,
                path = record.path,
                client_ip,
                user_agent,
                user_id,
                exception_type = err.kind().name(),
                "Unhandled error: {}",
                err
            );
        }
        Ok(())
    }
}

enum Matcher {
    Kind(&'static ErrorKind),
    Predicate(Arc<dyn Fn(&AppError) -> bool + Send + Sync>),
}

struct Entry {
    matcher: Matcher,
    handler: ErrorHandler,
}

pub struct ExceptionDispatcher {
    settings: DispatcherSettings,
    entries: Vec<Entry>,
    fallback: ErrorHandler,
    logger: Arc<dyn ExceptionLogger>,
}

impl ExceptionDispatcher {
    /// Creates a dispatcher with the built-in handler table.
    pub fn new(settings: DispatcherSettings) -> Self {
        let mut dispatcher = Self::empty(settings);
        dispatcher.register_handler(&kinds::HTTP, Arc::new(handlers::http_error));
        dispatcher.register_handler(&kinds::APPLICATION, Arc::new(handlers::application_error));
        dispatcher.register_handler(&kinds::VALIDATION, Arc::new(handlers::validation_error));
        dispatcher.register_handler(&kinds::AUTHENTICATION, Arc::new(handlers::authentication_error));
        dispatcher.register_handler(&kinds::AUTHORIZATION, Arc::new(handlers::authorization_error));
        dispatcher.register_handler(&kinds::NOT_FOUND, Arc::new(handlers::not_found));
        dispatcher.register_handler(&kinds::BUSINESS_LOGIC, Arc::new(handlers::business_logic));
        dispatcher.register_handler(&kinds::RATE_LIMIT_EXCEEDED, Arc::new(handlers::rate_limited));
        dispatcher.register_handler(&kinds::VALUE_ERROR, Arc::new(handlers::value_error));
        dispatcher.register_handler(&kinds::KEY_ERROR, Arc::new(handlers::key_error));
        dispatcher.register_handler(&kinds::ATTRIBUTE_ERROR, Arc::new(handlers::attribute_error));
        dispatcher
    }

    /// Creates a dispatcher where every error goes to the generic handler.
    pub fn empty(settings: DispatcherSettings) -> Self {
        Self {
            settings,
            entries: Vec::new(),
            fallback: Arc::new(handlers::generic),
            logger: Arc::new(TracingExceptionLogger),
        }
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    pub fn with_logger(mut self, logger: Arc<dyn ExceptionLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Registers a handler for a kind, replacing in place any handler already
    /// registered for exactly that kind.
    pub fn register_handler(&mut self, kind: &'static ErrorKind, handler: ErrorHandler) {
        let existing = self
            .entries
            .iter_mut()
            .find(|e| matches!(e.matcher, Matcher::Kind(k) if k == kind));

        match existing {
            Some(entry) => entry.handler = handler,
            None => self.entries.push(Entry {
                matcher: Matcher::Kind(kind),
                handler,
            }),
        }
    }

    /// Appends a predicate-based handler consulted during the ordered scan.
    pub fn register_predicate<P>(&mut self, predicate: P, handler: ErrorHandler)
    where
        P: Fn(&AppError) -> bool + Send + Sync + 'static,
    {
        self.entries.push(Entry {
            matcher: Matcher::Predicate(Arc::new(predicate)),
            handler,
        });
    }

    pub fn set_fallback(&mut self, handler: ErrorHandler) {
        self.fallback = handler;
    }

    fn resolve(&self, error: &AppError) -> &ErrorHandler {
        let kind = error.kind();

        let exact = self
            .entries
            .iter()
            .find(|e| matches!(e.matcher, Matcher::Kind(k) if k == kind));
        if let Some(entry) = exact {
            return &entry.handler;
        }

        self.entries
            .iter()
            .find(|e| match &e.matcher {
                Matcher::Kind(k) => kind.is_a(k),
                Matcher::Predicate(p) => p(error),
            })
            .map(|e| &e.handler)
            .unwrap_or(&self.fallback)
    }

    /// Logs the error and renders it.
    pub fn handle(&self, ctx: &RequestContext, error: &AppError) -> Response {
        counter!("exceptions_dispatched_total", "error" => error.kind().name()).increment(1);

        if self.settings.log_exceptions {
            self.log(ctx, error);
        }

        let handler = self.resolve(error);
        match catch_unwind(AssertUnwindSafe(|| handler(ctx, error, &self.settings))) {
            Ok(response) => response,
            Err(_) => {
                error!(request_id = %ctx.request_id, "Error handler panicked");
                envelope::bare_internal_error()
            }
        }
    }

    fn log(&self, ctx: &RequestContext, error: &AppError) {
        let record = ExceptionRecord {
            error,
            request_id: &ctx.request_id,
            method: ctx.method.as_str(),
            path: &ctx.path,
            client_ip: ctx.client_ip(),
            user_agent: ctx.header("user-agent"),
            user_id: ctx.user_id(),
        };

        match catch_unwind(AssertUnwindSafe(|| self.logger.log(&record))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => eprintln!("{}", e),
            Err(_) => eprintln!("exception logger panicked"),
        }
    }
}

impl Default for ExceptionDispatcher {
    fn default() -> Self {
        Self::new(DispatcherSettings::default())
    }
}
