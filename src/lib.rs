//! # Request Pipeline
//!
//! An ordered middleware pipeline for HTTP APIs: authentication, rate
//! limiting, response caching, request logging and typed error dispatch
//! around a business handler, served with Axum.
//!
//! ## Architecture
//!
//! - **Engine** ([`pipeline`]) - middleware registry, service container and the two-phase executor
//! - **Errors** ([`error`], [`dispatch`]) - the shared error type and the exception dispatcher
//! - **Stages** ([`auth`], [`rate_limit`], [`cache`], [`middlewares`]) - concrete middlewares
//! - **Assembly** ([`setup`], [`server`]) - the default chain and the HTTP transport
//! - **Demo API** ([`api`]) - business endpoints behind the pipeline
//!
//! ## Request flow
//!
//! 1. Forward phase: each enabled middleware in ascending priority may pass
//!    the request on or answer it directly
//! 2. The handler runs if no middleware answered
//! 3. Backward phase: middlewares that ran see the response in reverse order
//! 4. Errors from any phase are rendered by the dispatcher as a JSON envelope
//!
//! ## Quick Start
//!
//! ```bash
//! export JWT_SECRET="change-me"
//! export CACHE_BACKEND=external REDIS_URL="redis://localhost:6379"  # Optional
//!
//! cargo run
//! ```
//!
//! ## Configuration
//!
//! Service configuration is loaded from environment variables via [`config::Config`].
//! See [`config`] module for available options.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod middlewares;
pub mod pipeline;
pub mod rate_limit;
pub mod server;
pub mod setup;
pub mod utils;

pub use error::AppError;
pub use server::AppState;

/// Commonly used types for external consumers.
///
/// Re-exports frequently used types to simplify imports for library users
/// and integration tests.
pub mod prelude {
    pub use crate::auth::{AuthStrategy, AuthenticatedUser, Credentials, StrategySet};
    pub use crate::dispatch::{DispatcherSettings, ExceptionDispatcher};
    pub use crate::error::AppError;
    pub use crate::pipeline::{
        Flow, Handler, Middleware, MiddlewareConfig, MiddlewareDescriptor, MiddlewareRegistry,
        PipelineExecutor, PipelineOutcome, Request, RequestContext, Response, ServiceContainer,
    };
    pub use crate::server::AppState;
}
