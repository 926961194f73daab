//! The middleware pipeline engine.
//!
//! - [`registry`] - ordered catalog of middleware descriptors and lazily built instances
//! - [`executor`] - runs forward phases, the handler and backward phases for one request
//! - [`context`] - per-request state shared by every stage
//! - [`container`] - named services handed to middleware constructors
//!
//! ```text
//! request ─▶ A.process_request ─▶ B.process_request ─▶ handler
//!                                                         │
//! response ◀─ A.process_response ◀─ B.process_response ◀─┘
//! ```

pub mod config;
pub mod container;
pub mod context;
pub mod executor;
pub mod middleware;
pub mod registry;
pub mod types;

pub use config::MiddlewareConfig;
pub use container::ServiceContainer;
pub use context::{RateLimitInfo, RequestContext};
pub use executor::{PipelineExecutor, PipelineOutcome};
pub use middleware::{Handler, HandlerContext, HandlerFn, Middleware, handler_fn};
pub use registry::{
    MiddlewareConstructor, MiddlewareDescriptor, MiddlewareRegistry, PipelineInstance,
    RegistryError,
};
pub use types::{Flow, Request, Response, empty_response, header_str, json_response, set_header};
