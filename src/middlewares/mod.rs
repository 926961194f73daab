//! Concrete pipeline stages that are not tied to auth, caching or rate limiting.

pub mod cors;
pub mod request_logger;

pub use cors::{CorsMiddleware, CorsSettings};
pub use request_logger::{RequestLoggerMiddleware, RequestLoggerSettings};
