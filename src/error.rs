//! Error taxonomy shared by every pipeline phase.
//!
//! Every middleware, strategy and business handler reports failures as an
//! [`AppError`]. Each variant carries a static [`ErrorKind`] tag; kinds form an
//! explicit parent chain so the exception dispatcher can resolve a handler for
//! an error whose exact kind has none registered (see
//! [`crate::dispatch::ExceptionDispatcher`]).
//!
//! Domain code can declare its own kinds and raise them through
//! [`AppError::typed`]:
//!
//! ```
//! use request_pipeline::error::{kinds, AppError, ErrorKind};
//!
//! static PRICE_FORMAT: ErrorKind = ErrorKind::derived("PriceFormatError", &kinds::VALUE_ERROR);
//!
//! let err = AppError::typed(&PRICE_FORMAT, "price must be positive");
//! assert!(err.kind().is_a(&kinds::VALUE_ERROR));
//! ```

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use http::{HeaderName, HeaderValue};
use serde_json::json;
use std::backtrace::Backtrace;
use std::fmt;

/// A static error tag with an optional parent tag.
///
/// Two kinds are equal when their names are equal.
#[derive(Debug)]
pub struct ErrorKind {
    name: &'static str,
    parent: Option<&'static ErrorKind>,
}

impl ErrorKind {
    /// Declares a kind with no parent.
    pub const fn root(name: &'static str) -> Self {
        Self { name, parent: None }
    }

    /// Declares a kind that is-a `parent`.
    pub const fn derived(name: &'static str, parent: &'static ErrorKind) -> Self {
        Self {
            name,
            parent: Some(parent),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn parent(&self) -> Option<&'static ErrorKind> {
        self.parent
    }

    /// Iterates `self` followed by each ancestor, nearest first.
    pub fn ancestry(&'static self) -> impl Iterator<Item = &'static ErrorKind> {
        std::iter::successors(Some(self), |kind| kind.parent)
    }

    /// Returns true if `self` equals `other` or has it somewhere in its parent chain.
    pub fn is_a(&self, other: &ErrorKind) -> bool {
        if self == other {
            return true;
        }
        let mut current = self.parent;
        while let Some(kind) = current {
            if kind == other {
                return true;
            }
            current = kind.parent;
        }
        false
    }
}

impl PartialEq for ErrorKind {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ErrorKind {}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Built-in error kinds.
pub mod kinds {
    use super::ErrorKind;

    pub static EXCEPTION: ErrorKind = ErrorKind::root("Exception");
    pub static HTTP: ErrorKind = ErrorKind::derived("HttpError", &EXCEPTION);
    pub static APPLICATION: ErrorKind = ErrorKind::derived("ApplicationError", &EXCEPTION);
    pub static VALIDATION: ErrorKind = ErrorKind::derived("ValidationError", &APPLICATION);
    pub static AUTHENTICATION: ErrorKind = ErrorKind::derived("AuthenticationError", &APPLICATION);
    pub static AUTHORIZATION: ErrorKind = ErrorKind::derived("AuthorizationError", &APPLICATION);
    pub static NOT_FOUND: ErrorKind = ErrorKind::derived("NotFoundError", &APPLICATION);
    pub static BUSINESS_LOGIC: ErrorKind = ErrorKind::derived("BusinessLogicError", &APPLICATION);
    pub static RATE_LIMIT_EXCEEDED: ErrorKind =
        ErrorKind::derived("RateLimitExceeded", &APPLICATION);
    pub static VALUE_ERROR: ErrorKind = ErrorKind::derived("ValueError", &EXCEPTION);
    pub static KEY_ERROR: ErrorKind = ErrorKind::derived("KeyError", &EXCEPTION);
    pub static ATTRIBUTE_ERROR: ErrorKind = ErrorKind::derived("AttributeError", &EXCEPTION);
    pub static INTERNAL: ErrorKind = ErrorKind::derived("InternalError", &EXCEPTION);
}

/// The error type produced anywhere inside the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A protocol-level failure with an explicit status and extra headers.
    #[error("{detail}")]
    Http {
        status: StatusCode,
        detail: String,
        headers: Vec<(HeaderName, HeaderValue)>,
    },
    /// A generic application failure with its own code and status.
    #[error("{message}")]
    Application {
        code: String,
        message: String,
        status: StatusCode,
    },
    #[error("{message}")]
    Validation {
        message: String,
        field: Option<String>,
    },
    #[error("{message}")]
    Authentication { message: String },
    #[error("{message}")]
    Authorization { message: String },
    #[error("{message}")]
    NotFound {
        message: String,
        resource: Option<String>,
    },
    #[error("{message}")]
    BusinessLogic { code: String, message: String },
    #[error("{message}")]
    RateLimitExceeded {
        message: String,
        remaining: u64,
        /// Unix timestamp (seconds) at which one more request is allowed.
        reset: i64,
        retry_after: u64,
    },
    #[error("{0}")]
    MissingKey(String),
    #[error("{0}")]
    InvalidValue(String),
    #[error("{0}")]
    MissingAttribute(String),
    /// An error tagged with a kind declared outside this crate.
    #[error("{message}")]
    Typed {
        kind: &'static ErrorKind,
        message: String,
    },
    #[error("{message}")]
    Internal { message: String, origin: ErrorOrigin },
}

/// Call stack recorded where an internal error was raised.
pub struct ErrorOrigin(Backtrace);

impl ErrorOrigin {
    fn capture() -> Self {
        Self(Backtrace::force_capture())
    }

    /// One entry per rendered backtrace line.
    pub fn frames(&self) -> Vec<String> {
        self.0.to_string().lines().map(str::to_string).collect()
    }
}

impl fmt::Debug for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ErrorOrigin(..)")
    }
}

impl AppError {
    pub fn http(status: StatusCode, detail: impl Into<String>) -> Self {
        Self::Http {
            status,
            detail: detail.into(),
            headers: Vec::new(),
        }
    }

    pub fn application(code: impl Into<String>, message: impl Into<String>, status: StatusCode) -> Self {
        Self::Application {
            code: code.into(),
            message: message.into(),
            status,
        }
    }

    pub fn validation(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Validation {
            message: message.into(),
            field: field.map(str::to_string),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Authorization {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>, resource: Option<&str>) -> Self {
        Self::NotFound {
            message: message.into(),
            resource: resource.map(str::to_string),
        }
    }

    pub fn business(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BusinessLogic {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn rate_limited(remaining: u64, reset: i64, retry_after: u64) -> Self {
        Self::RateLimitExceeded {
            message: "Rate limit exceeded".to_string(),
            remaining,
            reset,
            retry_after,
        }
    }

    pub fn missing_key(key: impl Into<String>) -> Self {
        Self::MissingKey(key.into())
    }

    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::InvalidValue(message.into())
    }

    pub fn missing_attribute(name: impl Into<String>) -> Self {
        Self::MissingAttribute(name.into())
    }

    pub fn typed(kind: &'static ErrorKind, message: impl Into<String>) -> Self {
        Self::Typed {
            kind,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            origin: ErrorOrigin::capture(),
        }
    }

    /// Where the error was raised, for errors that record it.
    pub fn origin(&self) -> Option<&ErrorOrigin> {
        match self {
            Self::Internal { origin, .. } => Some(origin),
            _ => None,
        }
    }

    /// The static tag used for handler resolution.
    pub fn kind(&self) -> &'static ErrorKind {
        match self {
            Self::Http { .. } => &kinds::HTTP,
            Self::Application { .. } => &kinds::APPLICATION,
            Self::Validation { .. } => &kinds::VALIDATION,
            Self::Authentication { .. } => &kinds::AUTHENTICATION,
            Self::Authorization { .. } => &kinds::AUTHORIZATION,
            Self::NotFound { .. } => &kinds::NOT_FOUND,
            Self::BusinessLogic { .. } => &kinds::BUSINESS_LOGIC,
            Self::RateLimitExceeded { .. } => &kinds::RATE_LIMIT_EXCEEDED,
            Self::MissingKey(_) => &kinds::KEY_ERROR,
            Self::InvalidValue(_) => &kinds::VALUE_ERROR,
            Self::MissingAttribute(_) => &kinds::ATTRIBUTE_ERROR,
            Self::Typed { kind, .. } => kind,
            Self::Internal { .. } => &kinds::INTERNAL,
        }
    }

    /// HTTP status this error maps to when rendered by its own kind's handler.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Http { status, .. } | Self::Application { status, .. } => *status,
            Self::Validation { .. } | Self::MissingKey(_) | Self::InvalidValue(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Authentication { .. } => StatusCode::UNAUTHORIZED,
            Self::Authorization { .. } => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::BusinessLogic { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Typed { kind, .. } => family_status(kind),
            Self::MissingAttribute(_) | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code placed in the envelope's `error` field.
    pub fn code(&self) -> String {
        match self {
            Self::Http { .. } => "HTTP_ERROR".to_string(),
            Self::Application { code, .. } | Self::BusinessLogic { code, .. } => code.clone(),
            Self::Validation { .. } => "VALIDATION_ERROR".to_string(),
            Self::Authentication { .. } => "AUTHENTICATION_ERROR".to_string(),
            Self::Authorization { .. } => "AUTHORIZATION_ERROR".to_string(),
            Self::NotFound { .. } => "NOT_FOUND".to_string(),
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED".to_string(),
            Self::MissingKey(_) => "KEY_ERROR".to_string(),
            Self::InvalidValue(_) => "VALUE_ERROR".to_string(),
            Self::MissingAttribute(_) => "ATTRIBUTE_ERROR".to_string(),
            Self::Typed { kind, .. } => kind.name().to_string(),
            Self::Internal { .. } => "INTERNAL_SERVER_ERROR".to_string(),
        }
    }

    /// True for errors that represent a client mistake rather than a server fault.
    pub fn is_client_error(&self) -> bool {
        self.kind().is_a(&kinds::APPLICATION) && self.status().is_client_error()
            || matches!(self, Self::Http { status, .. } if status.is_client_error())
    }
}

/// Status of the nearest built-in family in `kind`'s chain.
fn family_status(kind: &'static ErrorKind) -> StatusCode {
    let families: [(&ErrorKind, StatusCode); 8] = [
        (&kinds::VALIDATION, StatusCode::BAD_REQUEST),
        (&kinds::AUTHENTICATION, StatusCode::UNAUTHORIZED),
        (&kinds::AUTHORIZATION, StatusCode::FORBIDDEN),
        (&kinds::NOT_FOUND, StatusCode::NOT_FOUND),
        (&kinds::BUSINESS_LOGIC, StatusCode::UNPROCESSABLE_ENTITY),
        (&kinds::RATE_LIMIT_EXCEEDED, StatusCode::TOO_MANY_REQUESTS),
        (&kinds::VALUE_ERROR, StatusCode::BAD_REQUEST),
        (&kinds::KEY_ERROR, StatusCode::BAD_REQUEST),
    ];

    kind.ancestry()
        .find_map(|k| families.iter().find(|(family, _)| *family == k).map(|(_, s)| *s))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Transport-level rendering, used only outside the pipeline (e.g. unreadable bodies).
///
/// Inside the pipeline errors go through the exception dispatcher instead.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "error": self.code(),
            "message": self.to_string(),
            "status_code": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static CURRENCY: ErrorKind = ErrorKind::derived("CurrencyError", &kinds::VALUE_ERROR);
    static EXCHANGE_RATE: ErrorKind = ErrorKind::derived("ExchangeRateError", &CURRENCY);

    #[test]
    fn test_kind_chain_walks_all_ancestors() {
        assert!(EXCHANGE_RATE.is_a(&CURRENCY));
        assert!(EXCHANGE_RATE.is_a(&kinds::VALUE_ERROR));
        assert!(EXCHANGE_RATE.is_a(&kinds::EXCEPTION));
        assert!(!EXCHANGE_RATE.is_a(&kinds::KEY_ERROR));
        assert!(!kinds::VALUE_ERROR.is_a(&CURRENCY));
    }

    #[test]
    fn test_application_errors_share_parent() {
        for err in [
            AppError::validation("bad", Some("email")),
            AppError::unauthorized("nope"),
            AppError::forbidden("nope"),
            AppError::not_found("gone", None),
            AppError::business("BUSINESS_ERROR", "rule"),
            AppError::rate_limited(0, 0, 1),
        ] {
            assert!(err.kind().is_a(&kinds::APPLICATION), "{}", err.kind());
        }
        assert!(!AppError::invalid_value("x").kind().is_a(&kinds::APPLICATION));
    }

    #[test]
    fn test_status_and_code_mapping() {
        assert_eq!(AppError::validation("x", None).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::business("OUT_OF_STOCK", "x").code(), "OUT_OF_STOCK");
        assert_eq!(
            AppError::business("OUT_OF_STOCK", "x").status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(AppError::missing_key("id").code(), "KEY_ERROR");
        assert_eq!(AppError::typed(&CURRENCY, "x").code(), "CurrencyError");
        assert_eq!(
            AppError::missing_attribute("x").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_typed_error_takes_status_of_nearest_family() {
        static COUPON_EXPIRED: ErrorKind = ErrorKind::derived("CouponExpired", &kinds::VALIDATION);
        static STALE_COUPON: ErrorKind = ErrorKind::derived("StaleCoupon", &COUPON_EXPIRED);
        static LOCKED: ErrorKind = ErrorKind::derived("AccountLocked", &kinds::AUTHORIZATION);
        static ORPHAN: ErrorKind = ErrorKind::derived("Orphan", &kinds::APPLICATION);
        static DETACHED: ErrorKind = ErrorKind::root("Detached");

        assert_eq!(AppError::typed(&COUPON_EXPIRED, "x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::typed(&STALE_COUPON, "x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::typed(&EXCHANGE_RATE, "x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::typed(&LOCKED, "x").status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::typed(&ORPHAN, "x").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::typed(&DETACHED, "x").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert!(AppError::typed(&COUPON_EXPIRED, "x").is_client_error());
    }

    #[test]
    fn test_client_error_classification() {
        assert!(AppError::not_found("x", None).is_client_error());
        assert!(AppError::http(StatusCode::METHOD_NOT_ALLOWED, "x").is_client_error());
        assert!(!AppError::internal("x").is_client_error());
        assert!(!AppError::invalid_value("x").is_client_error());
    }
}
