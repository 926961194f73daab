//! Built-in handlers, one per error family.
//!
//! Handlers render with a fixed status per family so that an error of a
//! derived kind gets its ancestor's treatment.

use super::DispatcherSettings;
use super::envelope::ErrorEnvelope;
use crate::error::AppError;
use crate::pipeline::{RequestContext, Response};
use http::{HeaderName, HeaderValue, StatusCode, header};

pub fn http_error(ctx: &RequestContext, error: &AppError, _: &DispatcherSettings) -> Response {
    let status = match error {
        AppError::Http { status, .. } => *status,
        _ => error.status(),
    };
    let mut response = ErrorEnvelope::new(ctx, status, "HTTP_ERROR", error.to_string()).into_response();
    if let AppError::Http { headers, .. } = error {
        for (name, value) in headers {
            response.headers_mut().insert(name.clone(), value.clone());
        }
    }
    response
}

pub fn application_error(ctx: &RequestContext, error: &AppError, _: &DispatcherSettings) -> Response {
    ErrorEnvelope::new(ctx, error.status(), error.code(), error.to_string()).into_response()
}

pub fn validation_error(ctx: &RequestContext, error: &AppError, _: &DispatcherSettings) -> Response {
    let mut envelope = ErrorEnvelope::new(ctx, StatusCode::BAD_REQUEST, error.code(), error.to_string());
    if let AppError::Validation { field: Some(field), .. } = error {
        envelope = envelope.with("field", field.as_str());
    }
    envelope.into_response()
}

pub fn authentication_error(ctx: &RequestContext, error: &AppError, _: &DispatcherSettings) -> Response {
    let mut response =
        ErrorEnvelope::new(ctx, StatusCode::UNAUTHORIZED, error.code(), error.to_string()).into_response();
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    response
}

pub fn authorization_error(ctx: &RequestContext, error: &AppError, _: &DispatcherSettings) -> Response {
    ErrorEnvelope::new(ctx, StatusCode::FORBIDDEN, error.code(), error.to_string()).into_response()
}

pub fn not_found(ctx: &RequestContext, error: &AppError, _: &DispatcherSettings) -> Response {
    let mut envelope = ErrorEnvelope::new(ctx, StatusCode::NOT_FOUND, error.code(), error.to_string());
    if let AppError::NotFound { resource: Some(resource), .. } = error {
        envelope = envelope.with("resource", resource.as_str());
    }
    envelope.into_response()
}

pub fn business_logic(ctx: &RequestContext, error: &AppError, _: &DispatcherSettings) -> Response {
    ErrorEnvelope::new(ctx, StatusCode::UNPROCESSABLE_ENTITY, error.code(), error.to_string())
        .into_response()
}

pub fn rate_limited(ctx: &RequestContext, error: &AppError, _: &DispatcherSettings) -> Response {
    let mut envelope =
        ErrorEnvelope::new(ctx, StatusCode::TOO_MANY_REQUESTS, error.code(), error.to_string());

    let AppError::RateLimitExceeded {
        remaining,
        reset,
        retry_after,
        ..
    } = error
    else {
        return envelope.into_response();
    };

    envelope = envelope.with("retry_after", *retry_after);
    let mut response = envelope.into_response();
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static("x-ratelimit-remaining"),
        HeaderValue::from(*remaining),
    );
    headers.insert(HeaderName::from_static("x-ratelimit-reset"), HeaderValue::from(*reset));
    headers.insert(header::RETRY_AFTER, HeaderValue::from(*retry_after));
    response
}

pub fn value_error(ctx: &RequestContext, error: &AppError, _: &DispatcherSettings) -> Response {
    ErrorEnvelope::new(ctx, StatusCode::BAD_REQUEST, "VALUE_ERROR", error.to_string()).into_response()
}

pub fn key_error(ctx: &RequestContext, error: &AppError, _: &DispatcherSettings) -> Response {
    ErrorEnvelope::new(
        ctx,
        StatusCode::BAD_REQUEST,
        "KEY_ERROR",
        format!("Missing required key: {}", error),
    )
    .into_response()
}

pub fn attribute_error(ctx: &RequestContext, _: &AppError, _: &DispatcherSettings) -> Response {
    ErrorEnvelope::new(
        ctx,
        StatusCode::INTERNAL_SERVER_ERROR,
        "ATTRIBUTE_ERROR",
        "Internal server error - attribute not found",
    )
    .into_response()
}

/// Fallback for anything no registered handler matches.
pub fn generic(ctx: &RequestContext, error: &AppError, settings: &DispatcherSettings) -> Response {
    let mut envelope = ErrorEnvelope::new(
        ctx,
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_SERVER_ERROR",
        "An unexpected error occurred",
    );

    if settings.debug_mode {
        let traceback = error.origin().map(|origin| origin.frames()).unwrap_or_default();
        envelope = envelope
            .with("exception_type", error.kind().name())
            .with("exception_message", error.to_string())
            .with("traceback", traceback);
    }

    envelope.into_response()
}
