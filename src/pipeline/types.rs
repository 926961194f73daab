//! Request/response aliases and small helpers for building responses.

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use serde::Serialize;

/// A fully buffered HTTP request flowing through the pipeline.
pub type Request = http::Request<Bytes>;

/// A fully buffered HTTP response flowing through the pipeline.
pub type Response = http::Response<Bytes>;

/// Result of a middleware's forward phase.
#[derive(Debug)]
pub enum Flow {
    /// Hand the (possibly modified) request to the next middleware.
    Continue(Request),
    /// Stop the forward phase and use this response as the terminal result.
    Respond(Response),
}

/// Builds a JSON response. Serialization failures degrade to an empty `{}` body.
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response {
    let bytes = match serde_json::to_vec(body) {
        Ok(bytes) => Bytes::from(bytes),
        Err(e) => {
            tracing::error!("Failed to serialize response body: {}", e);
            Bytes::from_static(b"{}")
        }
    };

    let mut response = Response::new(bytes);
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

/// Builds a response with no body.
pub fn empty_response(status: StatusCode) -> Response {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = status;
    response
}

/// Inserts a header from a string value, skipping values that are not valid header text.
pub fn set_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => tracing::debug!("Skipping invalid value for header {}", name),
    }
}

/// Reads a header as UTF-8 text.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
