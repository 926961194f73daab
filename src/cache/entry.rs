use super::backend::{CacheError, CacheResult};
use crate::pipeline::Response;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use http::{HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};

/// Headers never replayed from the cache.
const SKIPPED_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "transfer-encoding",
    "content-length",
    "upgrade",
    "te",
    "trailer",
    "proxy-authenticate",
    "proxy-authorization",
];

fn is_stored(name: &HeaderName) -> bool {
    let name = name.as_str();
    !SKIPPED_HEADERS.contains(&name) && !name.starts_with("x-cache")
}

/// A response as persisted in a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// Base64 encoded body.
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CachedResponse {
    pub fn from_response(response: &Response, ttl_seconds: u64) -> Self {
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| is_stored(name))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let created_at = Utc::now();
        // Bounded so the expiry stays representable.
        let ttl = ttl_seconds.min(u64::from(u32::MAX)) as i64;
        Self {
            status: response.status().as_u16(),
            headers,
            body: STANDARD.encode(response.body()),
            created_at,
            expires_at: created_at + ChronoDuration::seconds(ttl),
        }
    }

    pub fn encode(&self) -> CacheResult<String> {
        serde_json::to_string(self).map_err(|e| CacheError::OperationError(e.to_string()))
    }

    pub fn decode(raw: &str) -> CacheResult<Self> {
        serde_json::from_str(raw).map_err(|e| CacheError::CorruptEntry(e.to_string()))
    }

    /// Rebuilds the response. Fails on an invalid status, header or body.
    pub fn into_response(self) -> CacheResult<Response> {
        let status =
            StatusCode::from_u16(self.status).map_err(|e| CacheError::CorruptEntry(e.to_string()))?;
        let body = STANDARD
            .decode(self.body.as_bytes())
            .map_err(|e| CacheError::CorruptEntry(e.to_string()))?;

        let mut response = http::Response::new(Bytes::from(body));
        *response.status_mut() = status;
        let headers = response.headers_mut();
        for (name, value) in self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| CacheError::CorruptEntry(e.to_string()))?;
            let value =
                HeaderValue::from_str(&value).map_err(|e| CacheError::CorruptEntry(e.to_string()))?;
            headers.append(name, value);
        }
        Ok(response)
    }
}
