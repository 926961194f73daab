//! Per-request state carried through every pipeline phase.

use crate::auth::AuthenticatedUser;
use crate::pipeline::types::{Request, header_str};
use chrono::{DateTime, Utc};
use http::{Extensions, HeaderMap, Method};
use std::net::{IpAddr, SocketAddr};
use tokio::time::{Duration, Instant};

/// Rate-limit bookkeeping written by the rate limiter for the response phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub limit: u64,
    pub remaining: u64,
}

/// Mutable state shared by all middlewares of a single request.
///
/// The request line and headers are a snapshot taken when the request
/// entered the pipeline, so backward-phase middlewares can inspect them.
#[derive(Debug)]
pub struct RequestContext {
    pub request_id: String,
    pub started_at: Instant,
    pub received_at: DateTime<Utc>,
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub client_addr: Option<SocketAddr>,

    pub user: Option<AuthenticatedUser>,
    pub token: Option<String>,
    pub cache_key: Option<String>,
    pub rate_limit: Option<RateLimitInfo>,

    /// Names of the middlewares whose forward phase completed, in order.
    pub trace: Vec<String>,
    pub extensions: Extensions,
}

impl RequestContext {
    pub fn new(request: &Request, client_addr: Option<SocketAddr>) -> Self {
        let mut request_id = uuid::Uuid::new_v4().simple().to_string();
        request_id.truncate(8);

        Self {
            request_id,
            started_at: Instant::now(),
            received_at: Utc::now(),
            method: request.method().clone(),
            path: request.uri().path().to_string(),
            query: request.uri().query().map(str::to_string),
            headers: request.headers().clone(),
            client_addr,
            user: None,
            token: None,
            cache_key: None,
            rate_limit: None,
            trace: Vec::new(),
            extensions: Extensions::new(),
        }
    }

    /// Time spent in the pipeline so far.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// IP of the directly connected peer.
    pub fn peer_ip(&self) -> Option<IpAddr> {
        self.client_addr.map(|addr| addr.ip())
    }

    /// Client IP, preferring `X-Forwarded-For` (first hop), then `X-Real-IP`, then the peer.
    pub fn client_ip(&self) -> Option<String> {
        if let Some(forwarded) = header_str(&self.headers, "x-forwarded-for") {
            if let Some(first) = forwarded.split(',').next().map(str::trim) {
                if !first.is_empty() {
                    return Some(first.to_string());
                }
            }
        }

        if let Some(real_ip) = header_str(&self.headers, "x-real-ip") {
            let real_ip = real_ip.trim();
            if !real_ip.is_empty() {
                return Some(real_ip.to_string());
            }
        }

        self.peer_ip().map(|ip| ip.to_string())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_str(&self.headers, name)
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }

    /// Decoded query parameters in request order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.query
            .as_deref()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn query_param(&self, name: &str) -> Option<String> {
        self.query_pairs()
            .into_iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }
}
