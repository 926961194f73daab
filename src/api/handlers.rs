//! Endpoint implementations for [`DemoApi`](super::DemoApi).

use super::DemoApi;
use super::dto::{
    CheckStatus, HealthChecks, HealthResponse, LoginRequest, LoginResponse, NewProduct, Product,
    ProductList, RefreshRequest,
};
use crate::auth::{AuthStrategy, Credentials};
use crate::error::AppError;
use crate::pipeline::{Request, RequestContext, Response, empty_response, json_response};
use http::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::atomic::Ordering;

fn json_body<T: DeserializeOwned>(request: &Request) -> Result<T, AppError> {
    serde_json::from_slice(request.body())
        .map_err(|e| AppError::validation(format!("Invalid JSON body: {}", e), None))
}

/// `GET /health`
///
/// Returns 503 when the cache backend fails its health check.
pub async fn health(api: &DemoApi) -> Response {
    let backend_health = match &api.cache {
        Some(backend) => Some((backend.name(), backend.health_check().await)),
        None => None,
    };
    let cache = match backend_health {
        Some((name, true)) => CheckStatus {
            status: "ok".to_string(),
            message: Some(format!("{} backend", name)),
        },
        Some((name, false)) => CheckStatus {
            status: "error".to_string(),
            message: Some(format!("{} backend unreachable", name)),
        },
        None => CheckStatus {
            status: "ok".to_string(),
            message: Some("in-process".to_string()),
        },
    };

    let healthy = cache.status == "ok";
    let body = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks { cache },
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    json_response(status, &body)
}

/// `POST /auth/login`
pub async fn login(api: &DemoApi, request: &Request) -> Result<Response, AppError> {
    let body: LoginRequest = json_body(request)?;
    let credentials = Credentials::Password {
        username: body.username,
        password: body.password,
    };

    let user = api
        .jwt
        .authenticate(&credentials)
        .await?
        .ok_or_else(|| AppError::unauthorized("Invalid username or password"))?;

    let access = api.jwt.create_token(&user.id).await?;
    let refresh_token = api.jwt.create_refresh_token(&user.id)?;
    tracing::info!(user_id = %user.id, "User logged in");

    Ok(json_response(
        StatusCode::OK,
        &LoginResponse {
            access_token: access.access_token,
            refresh_token,
            token_type: access.token_type,
            expires_in: access.expires_in,
        },
    ))
}

/// `POST /auth/refresh`
pub async fn refresh(api: &DemoApi, request: &Request) -> Result<Response, AppError> {
    let body: RefreshRequest = json_body(request)?;
    let token = api
        .jwt
        .refresh_token(&body.refresh_token)
        .await?
        .ok_or_else(|| AppError::unauthorized("Invalid or expired refresh token"))?;
    Ok(json_response(StatusCode::OK, &token))
}

/// `GET /api/products[?q=<substring>]`
pub fn list_products(api: &DemoApi, ctx: &RequestContext) -> Response {
    let filter = ctx.query_param("q").map(|q| q.to_lowercase());
    let mut items: Vec<Product> = api
        .products
        .iter()
        .map(|entry| entry.value().clone())
        .filter(|p| {
            filter
                .as_deref()
                .is_none_or(|q| p.name.to_lowercase().contains(q))
        })
        .collect();
    items.sort_by_key(|p| p.id);

    json_response(
        StatusCode::OK,
        &ProductList {
            total: items.len(),
            items,
        },
    )
}

/// `GET /api/products/{id}`
pub fn get_product(api: &DemoApi, id: u64) -> Result<Response, AppError> {
    let product = api
        .products
        .get(&id)
        .map(|p| p.value().clone())
        .ok_or_else(|| AppError::not_found(format!("Product {} not found", id), Some("product")))?;
    Ok(json_response(StatusCode::OK, &product))
}

/// `POST /api/products`
pub fn create_product(api: &DemoApi, request: &Request) -> Result<Response, AppError> {
    let body: NewProduct = json_body(request)?;
    let name = body
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| AppError::validation("Product name is required", Some("name")))?;
    let price = body
        .price
        .ok_or_else(|| AppError::validation("Product price is required", Some("price")))?;
    if price.is_nan() || price < 0.0 {
        return Err(AppError::business(
            "INVALID_PRICE",
            "Price must not be negative",
        ));
    }

    let id = api.next_id.fetch_add(1, Ordering::Relaxed);
    let product = Product { id, name, price };
    api.products.insert(id, product.clone());
    Ok(json_response(StatusCode::CREATED, &product))
}

/// `DELETE /api/products/{id}`
pub fn delete_product(api: &DemoApi, id: u64) -> Result<Response, AppError> {
    api.products
        .remove(&id)
        .ok_or_else(|| AppError::not_found(format!("Product {} not found", id), Some("product")))?;
    Ok(empty_response(StatusCode::NO_CONTENT))
}

/// `GET /api/me`
pub fn me(ctx: &RequestContext) -> Result<Response, AppError> {
    let user = ctx
        .user
        .as_ref()
        .ok_or_else(|| AppError::unauthorized("Authentication required"))?;
    Ok(json_response(StatusCode::OK, user))
}

/// `GET /api/admin/stats`
pub fn admin_stats(api: &DemoApi, ctx: &RequestContext) -> Response {
    json_response(
        StatusCode::OK,
        &json!({
            "products": api.products.len(),
            "requested_by": ctx.user_id(),
        }),
    )
}
