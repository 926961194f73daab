//! Demo business endpoints served behind the pipeline.
//!
//! | method   | path                  | notes                                   |
//! |----------|-----------------------|-----------------------------------------|
//! | `GET`    | `/health`             | public                                  |
//! | `POST`   | `/auth/login`         | public, username/password → JWT pair   |
//! | `POST`   | `/auth/refresh`       | public, refresh token → access token    |
//! | `GET`    | `/api/products`       | optional auth, cached                   |
//! | `GET`    | `/api/products/{id}`  | optional auth, cached                   |
//! | `POST`   | `/api/products`       | `write` permission                      |
//! | `DELETE` | `/api/products/{id}`  | `delete` permission                     |
//! | `GET`    | `/api/me`             | authenticated                           |
//! | `GET`    | `/api/admin/stats`    | `admin` role                            |

pub mod dto;
pub mod handlers;

use crate::auth::JwtStrategy;
use crate::cache::CacheBackend;
use crate::error::AppError;
use crate::pipeline::{Handler, Request, RequestContext, Response};
use async_trait::async_trait;
use dashmap::DashMap;
use dto::Product;
use http::Method;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

pub struct DemoApi {
    pub(crate) jwt: Arc<JwtStrategy>,
    pub(crate) cache: Option<Arc<dyn CacheBackend>>,
    pub(crate) products: DashMap<u64, Product>,
    pub(crate) next_id: AtomicU64,
}

impl DemoApi {
    pub fn new(jwt: Arc<JwtStrategy>) -> Self {
        let products = DashMap::new();
        for (id, name, price) in [(1, "Keyboard", 49.0), (2, "Mouse", 19.5), (3, "Monitor", 189.0)] {
            products.insert(
                id,
                Product {
                    id,
                    name: name.to_string(),
                    price,
                },
            );
        }
        Self {
            jwt,
            cache: None,
            products,
            next_id: AtomicU64::new(4),
        }
    }

    /// Reported by `/health`.
    pub fn with_cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.cache = Some(cache);
        self
    }
}

fn product_id(path: &str) -> Option<Result<u64, AppError>> {
    let raw = path.strip_prefix("/api/products/")?;
    Some(
        raw.parse()
            .map_err(|_| AppError::validation(format!("Invalid product id: {}", raw), Some("id"))),
    )
}

#[async_trait]
impl Handler for DemoApi {
    async fn call(&self, ctx: &mut RequestContext, request: Request) -> Result<Response, AppError> {
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        match (method, path.as_str()) {
            (Method::GET, "/health") => Ok(handlers::health(self).await),
            (Method::POST, "/auth/login") => handlers::login(self, &request).await,
            (Method::POST, "/auth/refresh") => handlers::refresh(self, &request).await,
            (Method::GET, "/api/products") => Ok(handlers::list_products(self, ctx)),
            (Method::POST, "/api/products") => handlers::create_product(self, &request),
            (Method::GET, "/api/me") => handlers::me(ctx),
            (Method::GET, "/api/admin/stats") => Ok(handlers::admin_stats(self, ctx)),
            (method, path) => match (method, product_id(path)) {
                (Method::GET, Some(id)) => handlers::get_product(self, id?),
                (Method::DELETE, Some(id)) => handlers::delete_product(self, id?),
                _ => Err(AppError::not_found(format!("No route for {}", path), None)),
            },
        }
    }
}
