//! HTTP server initialization and runtime setup.
//!
//! Every request enters through a single axum fallback that buffers the body
//! and hands it to the [`PipelineExecutor`]. Routing to business endpoints is
//! the [`Handler`]'s concern, so the axum router carries only transport
//! layers (path normalization, tracing).

use crate::api::DemoApi;
use crate::auth::middleware::{STRATEGIES_SERVICE, USERS_SERVICE};
use crate::auth::{
    ApiKeyStrategy, AuthStrategy, InMemoryUserRepository, JwtSettings, JwtStrategy, StrategySet,
    UserRecord, UserRepository,
};
use crate::cache::middleware::BACKEND_SERVICE;
use crate::cache::{CacheBackend, NullCache, RedisCache};
use crate::config::Config;
use crate::error::AppError;
use crate::pipeline::{Handler, PipelineExecutor, PipelineOutcome, ServiceContainer};
use crate::setup::{default_dispatcher, default_registry};

use anyhow::Result;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::response::{IntoResponse, Response};
use axum::{Router, ServiceExt};
use http::StatusCode;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::Layer;
use tower_http::LatencyUnit;
use tower_http::normalize_path::{NormalizePath, NormalizePathLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Request bodies above this size are rejected before the pipeline runs.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Shared state injected into the pipeline entry point.
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<PipelineExecutor>,
    pub handler: Arc<dyn Handler>,
}

impl AppState {
    pub fn new(executor: Arc<PipelineExecutor>, handler: Arc<dyn Handler>) -> Self {
        Self { executor, handler }
    }
}

/// Router without path normalization, as used by the integration tests.
pub fn router(state: AppState) -> Router {
    Router::new().fallback(pipeline_entry).with_state(state).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(
                DefaultOnResponse::new()
                    .level(Level::INFO)
                    .latency_unit(LatencyUnit::Millis),
            ),
    )
}

/// The served application: [`router`] with trailing slashes trimmed.
pub fn app(state: AppState) -> NormalizePath<Router> {
    NormalizePathLayer::trim_trailing_slash().layer(router(state))
}

async fn pipeline_entry(State(state): State<AppState>, request: axum::extract::Request) -> Response {
    let client_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return AppError::http(StatusCode::BAD_REQUEST, format!("Unreadable request body: {}", e))
                .into_response();
        }
    };
    let request = http::Request::from_parts(parts, bytes);

    // Dropping this future (client disconnect) cancels the spawned run.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let executor = state.executor.clone();
    let handler = state.handler.clone();
    let run = tokio::spawn(async move {
        executor
            .execute(request, client_addr, handler.as_ref(), &cancel)
            .await
    });

    match run.await {
        Ok(PipelineOutcome::Completed(response)) => response.map(Body::from),
        Ok(PipelineOutcome::Cancelled) => {
            AppError::http(StatusCode::SERVICE_UNAVAILABLE, "Request cancelled").into_response()
        }
        Err(e) => {
            tracing::error!("Pipeline task failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn demo_users(config: &Config) -> InMemoryUserRepository {
    InMemoryUserRepository::new(&config.api_key_signing_secret)
        .with_user(
            UserRecord::new("1", "admin")
                .with_roles(&["admin"])
                .with_email("admin@example.com"),
            "admin",
        )
        .with_user(
            UserRecord::new("2", "alice")
                .with_roles(&["user"])
                .with_email("alice@example.com"),
            "wonderland",
        )
        .with_user(UserRecord::new("3", "guest").with_roles(&["guest"]), "guest")
}

async fn external_cache(config: &Config) -> Arc<dyn CacheBackend> {
    let Some(redis_url) = &config.redis_url else {
        tracing::warn!("CACHE_BACKEND=external without REDIS_URL. Using NullCache.");
        return Arc::new(NullCache::new());
    };

    match RedisCache::connect(redis_url).await {
        Ok(redis) => {
            tracing::info!("Cache enabled (Redis)");
            Arc::new(redis)
        }
        Err(e) => {
            tracing::warn!("Failed to connect to Redis: {}. Using NullCache.", e);
            Arc::new(NullCache::new())
        }
    }
}

/// Shared services consumed by middleware constructors.
///
/// Returns the container and the JWT strategy, which the demo API also uses
/// to issue tokens on login.
///
/// # Errors
///
/// Returns an error if the JWT settings are invalid.
pub async fn build_services(config: &Config) -> Result<(Arc<ServiceContainer>, Arc<JwtStrategy>)> {
    let services = Arc::new(ServiceContainer::new());

    let users: Arc<dyn UserRepository> = Arc::new(demo_users(config));
    services.register_service(USERS_SERVICE, users.clone());

    let jwt = Arc::new(JwtStrategy::new(
        &JwtSettings {
            secret_key: config.jwt_secret.clone(),
            algorithm: config.jwt_algorithm.clone(),
            expire_minutes: config.jwt_expire_minutes,
        },
        users.clone(),
    )?);
    let api_keys: Arc<dyn AuthStrategy> = Arc::new(ApiKeyStrategy::new(
        &config.api_key_signing_secret,
        users,
    ));
    let strategies = StrategySet::new().with(jwt.clone()).with(api_keys);
    services.register_service(STRATEGIES_SERVICE, Arc::new(strategies));

    if config.uses_external_cache() {
        services.register_service(BACKEND_SERVICE, external_cache(config).await);
    }

    Ok((services, jwt))
}

/// Builds the executor and demo handler for `config`.
///
/// # Errors
///
/// Returns an error if a service or the registry cannot be set up.
pub async fn build_state(config: &Config) -> Result<AppState> {
    let (services, jwt) = build_services(config).await?;

    let mut api = DemoApi::new(jwt);
    if let Some(backend) = services.get_service::<Arc<dyn CacheBackend>>(BACKEND_SERVICE) {
        api = api.with_cache(backend);
    }

    let registry = default_registry(config, services)?;
    tracing::info!(
        middlewares = %registry.list_registered().join(", "),
        "Pipeline assembled"
    );
    let executor = PipelineExecutor::new(Arc::new(registry), Arc::new(default_dispatcher(config)));

    Ok(AppState::new(Arc::new(executor), Arc::new(api)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Runs the HTTP server with the given configuration.
///
/// # Errors
///
/// Returns an error if:
/// - JWT settings are invalid
/// - Server bind fails
/// - Server runtime error occurs
pub async fn run(config: Config) -> Result<()> {
    let state = build_state(&config).await?;
    let app = app(state);

    let addr: SocketAddr = config.listen_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{addr}");

    axum::serve(
        listener,
        ServiceExt::<axum::extract::Request>::into_make_service_with_connect_info::<SocketAddr>(app),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}
