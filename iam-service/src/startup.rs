//! Application startup and lifecycle management.

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::{IamConfig, StoreBackend};
use crate::handlers;
use crate::middleware::admin_auth_middleware;
use crate::services::{IamService, SessionService, SystemClock, UuidGenerator};
use crate::store::{EntityStore, MemoryStore, MongoStore};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: IamConfig,
    pub service: IamService,
    pub sessions: SessionService,
    pub store: Arc<dyn EntityStore>,
}

/// Opens the configured entity store.
pub async fn connect_store(config: &IamConfig) -> Result<Arc<dyn EntityStore>, AppError> {
    match config.store.backend {
        StoreBackend::Mongo => {
            let store = MongoStore::connect(&config.mongodb, config.store.operation_timeout())
                .await
                .map_err(|e| {
                    tracing::error!("Failed to connect to MongoDB: {}", e);
                    AppError::DatabaseError(anyhow::anyhow!(e))
                })?;
            store.initialize_indexes().await.map_err(|e| {
                tracing::error!("Failed to initialize database indexes: {}", e);
                AppError::DatabaseError(anyhow::anyhow!(e))
            })?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory entity store; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        .route(
            "/user",
            post(handlers::users::create_user).get(handlers::users::list_users),
        )
        .route(
            "/user/:id",
            get(handlers::users::get_user).delete(handlers::users::delete_user),
        )
        .route("/user/:id/owned", get(handlers::users::list_owned))
        .route("/user/:id/policies", get(handlers::users::list_policies))
        .route("/user/:id/challenges", get(handlers::users::list_challenges))
        .route("/user/:id/access", get(handlers::users::list_access))
        .route(
            "/user/:id/session",
            post(handlers::sessions::start_session).route_layer(from_fn_with_state(
                state.clone(),
                admin_auth_middleware,
            )),
        )
        .route("/logout", post(handlers::sessions::logout))
        .route("/inspect", post(handlers::sessions::inspect))
        .route(
            "/group",
            post(handlers::groups::create_group).get(handlers::groups::list_groups),
        )
        .route(
            "/group/:id",
            get(handlers::groups::get_group).delete(handlers::groups::delete_group),
        )
        .route(
            "/group/:id/members",
            post(handlers::groups::add_members).delete(handlers::groups::remove_members),
        )
        .route(
            "/resource",
            post(handlers::resources::create_resource).get(handlers::resources::list_resources),
        )
        .route(
            "/resource/:id",
            get(handlers::resources::get_resource).delete(handlers::resources::delete_resource),
        )
        .route(
            "/policy",
            post(handlers::policies::create_policy).get(handlers::policies::list_policies),
        )
        .route(
            "/policy/:id",
            get(handlers::policies::get_policy).delete(handlers::policies::delete_policy),
        )
        .route(
            "/challenge",
            post(handlers::challenges::create_challenge).get(handlers::challenges::list_challenges),
        )
        .layer(from_fn(metrics_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: IamConfig) -> Result<Self, AppError> {
        let store = connect_store(&config).await?;
        Self::build_with_store(config, store).await
    }

    pub async fn build_with_store(
        config: IamConfig,
        store: Arc<dyn EntityStore>,
    ) -> Result<Self, AppError> {
        let ids = Arc::new(UuidGenerator);
        let service = IamService::new(store.clone(), Arc::new(SystemClock), ids.clone());
        let sessions = SessionService::new(
            service.repository().clone(),
            ids,
            &config.session,
        );

        let state = AppState {
            config: config.clone(),
            service,
            sessions,
            store,
        };

        // Port 0 picks a random port (tests)
        let http_addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", http_addr, e);
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!("IAM service: HTTP on port {}", http_port);

        Ok(Self {
            http_port,
            http_listener,
            state,
        })
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Serve until a shutdown signal arrives.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let app = router(self.state);
        axum::serve(self.http_listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| {
                tracing::error!("HTTP server error: {}", e);
                std::io::Error::other(format!("HTTP server error: {}", e))
            })
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
