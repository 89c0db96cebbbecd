use crate::config::StatementConfig;
use crate::extraction::{OcrEngine, StatementPipeline, TesseractOcr};
use crate::extraction::ocr::TesseractConfig;
use crate::handlers;
use crate::middleware;
use crate::services::{Database, JwtService, LocalStorage, Storage};
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::{make_request_span, request_id_middleware},
};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct AppState {
    pub config: StatementConfig,
    pub db: Database,
    pub jwt: JwtService,
    pub storage: Arc<dyn Storage>,
    pub pipeline: StatementPipeline,
    pub login_rate_limiter: IpRateLimiter,
    pub register_rate_limiter: IpRateLimiter,
}

impl AppState {
    /// Assemble state from an already-connected database.
    pub async fn new(config: StatementConfig, db: Database) -> Result<Self, AppError> {
        let jwt = JwtService::new(&config.jwt.secret, config.jwt.access_token_expiry_minutes)
            .map_err(AppError::ConfigError)?;

        let storage: Arc<dyn Storage> = Arc::new(
            LocalStorage::new(&config.storage.upload_folder)
                .await
                .map_err(|e| {
                    tracing::error!(
                        "Failed to initialize upload folder at {}: {}",
                        config.storage.upload_folder.display(),
                        e
                    );
                    e
                })?,
        );

        let ocr: Arc<dyn OcrEngine> = Arc::new(TesseractOcr::new(TesseractConfig {
            tesseract_cmd: config.ocr.tesseract_cmd.clone(),
            pdftoppm_cmd: config.ocr.pdftoppm_cmd.clone(),
            dpi: config.ocr.dpi,
            timeout: Duration::from_secs(config.ocr.timeout_seconds),
            max_concurrent: config.ocr.max_concurrent,
            ..TesseractConfig::default()
        }));

        let rl = &config.rate_limit;
        Ok(Self {
            login_rate_limiter: create_ip_rate_limiter(rl.login_attempts, rl.login_window_seconds),
            register_rate_limiter: create_ip_rate_limiter(
                rl.register_attempts,
                rl.register_window_seconds,
            ),
            pipeline: StatementPipeline::new(db.clone(), ocr),
            config,
            db,
            jwt,
            storage,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let login_route = Router::new()
        .route("/login", post(handlers::login))
        .layer(from_fn_with_state(
            state.login_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let register_route = Router::new()
        .route("/register", post(handlers::register))
        .layer(from_fn_with_state(
            state.register_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let protected_routes = Router::new()
        .route("/protected", get(handlers::protected))
        .route("/ocr/process", post(handlers::process_statement))
        .route("/upload", post(handlers::process_statement))
        .route("/statements", get(handlers::list_statements))
        .route(
            "/statements/:id",
            get(handlers::get_statement).delete(handlers::delete_statement),
        )
        .route(
            "/statements/:id/transactions",
            get(handlers::list_statement_transactions),
        )
        .route("/statements/:id/logs", get(handlers::list_statement_logs))
        .route(
            "/statements/:id/balance-check",
            get(handlers::statement_balance_check),
        )
        .route(
            "/statements/:id/export/:format",
            get(handlers::export_statement),
        )
        .route("/export/:format", post(handlers::export_data))
        .route("/cleanup", post(handlers::cleanup_uploads))
        .route("/banks", get(handlers::list_banks))
        .route("/categories", get(handlers::list_categories))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let cors = CorsLayer::new()
        .allow_origin(
            state
                .config
                .security
                .allowed_origins
                .iter()
                .filter_map(|o| match o.parse::<HeaderValue>() {
                    Ok(v) => Some(v),
                    Err(e) => {
                        tracing::error!("Ignoring invalid CORS origin '{}': {}", o, e);
                        None
                    }
                })
                .collect::<Vec<HeaderValue>>(),
        )
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        .merge(login_route)
        .merge(register_route)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(state.config.storage.max_upload_bytes))
        .with_state(state)
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors)
}

pub struct Application {
    port: u16,
    server: Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + Unpin>,
    state: AppState,
}

impl Application {
    pub async fn build(config: StatementConfig) -> Result<Self, AppError> {
        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to PostgreSQL: {}", e);
            e
        })?;

        if config.database.run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!("Failed to run database migrations: {}", e);
                e
            })?;
        }

        Self::build_with_db(config, db).await
    }

    pub async fn build_with_db(config: StatementConfig, db: Database) -> Result<Self, AppError> {
        let state = AppState::new(config.clone(), db).await?;
        let app = build_router(state.clone());

        let addr: SocketAddr = config.common.bind_address().parse().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!(
                "Invalid bind address {}: {}",
                config.common.bind_address(),
                e
            ))
        })?;
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Listening on {}", port);

        let server = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal());

        Ok(Self {
            port,
            server: Box::new(server.into_future()),
            state,
        })
    }

    pub fn db(&self) -> &Database {
        &self.state.db
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
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
