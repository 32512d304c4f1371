use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, patch, post};
use axum::Router;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::GovernorLayer;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use donorhub::audit::AuditRecorder;
use donorhub::config::Config;
use donorhub::{auth, db, routes, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if it exists
    dotenvy::dotenv().ok();

    // Initialize Tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "donorhub=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting DonorHub application...");

    let config = Config::from_env()?;
    let cors = build_cors(&config)?;
    let port = config.port;

    // Database Setup
    tracing::info!("Initializing database connection pool...");
    let db_pool = db::init_pool(&config.database_url).await?;
    tracing::info!("Database connection pool initialized successfully");

    // History writes go through a background task so a failed audit insert
    // never fails the request that triggered it.
    let (audit, _audit_task) = AuditRecorder::spawn(db_pool.clone());

    let state = AppState {
        db: db_pool,
        config: Arc::new(config.clone()),
        audit,
    };

    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(config.rate_limit_per_second)
            .burst_size(config.rate_limit_burst)
            .finish()
            .expect("governor config"),
    );

    // Router Setup
    let app = Router::new()
        .route("/health", get(health_check))
        // Donor Routes
        .route(
            "/api/donor",
            get(routes::donors::list_donors).post(routes::donors::create_donor),
        )
        .route("/api/donor/cities", get(routes::donors::list_cities))
        .route(
            "/api/donor/import/csv",
            post(routes::donors::import_csv).layer(DefaultBodyLimit::max(10 * 1024 * 1024)),
        )
        .route(
            "/api/donor/{id}",
            get(routes::donors::get_donor)
                .put(routes::donors::update_donor)
                .delete(routes::donors::delete_donor),
        )
        // Event Routes
        .route(
            "/api/event",
            get(routes::events::list_events).post(routes::events::create_event),
        )
        .route(
            "/api/event/{id}",
            get(routes::events::get_event)
                .put(routes::events::update_event)
                .delete(routes::events::delete_event),
        )
        .route(
            "/api/event/{id}/info",
            patch(routes::events::update_event_info),
        )
        .route(
            "/api/event/{id}/donor-status",
            patch(routes::events::update_donor_status),
        )
        .route(
            "/api/event/{id}/edit-donors",
            patch(routes::events::edit_donors),
        )
        .route(
            "/api/event/{id}/collaborators",
            get(routes::events::get_collaborators).post(routes::events::set_collaborators),
        )
        .route("/api/event/{id}/history", get(routes::events::get_history))
        // Tag Routes
        .route(
            "/api/tag",
            get(routes::tags::list_tags).post(routes::tags::create_tag),
        )
        .route(
            "/api/tag/{id}",
            patch(routes::tags::update_tag).delete(routes::tags::delete_tag),
        )
        // User Routes
        .route("/api/user/all", get(routes::users::list_users))
        .route("/api/user/search", get(routes::users::search_users))
        // Auth Routes
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .layer(cors)
        .layer(GovernorLayer::new(governor_config))
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        ))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

// CORS configuration (no permissive mode)
fn build_cors(config: &Config) -> anyhow::Result<CorsLayer> {
    let origins = config
        .allowed_origins
        .as_deref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|s| {
                    let trimmed = s.trim();
                    if trimmed.is_empty() {
                        return None;
                    }
                    match trimmed.parse::<HeaderValue>() {
                        Ok(value) => Some(value),
                        Err(_) => {
                            tracing::warn!("Ignoring invalid ALLOWED_ORIGINS entry: {}", trimmed);
                            None
                        }
                    }
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let origins = if origins.is_empty() {
        if config.is_production() {
            anyhow::bail!("ALLOWED_ORIGINS must contain at least one valid origin in production");
        }
        vec![
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
        ]
    } else {
        origins
    };

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .allow_credentials(true))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
}

async fn health_check() -> &'static str {
    "OK"
}
