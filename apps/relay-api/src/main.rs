use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::http::HeaderValue;
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_api::config::Config;
use relay_api::db::store::{MemoryMessageStore, MessageStore, PgMessageStore};
use relay_api::identity::{HttpDirectory, IdentityDirectory, NoDirectory};
use relay_api::AppState;
use relay_common::SnowflakeGenerator;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing, env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(%err, "invalid configuration");
            std::process::exit(1);
        }
    };
    let port = config.port;

    let store: Arc<dyn MessageStore> = match &config.database_url {
        Some(url) => {
            let db = relay_api::db::pool::connect(url).expect("failed to build connection pool");
            let ids = Arc::new(SnowflakeGenerator::new(config.worker_id));
            Arc::new(PgMessageStore::new(db, ids))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, messages are kept in memory only");
            Arc::new(MemoryMessageStore::new())
        }
    };

    let directory: Arc<dyn IdentityDirectory> = match &config.directory_url {
        Some(url) => match HttpDirectory::new(url) {
            Ok(directory) => Arc::new(directory),
            Err(err) => {
                tracing::error!(%err, "invalid DIRECTORY_URL");
                std::process::exit(1);
            }
        },
        None => {
            tracing::warn!("DIRECTORY_URL not set, every sender resolves to the fallback name");
            Arc::new(NoDirectory)
        }
    };

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid allowed origin");
                None
            }
        })
        .collect();

    tracing::info!(
        origins = ?config.allowed_origins,
        identity_timeout = ?config.identity_timeout,
        "relay-api configured"
    );

    let state = AppState::new(config, store, directory);

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(relay_api::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "relay-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(?err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
