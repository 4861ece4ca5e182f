//! Classroom live backend binary entrypoint wiring REST, WebSocket, SSE and storage layers.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use futures::future::BoxFuture;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use classroom_live_back::{
    config::{AppConfig, StoreBackend},
    dao::{
        session_store::{MemorySessionStore, SessionStore},
        storage::StorageError,
    },
    routes,
    services::storage_supervisor,
    state::{AppState, SharedState},
};

type ConnectFuture = BoxFuture<'static, Result<Arc<dyn SessionStore>, StorageError>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let backend = StoreBackend::from_env();
    let app_state = AppState::new(config);

    info!(backend = ?backend, "starting storage supervisor");
    tokio::spawn(storage_supervisor::run(app_state.clone(), connector(backend)));
    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Build the closure the supervisor calls on every (re)connection attempt.
fn connector(backend: StoreBackend) -> impl FnMut() -> ConnectFuture + Send + 'static {
    // A single memory store survives supervisor reconnects.
    let memory = MemorySessionStore::new();
    move || -> ConnectFuture {
        match backend {
            StoreBackend::Memory => {
                let store = memory.clone();
                Box::pin(async move { Ok(Arc::new(store) as Arc<dyn SessionStore>) })
            }
            StoreBackend::Mongo => Box::pin(connect_mongo()),
            StoreBackend::Couch => Box::pin(connect_couch()),
        }
    }
}

#[cfg(feature = "mongo-store")]
async fn connect_mongo() -> Result<Arc<dyn SessionStore>, StorageError> {
    use classroom_live_back::dao::session_store::mongodb::{MongoConfig, MongoSessionStore};

    let uri = env::var("MONGO_URI").unwrap_or_else(|_| "mongodb://localhost:27017".into());
    let db_name = env::var("MONGO_DB").ok();
    let config = MongoConfig::from_uri(&uri, db_name.as_deref()).await?;
    let store = MongoSessionStore::connect(config).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "mongo-store"))]
async fn connect_mongo() -> Result<Arc<dyn SessionStore>, StorageError> {
    Err(StorageError::unavailable(
        "mongo backend not compiled in".to_string(),
        std::io::Error::other("enable the `mongo-store` feature"),
    ))
}

#[cfg(feature = "couch-store")]
async fn connect_couch() -> Result<Arc<dyn SessionStore>, StorageError> {
    use classroom_live_back::dao::session_store::couchdb::{CouchConfig, CouchSessionStore};

    let config = CouchConfig::from_env()?;
    let store = CouchSessionStore::connect(config).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "couch-store"))]
async fn connect_couch() -> Result<Arc<dyn SessionStore>, StorageError> {
    Err(StorageError::unavailable(
        "couch backend not compiled in".to_string(),
        std::io::Error::other("enable the `couch-store` feature"),
    ))
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
