//! Stagesync binary entrypoint wiring the sync engine, its backend, and the HTTP/SSE layer.

use std::{env, fs, net::SocketAddr, path::Path, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stagesync::{
    config::{AppConfig, BackendConfig},
    dao::{
        credentials::{CredentialProvider, StaticCredentials},
        feed::LocalChangeFeed,
        memory::{MemoryFixture, MemoryRepository},
        repository::EventRepository,
    },
    routes,
    services::supervisor,
    state::{AppState, SharedState},
};

/// Environment variable holding the bearer token used for backend requests.
const ACCESS_TOKEN_ENV: &str = "STAGESYNC_ACCESS_TOKEN";
/// Token used by the in-memory backend when none is configured.
const LOCAL_TOKEN: &str = "local";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let token = env::var(ACCESS_TOKEN_ENV).ok().or_else(|| {
        matches!(config.backend, BackendConfig::Memory { .. }).then(|| LOCAL_TOKEN.to_string())
    });
    let credentials: Arc<dyn CredentialProvider> = Arc::new(StaticCredentials::new(token));
    let feed = Arc::new(LocalChangeFeed::new(config.feed_capacity));
    let repository = build_repository(&config.backend, feed.clone(), credentials.clone())?;

    let app_state = AppState::new(config.clone(), repository, feed, credentials);
    let follower = match config.event_slug.clone() {
        Some(slug) => Some(tokio::spawn(supervisor::run(app_state.clone(), slug))),
        None => {
            warn!("no event_slug configured; serving an empty view");
            None
        }
    };

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state.clone());

    let port = env::var("PORT")
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

    if let Some(follower) = follower {
        follower.abort();
    }
    let flushed = app_state.shutdown().await;
    info!(flushed, "server stopped");

    Ok(())
}

/// Select the backend named in the configuration.
#[cfg_attr(not(feature = "rest-store"), allow(unused_variables))]
fn build_repository(
    backend: &BackendConfig,
    feed: Arc<LocalChangeFeed>,
    credentials: Arc<dyn CredentialProvider>,
) -> anyhow::Result<Arc<dyn EventRepository>> {
    match backend {
        BackendConfig::Memory { fixture } => {
            let fixture = match fixture {
                Some(path) => load_fixture(path)?,
                None => MemoryFixture::default(),
            };
            info!(events = fixture.events.len(), "using in-memory backend");
            Ok(Arc::new(MemoryRepository::new(fixture).with_feed(feed)))
        }
        #[cfg(feature = "rest-store")]
        BackendConfig::Rest => {
            use stagesync::dao::rest::{RestConfig, RestEventStore};

            let config = RestConfig::from_env().context("reading REST backend configuration")?;
            info!(base_url = %config.base_url, "using REST backend");
            let store =
                RestEventStore::connect(config, credentials).context("building REST client")?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "rest-store"))]
        BackendConfig::Rest => {
            anyhow::bail!("REST backend requested but the `rest-store` feature is disabled")
        }
    }
}

fn load_fixture(path: &Path) -> anyhow::Result<MemoryFixture> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading fixture {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing fixture {}", path.display()))
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

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
