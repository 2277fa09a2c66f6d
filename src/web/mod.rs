//! Web layer
//!
//! Thin axum handlers over the upstream and tuner services. Routes:
//!
//! - `/channel/{number}` multiplexed MPEG-TS stream from the tuner pool
//! - `/channel/{number}/playlist.m3u8` rewritten HLS playlist
//! - `/channel/{number}/{segment}.ts` pass-through segment
//! - `/channel/{number}/key/{encoded}` proxied encryption key
//! - HDHomeRun discovery (`/discover.json`, `/lineup.json`, ...), `/iptv.m3u`
//!   and `/xmltv.xml` built from the channel registry

use anyhow::Result;
use axum::{Router, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    config::Config,
    errors::{AppError, AppResult},
    models::{Channel, ChannelRegistry},
    services::{ProcessFactory, TranscodeProcessFactory, TunerPool},
    upstream::{HttpOriginClient, KeyFetcher, OriginClient, SegmentFetcher, UpstreamResolver},
};

pub mod handlers;
pub mod responses;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<ChannelRegistry>,
    pub resolver: Arc<UpstreamResolver>,
    pub segments: Arc<SegmentFetcher>,
    pub keys: Arc<KeyFetcher>,
    pub pool: Arc<TunerPool>,
}

impl AppState {
    /// Wire the services together from explicit origin and process seams
    pub fn new(
        config: Config,
        origin: Arc<dyn OriginClient>,
        factory: Arc<dyn ProcessFactory>,
    ) -> AppResult<Self> {
        let registry = Arc::new(ChannelRegistry::from_config(&config.channels));
        let resolver = Arc::new(UpstreamResolver::new(Arc::clone(&origin), &config.upstream)?);
        let segments = Arc::new(SegmentFetcher::new(Arc::clone(&origin), Arc::clone(&resolver)));
        let keys = Arc::new(KeyFetcher::new(origin, Arc::clone(&resolver)));
        let pool = Arc::new(TunerPool::new(&config.tuner, factory));

        Ok(Self {
            config: Arc::new(config),
            registry,
            resolver,
            segments,
            keys,
            pool,
        })
    }

    /// Production wiring: reqwest origin client and the configured remuxer
    pub fn from_config(config: Config) -> AppResult<Self> {
        let origin = Arc::new(HttpOriginClient::new(&config.upstream)?);
        let local_url = config
            .web
            .internal_url()
            .map_err(|e| AppError::configuration(format!("Invalid internal base URL: {e}")))?;
        let factory = Arc::new(TranscodeProcessFactory::new(config.transcode.clone(), local_url));
        Self::new(config, origin, factory)
    }

    pub fn channel(&self, number: &str) -> AppResult<Arc<Channel>> {
        self.registry
            .get(number)
            .ok_or_else(|| AppError::channel_not_found(number))
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/tuners", get(handlers::health::tuner_statuses))
        .route("/discover.json", get(handlers::discovery::discover_json))
        .route("/lineup_status.json", get(handlers::discovery::lineup_status_json))
        .route("/lineup.json", get(handlers::discovery::lineup_json))
        .route("/listings.json", get(handlers::discovery::lineup_json))
        .route("/iptv.m3u", get(handlers::discovery::iptv_m3u))
        .route("/xmltv.xml", get(handlers::discovery::xmltv_xml))
        .route("/channel/{number}", get(handlers::channels::channel_stream))
        .route(
            "/channel/{number}/{*path}",
            get(handlers::channels::channel_resource),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Web server configuration and setup
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
    pool: Arc<TunerPool>,
}

impl WebServer {
    pub fn new(state: AppState) -> Result<Self> {
        let addr: SocketAddr =
            format!("{}:{}", state.config.web.host, state.config.web.port).parse()?;
        let pool = Arc::clone(&state.pool);
        Ok(Self {
            app: create_router(state),
            addr,
            pool,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve until SIGINT/SIGTERM. Tuners are stopped before the graceful
    /// shutdown waits on connections, which ends every open stream.
    pub async fn serve(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        info!(addr = %self.addr, "Listening");

        let pool = self.pool;
        let shutdown_signal = async move {
            wait_for_signal().await;
            pool.shutdown();
        };

        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal)
            .await?;
        Ok(())
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
                    _ = sigint.recv() => info!("Received SIGINT (Ctrl+C), shutting down gracefully"),
                }
                return;
            }
            _ => tracing::warn!("Failed to install signal handlers, falling back to Ctrl+C"),
        }
    }

    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Received Ctrl+C, shutting down gracefully");
    }
}
