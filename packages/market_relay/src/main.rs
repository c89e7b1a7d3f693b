use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{get, post},
};
use clap::{Parser, Subcommand};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::cors::CorsLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod cli;
mod config;
mod db;
mod handlers;
mod metrics;
mod models;
mod repository;
mod store;
#[cfg(test)]
mod test_helpers;
mod ws;

use crate::config::{AuthConfig, MarketConfig, RelayConfig};
use crate::db::Database;
use crate::metrics::RelayMetrics;
use crate::repository::MarketRepository;
use crate::ws::RelayServer;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "market-relay")]
#[command(about = "Marketplace backend with a real-time buyer/seller chat relay")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Custom data directory (defaults to ~/.market-relay)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP + relay server in the foreground (default)
    Serve(ServeArgs),

    /// Open an interactive chat in one conversation
    Chat(ChatArgs),
}

#[derive(Parser, Default)]
struct ServeArgs {
    /// Host to bind to (overrides config)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Port for the web server (overrides config, 0 = auto-select)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Parser)]
struct ChatArgs {
    /// Relay endpoint
    #[arg(long, default_value = "ws://127.0.0.1:5000/ws")]
    url: String,

    /// User id to authenticate as
    #[arg(long)]
    user: i64,

    /// Session token from /api/auth/login
    #[arg(long)]
    token: Option<String>,

    /// Conversation to send lines into
    #[arg(long)]
    conversation: i64,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub db: Arc<Database>,
    pub repository: Arc<MarketRepository>,
    /// Live relay: connection registry and routing
    pub relay: RelayServer,
    /// Authentication configuration
    pub auth_config: Arc<AuthConfig>,
    /// Relay metrics for observability
    pub metrics: Arc<RelayMetrics>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Chat(args)) => {
            cli::chat_command(&args.url, args.user, args.token, args.conversation).await
        }
        Some(Commands::Serve(args)) => run_server(args, cli.data_dir).await,
        None => run_server(ServeArgs::default(), cli.data_dir).await,
    }
}

pub(crate) fn app_router(state: AppState) -> Router {
    Router::new()
        // Relay endpoint (both paths accepted)
        .route("/ws", get(handlers::relay_websocket_handler))
        .route("/api/ws", get(handlers::relay_websocket_handler))
        // Auth
        .route("/api/auth/register", post(handlers::register_handler))
        .route("/api/auth/login", post(handlers::login_handler))
        .route("/api/auth/logout", post(handlers::logout_handler))
        // Products
        .route(
            "/api/products",
            get(handlers::list_products).post(handlers::create_product),
        )
        .route("/api/products/{id}", get(handlers::get_product))
        // Conversations and history
        .route(
            "/api/conversations",
            get(handlers::list_conversations).post(handlers::create_conversation),
        )
        .route(
            "/api/conversations/{id}/messages",
            get(handlers::list_messages).post(handlers::create_message),
        )
        // Health endpoints
        .route("/health/live", get(handlers::health_live_handler))
        .route("/health/ready", get(handlers::health_ready_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn run_server(args: ServeArgs, data_dir: Option<PathBuf>) -> Result<()> {
    // Setup logging
    let default_directive = if args.debug {
        "market_relay=debug,tower_http=debug,info"
    } else {
        "market_relay=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting market relay");

    let config = MarketConfig::new(data_dir)?;
    let file_config = config.load_file_config()?;

    info!("Initializing database...");
    let db = Arc::new(Database::new(&config).await?);
    let repository = Arc::new(MarketRepository::new(db.pool.clone()));

    let relay_config = RelayConfig::from_file(&file_config.relay);
    info!(
        "Relay config: queue={} frames, push_timeout={}ms",
        relay_config.send_channel_capacity,
        relay_config.push_timeout.as_millis()
    );

    let auth_config = Arc::new(AuthConfig::from_file(&file_config.auth));
    if auth_config.require_token {
        info!(
            "Handshake token verification ENABLED (session TTL: {}s)",
            auth_config.session_ttl_secs
        );
    } else {
        warn!("Handshake token verification disabled; claimed user ids are trusted");
    }

    let metrics = Arc::new(RelayMetrics::new());
    let relay = RelayServer::new(
        repository.clone(),
        repository.clone(),
        relay_config,
        auth_config.clone(),
        metrics.clone(),
    );

    let app_state = AppState {
        db,
        repository: repository.clone(),
        relay,
        auth_config,
        metrics,
    };

    // Spawn periodic expired session cleanup
    let cleanup_repo = repository.clone();
    let cleanup_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
        loop {
            interval.tick().await;
            match cleanup_repo.cleanup_expired_sessions().await {
                Ok(n) if n > 0 => info!("Cleaned up {} expired sessions", n),
                Ok(_) => {}
                Err(e) => warn!("Session cleanup failed: {}", e),
            }
        }
    });

    let app = app_router(app_state);

    let host = args.host.unwrap_or(file_config.server.host);
    let port = args.port.unwrap_or(file_config.server.port);
    let addr = format!("{}:{}", host, port)
        .parse::<SocketAddr>()
        .with_context(|| format!("Invalid listen address {host}:{port}"))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Market relay listening on http://{}", actual_addr);
    info!("Relay WebSocket: ws://{}/ws", actual_addr);

    // Create shutdown signal handler
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
    };

    let server_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error");

    cleanup_task.abort();
    info!("Shutdown complete");
    server_result
}
