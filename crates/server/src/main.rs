use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vidpress_core::{
    create_authenticator, load_config, validate_config, Authenticator, FfmpegTranscoder,
    LogFormat, LoggingConfig, TranscodeEngine, Transcoder,
};
use vidpress_server::api::create_router;
use vidpress_server::state::{AppState, SharedEngine};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        // Logging may not be up yet when the config is unusable.
        eprintln!("Fatal error: {:#}", e);
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let registry = tracing_subscriber::registry().with(filter);

    match logging.format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

async fn run() -> Result<()> {
    // Determine config path
    let config_path = std::env::var("VIDPRESS_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    init_logging(&config.logging);
    info!(version = VERSION, "Configuration loaded from {:?}", config_path);
    info!(
        max_concurrent_jobs = config.engine.max_concurrent_jobs,
        ffmpeg = %config.ffmpeg.ffmpeg_path.display(),
        "Engine settings"
    );

    // Create transcoder
    let transcoder = FfmpegTranscoder::detect(config.ffmpeg.clone()).await;
    if let Err(e) = transcoder.validate().await {
        warn!("FFmpeg is not usable, jobs will fail until it is installed: {}", e);
    }
    info!(
        codecs = ?transcoder.capabilities().available_codecs(),
        "Using transcoder: {}",
        transcoder.name()
    );
    let transcoder: Arc<dyn Transcoder> = Arc::new(transcoder);

    // Create engine
    let engine: SharedEngine = Arc::new(TranscodeEngine::with_transcoder(
        config.engine.clone(),
        transcoder,
    ));

    // Create authenticator
    let authenticator: Arc<dyn Authenticator> = Arc::from(
        create_authenticator(&config.auth).context("Failed to create authenticator")?,
    );
    info!("Using authenticator: {}", authenticator.method_name());

    // Create app state and router
    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::clone(&engine),
        authenticator,
    ));
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(engine))
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM), then drain the engine.
///
/// Cancelling jobs first lets open event streams reach their terminal event,
/// so the server's own connection drain can finish.
async fn shutdown_signal(engine: SharedEngine) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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

    info!("Shutdown signal received");
    engine.shutdown().await;
}
