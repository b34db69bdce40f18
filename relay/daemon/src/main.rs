//! vidchat Relay Daemon
//!
//! HTTP server that relays a chat model's token stream to clients and
//! attaches a generated video once the text is complete.
//!
//! # Usage
//!
//! ```bash
//! # Listen on 127.0.0.1:3000, Ollama on localhost
//! vidchat-relay
//!
//! # Remote Ollama, no video
//! OLLAMA_URL=http://gpu-box:11434 vidchat-relay --no-video
//!
//! # With verbose logging
//! RUST_LOG=debug vidchat-relay
//! ```
//!
//! # Environment Variables
//!
//! - `VIDCHAT_CONFIG`: Config file (default: `~/.config/vidchat/relay.toml`)
//! - `VIDCHAT_HOST` / `VIDCHAT_PORT`: Listen address
//! - `OLLAMA_URL`: Ollama base URL (default: `http://localhost:11434`)
//! - `VIDCHAT_MODEL`: Model used when a request names none
//! - `VIDCHAT_VIDEO_URL`, `VIDCHAT_VIDEO_ENABLED`, `VIDCHAT_VIDEO_TIMEOUT_SECS`
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)
//!
//! # Signals
//!
//! - SIGTERM/SIGINT: Graceful shutdown (in-flight streams finish first)

mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::info;

use vidchat_core::{
    load_config, ChatBackend, ConfigOverrides, HttpVideoBackend, OllamaBackend, Relay,
    VideoBackend,
};

use crate::server::{router, AppState};

/// Streaming chat relay with a video side channel
#[derive(Debug, Parser)]
#[command(name = "vidchat-relay", version, about)]
struct Args {
    /// Config file path
    #[arg(long, env = "VIDCHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Listen host
    #[arg(long)]
    host: Option<String>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Ollama base URL
    #[arg(long)]
    ollama_url: Option<String>,

    /// Model used when a request leaves `selectedModel` empty
    #[arg(short, long)]
    model: Option<String>,

    /// Video service URL
    #[arg(long)]
    video_url: Option<String>,

    /// Do not request videos
    #[arg(long)]
    no_video: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            config_path: self.config.clone(),
            host: self.host.clone(),
            port: self.port,
            ollama_url: self.ollama_url.clone(),
            default_model: self.model.clone(),
            video_url: self.video_url.clone(),
            video_enabled: self.no_video.then_some(false),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vidchat_relay=info".parse()?)
                .add_directive("vidchat_core=info".parse()?),
        )
        .with_target(true)
        .init();

    let args = Args::parse();
    let settings = load_config(&args.overrides()).context("Failed to load configuration")?;

    info!(
        source = %settings.source(),
        ollama = %settings.ollama_url,
        default_model = ?settings.default_model,
        video = settings.video.enabled,
        "Starting vidchat relay"
    );

    let chat: Arc<dyn ChatBackend> = Arc::new(
        OllamaBackend::with_connect_timeout(&settings.ollama_url, settings.connect_timeout)
            .context("Failed to create Ollama client")?,
    );

    if !chat.health_check().await {
        tracing::warn!(
            url = %settings.ollama_url,
            "Ollama is not reachable yet; chat requests will fail with 502 until it is"
        );
    }

    let video: Option<Arc<dyn VideoBackend>> = if settings.video.enabled {
        let backend = HttpVideoBackend::new(&settings.video.url, settings.video.timeout)
            .context("Failed to create video client")?;
        info!(url = %settings.video.url, timeout = ?settings.video.timeout, "Video side channel enabled");
        Some(Arc::new(backend))
    } else {
        info!("Video side channel disabled");
        None
    };

    let relay = Relay::new(chat, video, settings.relay_config());
    let app = router(AppState::new(relay));

    let bind_addr = settings.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {bind_addr}"))?;

    info!(addr = %bind_addr, "vidchat relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("vidchat relay stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for SIGINT");
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
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
