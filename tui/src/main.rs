//! vidchat Terminal Entry Point
//!
//! Usage:
//!   vidchat [OPTIONS]
//!
//! Options:
//!   --relay-url <URL>     Relay base URL (default: http://127.0.0.1:3000)
//!   --model <NAME>        Model to chat with (default: first the relay lists)
//!   --user <NAME>         Name whose initials label your messages
//!   --artifact-dir <DIR>  Where videos are written
//!
//! Logs go to `~/.cache/vidchat/vidchat.log`, and only when `RUST_LOG` is set.

use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal};
use std::panic;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Context;
use clap::Parser;
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tracing_subscriber::EnvFilter;

use vidchat_tui::{default_artifact_dir, App, AppConfig, RelayClient, DEFAULT_RELAY_URL};

/// Terminal chat with video attachments
#[derive(Debug, Parser)]
#[command(name = "vidchat", version, about)]
struct Args {
    /// Relay base URL
    #[arg(long, env = "VIDCHAT_RELAY_URL", default_value = DEFAULT_RELAY_URL)]
    relay_url: String,

    /// Model to chat with
    #[arg(short, long, env = "VIDCHAT_MODEL")]
    model: Option<String>,

    /// Your name, shown as initials
    #[arg(short, long, env = "VIDCHAT_USER")]
    user: Option<String>,

    /// Directory for downloaded videos
    #[arg(long)]
    artifact_dir: Option<PathBuf>,
}

impl Args {
    fn user_name(&self) -> String {
        self.user
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "you".to_string())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging()?;

    if !io::stdin().is_terminal() || !io::stdout().is_terminal() {
        eprintln!("Error: vidchat requires a terminal (TTY)");
        eprintln!();
        eprintln!("Piped stdin/stdout and SSH sessions without -t are not supported.");
        std::process::exit(1);
    }

    let client = RelayClient::new(&args.relay_url).context("Failed to build HTTP client")?;
    let model = match args.model.clone() {
        Some(model) => model,
        None => first_model(&client).await?,
    };
    let config = AppConfig {
        model,
        user_name: args.user_name(),
        artifact_dir: args.artifact_dir.clone().unwrap_or_else(default_artifact_dir),
    };
    tracing::info!(relay = %args.relay_url, model = %config.model, "Starting vidchat");

    // Set up panic hook to restore terminal
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original_hook(panic_info);
    }));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let mut app = App::new(config, client);
    let result = app.run(&mut terminal).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

/// Log to a file under the cache directory when `RUST_LOG` is set
fn init_logging() -> anyhow::Result<()> {
    if std::env::var_os("RUST_LOG").is_none() {
        return Ok(());
    }

    let dir = dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("vidchat");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    let path = dir.join("vidchat.log");
    let file: File = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    Ok(())
}

async fn first_model(client: &RelayClient) -> anyhow::Result<String> {
    let models = client
        .models()
        .await
        .with_context(|| format!("Failed to list models from {}", client.base_url()))?;
    models
        .into_iter()
        .next()
        .map(|m| m.name)
        .context("The relay lists no models; pass --model")
}
