mod app;
mod controller;
mod scheduler;
mod sentinel;
mod theme;
mod widgets;

use anyhow::Context;
use clap::Parser;
use pigeon_proto::api::HttpEpisodeApi;
use pigeon_proto::config::Config;
use pigeon_proto::session::Session;
use tokio::sync::mpsc;

use crate::controller::FeedDetailController;
use crate::scheduler::TokioScheduler;
use crate::sentinel::ViewportSentinel;

/// Watch the download progress of a podcast feed's episodes.
#[derive(Parser, Debug)]
#[command(name = "pigeon-watch", version, about)]
struct Cli {
    /// Feed id to show
    #[arg(short, long)]
    feed: String,

    /// Backend base URL (overrides `[server] base_url`)
    #[arg(long)]
    server: Option<String>,

    /// Auth token (overrides the saved session)
    #[arg(long)]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let data_dir = pigeon_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("pigeon-watch.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // RUST_LOG wins; otherwise keep HTTP client internals quiet.
    let log_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "debug,hyper_util=warn,reqwest=warn,hyper=warn".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    eprintln!("pigeon-watch log: {}", log_path.display());
    tracing::info!("pigeon-watch starting, feed {}", cli.feed);

    // ── Config & session ─────────────────────────────────────────────────────
    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("config: {:#}, using defaults", e);
        Config::default()
    });
    let mut session = Session::load().unwrap_or_else(|e| {
        tracing::warn!("session: {:#}, continuing anonymously", e);
        Session::new(None, None)
    });
    if let Some(token) = cli.token {
        session = session.with_token(token);
    }
    let base_url = cli.server.unwrap_or_else(|| config.server.base_url.clone());
    tracing::info!(
        "backend {} as {} (language {})",
        base_url,
        session.username().unwrap_or("anonymous"),
        session.language()
    );

    let api = HttpEpisodeApi::new(&base_url, &config.server.token_header, session)
        .context("building HTTP client")?;

    // ── Controller ───────────────────────────────────────────────────────────
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let sentinel = ViewportSentinel::new();
    let controller = FeedDetailController::new(
        api,
        Box::new(TokioScheduler::new()),
        Box::new(sentinel.clone()),
        event_tx,
        &config.feed,
    );

    // ── Run TUI ──────────────────────────────────────────────────────────────
    app::App::new(controller, sentinel, cli.feed).run(event_rx).await
}
