mod app;
mod theme;
mod widgets;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clipfeed_engine::feed::{BroadcastMessage, FeedCore, FeedEvent};
use clipfeed_engine::mpv::MpvBackend;
use clipfeed_engine::recorder::FfmpegRecorder;
use clipfeed_engine::store::HttpObjectStore;
use clipfeed_proto::config::Config;

#[derive(Parser)]
#[command(name = "clipfeed")]
#[command(about = "Swipe through a feed of short audio clips", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Use mpv/ffmpeg from PATH even when bundled binaries sit beside the executable
    #[arg(long)]
    system_deps: bool,
    /// Do not start the local HTTP control API
    #[arg(long)]
    no_http: bool,
}

// ── Log forwarding ────────────────────────────────────────────────────────────

/// Forwards WARN and ERROR events to the UI as `BroadcastMessage::Log`.
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // no receivers is fine
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl tracing::field::Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    clipfeed_proto::platform::set_use_system_deps(cli.system_deps);

    // Broadcast channel first so the log layer can use it
    let (broadcast_tx, broadcast_rx) = broadcast::channel::<BroadcastMessage>(1024);

    let data_dir = clipfeed_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("clipfeed.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    // RUST_LOG wins; otherwise debug for our code without the HTTP client chatter.
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer::new(broadcast_tx.clone()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("debug,hyper_util=warn,reqwest=warn,hyper=warn")
            }),
        )
        .init();

    eprintln!("clipfeed log: {}", log_path.display());
    info!("clipfeed starting…");

    // ── Load config ──────────────────────────────────────────────────────────
    let config = match cli.config.as_deref() {
        Some(path) => Config::load_from(path)?,
        None => Config::load().unwrap_or_else(|e| {
            error!("config load failed, using defaults: {}", e);
            Config::default()
        }),
    };

    // ── FeedEvent channel (TUI/HTTP → FeedCore) ─────────────────────────────
    let (event_tx, event_rx) = mpsc::channel::<FeedEvent>(1024);

    // ── Build FeedCore ───────────────────────────────────────────────────────
    let backend = Arc::new(MpvBackend::new()?);
    let store = Arc::new(HttpObjectStore::new(&config.store)?);
    let recorder = Box::new(FfmpegRecorder::new(config.recording.clone()));
    let core = FeedCore::new(
        config.clone(),
        backend,
        store,
        recorder,
        broadcast_tx.clone(),
        &event_tx,
    );
    let state_manager = core.state_manager();
    let analyzer = core.analyzer();

    // ── HTTP server ──────────────────────────────────────────────────────────
    if config.http.enabled && !cli.no_http {
        clipfeed_engine::http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            state_manager.clone(),
            event_tx.clone(),
        );
    }

    // ── Spawn FeedCore event loop ────────────────────────────────────────────
    let core_task = tokio::spawn(async move {
        if let Err(e) = core.run(event_rx).await {
            error!("FeedCore exited with error: {}", e);
        }
    });

    // ── Run TUI ──────────────────────────────────────────────────────────────
    let app = app::App::new(&config, state_manager, analyzer, event_tx.clone());
    let result = app.run(broadcast_rx).await;

    info!("clipfeed shutting down");
    let _ = event_tx.send(FeedEvent::Shutdown).await;
    let _ = core_task.await;

    result
}
