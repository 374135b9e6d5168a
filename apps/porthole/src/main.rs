use std::path::PathBuf;

use clap::{Args, Parser};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use porthole::capture::UiEvent;
use porthole::config::SessionConfig;
use porthole::dom::DomError;
use porthole::logging::{self as logctl, LogConfig, LogLevel};
use porthole::protocol::ProxyControl;
use porthole::proxy::{InterceptProxy, ProxyCommand, ProxyError, spawn_proxy};
use porthole::session::retrieval::{RetrievalError, fetch_page, normalize_target_url};
use porthole::session::{MirrorSession, SessionError};
use porthole::transport::{TransportError, WebSocketTransport};

#[derive(Parser, Debug)]
#[command(
    name = "porthole",
    about = "Mirror a live page into a shared co-browsing session"
)]
struct Cli {
    /// Address of the page to mirror. A bare hostname is promoted to https.
    #[arg(value_name = "URL")]
    target: String,

    /// Session server that serves page snapshots and diff channels.
    #[arg(long, env = "PORTHOLE_SESSION_SERVER", value_name = "HOST:PORT")]
    session_server: Option<String>,

    /// Viewport width hint passed to the snapshot endpoint.
    #[arg(long, value_name = "PX", requires = "height")]
    width: Option<u32>,

    /// Viewport height hint passed to the snapshot endpoint.
    #[arg(long, value_name = "PX", requires = "width")]
    height: Option<u32>,

    #[command(flatten)]
    logging: LoggingArgs,
}

#[derive(Args, Debug, Clone)]
struct LoggingArgs {
    /// Minimum log level (error, warn, info, debug, trace).
    #[arg(
        long = "log-level",
        value_enum,
        env = "PORTHOLE_LOG_LEVEL",
        default_value_t = LogLevel::Warn
    )]
    level: LogLevel,

    /// Write logs to this file instead of stderr.
    #[arg(long = "log-file", value_name = "PATH", env = "PORTHOLE_LOG_FILE")]
    file: Option<PathBuf>,
}

impl LoggingArgs {
    fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Retrieval(#[from] RetrievalError),
    #[error("replica construction failed: {0}")]
    Dom(#[from] DomError),
    #[error("{0}")]
    Session(#[from] SessionError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("interception proxy error: {0}")]
    Proxy(#[from] ProxyError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("logging initialization failed: {0}")]
    Logging(String),
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let log_config = cli.logging.to_config();
    logctl::init(&log_config).map_err(|err| CliError::Logging(err.to_string()))?;
    debug!(log_level = ?log_config.level, "logging configured");

    let mut config = SessionConfig::from_env();
    if let Some(server) = cli.session_server {
        config.set_session_server(server);
    }
    if let (Some(width), Some(height)) = (cli.width, cli.height) {
        config.viewport = Some((width, height));
    }

    let target = normalize_target_url(&cli.target)?;
    info!(target = %target, "requesting page snapshot");

    let http = reqwest::Client::new();
    let page = fetch_page(&http, &config.http_base(), &target, config.viewport).await?;
    info!(session = %page.id, "page snapshot loaded");

    let (proxy_tx, proxy_rx) = mpsc::unbounded_channel();
    let proxy_task = spawn_proxy(InterceptProxy::new()?, proxy_rx);
    let control = ProxyControl::RemoteUrl {
        payload: target.to_string(),
        currenturl: format!("{}/session/{}", config.http_base(), page.id),
    };
    if proxy_tx.send(ProxyCommand::Control(control)).is_err() {
        warn!("interception proxy is gone; subresource requests will pass through untouched");
    }

    let channel = config.channel_url(&page.id);
    let transport = WebSocketTransport::connect(&channel).await?;
    let session = MirrorSession::new(&page, config)?;

    let (ui_tx, ui_rx) = mpsc::unbounded_channel::<UiEvent>();
    let handle = session.spawn(Box::new(transport), ui_rx);
    info!(channel = %channel, "mirror session running, ctrl-c to end");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    drop(ui_tx);
    handle.shutdown().await?;
    proxy_task.abort();
    Ok(())
}
