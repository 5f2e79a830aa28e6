use anyhow::Result;
use clap::Parser;
use otl_edge::{AppState, ServerConfig, create_router, init_metrics};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "otl-edge")]
#[command(about = "Edge caching proxy for the Open Tech Leveling site", long_about = None)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen host
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the upstream site URL
    #[arg(long)]
    upstream: Option<String>,

    /// Admin API key for the /__edge management routes
    #[arg(long, env = "OTL_EDGE_ADMIN_KEY", hide_env_values = true)]
    admin_key: Option<String>,
}

fn init_tracing(config: &ServerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(upstream) = args.upstream {
        config.upstream.url = upstream;
    }
    if let Some(admin_key) = args.admin_key {
        config.admin.api_key = Some(admin_key);
    }

    init_tracing(&config);
    info!("Starting otl-edge v{}", env!("CARGO_PKG_VERSION"));
    init_metrics();

    let state = AppState::from_config(&config)?;

    // Without a controller every request passes straight upstream
    let worker = state.build_worker(None);
    match state.registration.register(worker).await {
        Ok(worker) => info!("Worker v{} in control", worker.version()),
        Err(e) => error!("Initial worker registration failed: {}", e),
    }

    let app = create_router(state);

    let addr = config.server_addr();
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
