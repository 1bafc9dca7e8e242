//! RGS server binary
//!
//! Loads configuration, opens the store, starts the outbox and webhook
//! workers and serves the operator API until Ctrl+C or SIGTERM.

use clap::Parser;
use rgs::{ConfigLoader, Rgs, RgsError};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "rgs")]
#[command(about = "RGS bet settlement server", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// API server host (overrides config and RGS_HOST)
    #[arg(long)]
    host: Option<String>,

    /// API server port (overrides config and RGS_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// RocksDB directory (overrides config and DATABASE_PATH)
    #[arg(long)]
    db_path: Option<String>,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rgs=info,tower_http=info".into()),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<(), RgsError> {
    init_tracing();
    let args = Args::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_path(path);
    }
    let mut config = loader.load()?;

    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(db_path) = args.db_path {
        config.storage.data_directory = db_path;
    }
    config.validate()?;

    info!(
        wallet = %config.wallet.url,
        backend = ?config.storage.backend,
        bind = %config.bind_address(),
        "Starting RGS"
    );

    let rgs = Rgs::build(config)?;
    for operator in rgs.seed_operators().await? {
        info!(operator_id = operator.id, name = %operator.name, "Operator ready");
    }

    let workers = rgs.start_workers();
    let served = rgs.api_server().run().await;

    for worker in workers {
        worker.stop().await;
    }
    info!("RGS stopped");
    served
}
