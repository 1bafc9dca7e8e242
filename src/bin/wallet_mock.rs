//! Local signed wallet for development
//!
//! Speaks the same debit/credit protocol the RGS expects from an operator
//! wallet, backed by an in-memory ledger.

use clap::Parser;
use rgs::api::server::shutdown_signal;
use rgs::errors::{ConfigurationError, RgsError};
use rgs::wallet::mock::{router, MockWallet};
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "wallet-mock")]
#[command(about = "In-memory wallet for local RGS development", long_about = None)]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 8081)]
    port: u16,

    /// Shared signing secret (falls back to WALLET_SECRET)
    #[arg(long)]
    secret: Option<String>,

    /// Starting balance of every player
    #[arg(long, default_value_t = 1000.0)]
    balance: f64,
}

#[tokio::main]
async fn main() -> Result<(), RgsError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wallet_mock=info,rgs=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();
    let secret = args
        .secret
        .or_else(|| std::env::var("WALLET_SECRET").ok())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigurationError::MissingRequired("--secret or WALLET_SECRET".to_string()))?;

    let ip = args
        .host
        .parse::<std::net::IpAddr>()
        .map_err(|e| ConfigurationError::InvalidValue {
            field: "host".to_string(),
            value: args.host.clone(),
            reason: e.to_string(),
        })?;
    let addr = SocketAddr::from((ip, args.port));

    let app = router(MockWallet::new(&secret, args.balance)).layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, balance = args.balance, "Wallet mock listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}
