//! The ouinet client: a local HTTP proxy backed by a mainline DHT node,
//! a cache-control layer, and a request router (`spec.md` §1).

mod adapters;
mod app;
mod config;
mod dht;
mod pidfile;
mod routes;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use config::{Args, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match Config::resolve(Args::parse()) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(%err, "configuration error");
            std::process::exit(1);
        }
    };

    if let Err(err) = app::run(config).await {
        tracing::error!(%err, "ouinet-client exited with an error");
        std::process::exit(1);
    }

    Ok(())
}
