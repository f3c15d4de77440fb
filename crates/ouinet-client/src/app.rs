//! Assembles the DHT node, cache-control, and request router into one
//! running process, and owns the shutdown sequence.
//!
//! `spec.md` §9: on shutdown, close the accept loop first, then stop the
//! DHT, then release the cache handle — reversed from startup order so a
//! request already admitted can still finish against a live DHT.

use std::sync::Arc;

use ouinet_07_request_router::ProxyServer;
use tokio::net::TcpListener;

use crate::adapters::{HttpOriginClient, InMemoryCacheStore, StatusPage, SystemClock, Unconfigured, UpstreamHttpClient};
use crate::config::Config;
use crate::pidfile::PidFile;
use crate::routes::default_route_table;

pub async fn run(config: Config) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.repo)?;
    let _pid_file = PidFile::create(config.pid_file())?;

    let dht = crate::dht::start(dht_bind_addr(&config), config.injector_ep).await?;
    let node_id_hex = dht.local_id().await.to_hex();

    let cache_store = InMemoryCacheStore::new();
    let origin: Arc<dyn ouinet_07_request_router::OriginClient> = Arc::new(HttpOriginClient::new());
    let injector: Arc<dyn ouinet_07_request_router::InjectorClient> = match config.injector_ep {
        Some(ep) => Arc::new(UpstreamHttpClient::new(ep.to_string())),
        None => Arc::new(Unconfigured),
    };
    let proxy: Arc<dyn ouinet_07_request_router::ProxyClient> = Arc::new(Unconfigured);
    let front_end: Arc<dyn ouinet_07_request_router::FrontEnd> = Arc::new(StatusPage { node_id_hex });

    let server = Arc::new(ProxyServer::new(
        default_route_table(),
        cache_store,
        SystemClock,
        config.max_cached_age,
        origin,
        proxy,
        injector,
        front_end,
    ));

    let listener = TcpListener::bind(config.listen_on_tcp).await?;
    tracing::info!(listen_on = %config.listen_on_tcp, "proxy listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let accept_loop = tokio::spawn(server.serve(listener, shutdown_rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!("received Ctrl+C, shutting down");

    let _ = shutdown_tx.send(());
    let _ = accept_loop.await;
    drop(dht);

    Ok(())
}

fn dht_bind_addr(config: &Config) -> std::net::SocketAddr {
    // The DHT multiplexer listens on an ephemeral local port distinct from
    // the proxy's own TCP listener; only the port number differs.
    let mut addr = config.listen_on_tcp;
    addr.set_port(0);
    addr
}
