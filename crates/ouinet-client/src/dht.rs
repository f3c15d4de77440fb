//! Brings up the DHT node: binds the UDP multiplexer, picks a local node
//! ID, starts the receive loop, and bootstraps against the configured
//! injector endpoint if one was given.

use std::net::SocketAddr;
use std::sync::Arc;

use ouinet_02_multiplexer::Multiplexer;
use ouinet_05_dht_node::adapters::{MultiplexerNetwork, SystemTimeSource};
use ouinet_05_dht_node::DhtNode;

pub type Node = DhtNode<MultiplexerNetwork, SystemTimeSource>;

pub async fn start(bind_addr: SocketAddr, bootstrap: Option<SocketAddr>) -> anyhow::Result<Arc<Node>> {
    let multiplexer = Multiplexer::bind(bind_addr).await?;
    let network = MultiplexerNetwork::new(multiplexer);
    let node = DhtNode::new(network, SystemTimeSource);

    let receiver = Arc::clone(&node);
    tokio::spawn(async move {
        if let Err(err) = receiver.run_receive_loop().await {
            tracing::warn!(%err, "DHT receive loop ended");
        }
    });

    if let Some(host) = bootstrap {
        match node.bootstrap(host).await {
            Ok(()) => tracing::info!(%host, "bootstrapped the DHT routing table"),
            Err(err) => tracing::warn!(%host, %err, "failed to bootstrap against the configured injector"),
        }
    } else {
        tracing::info!("no injector endpoint configured, starting with an empty routing table");
    }

    tracing::info!(local_id = %node.local_id().await.to_hex(), "DHT node ready");
    Ok(node)
}
