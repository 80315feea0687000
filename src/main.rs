mod bootstrap;
mod chain;
mod config;
mod error;
mod gossip;
mod graph;
mod http;
mod identity;
mod model;
mod node;
mod peer;
mod pool;
mod replay;
mod state;
mod transactions;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::config::{Cli, NodeConfig};
use crate::identity::NodeIdentity;
use crate::node::Node;
use crate::peer::PeerInfo;

/// Wall-clock seconds since the epoch, as an `f64` to match the reference
/// chain's timestamp arithmetic (`time.time()`), including `MONTH_SECS`
/// lease math. Not called during replay/tests, which stamp their own `now`.
pub fn unix_time() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_secs_f64()
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config: NodeConfig = cli.into();
    init_tracing(&config.log_level);

    tracing::info!(asn = %config.asn, port = config.port, "starting node");

    let identity = NodeIdentity::load_or_generate(&config.asn, &config.key_path)?;
    let now = unix_time();
    let (mut peers, genesis_holdings, chain) = bootstrap::bootstrap(&config, &identity, now)?;

    // A node must be able to verify its own signature (e.g. an auto-Revoke it
    // synthesizes for itself), so it peers with itself too.
    let own_pem = identity.public_key_pem()?;
    peers.insert(PeerInfo { url: config.base_url(), asn: config.asn.clone(), public_key_pem: Some(own_pem) });

    let genesis_lease_months = bootstrap::GENESIS_LEASE_MONTHS;
    let node = Arc::new(Node::new(config.clone(), identity, peers, genesis_holdings, chain, genesis_lease_months)?);

    let seeds: Vec<String> = node.peers.read().urls().into_iter().map(|(url, _)| url).collect();
    gossip::join(&node, &seeds).await;

    tokio::spawn(gossip::alive_sender_loop(node.clone()));
    tokio::spawn(gossip::alive_reaper_loop(node.clone()));

    let app = http::build_router(node.clone()).layer(tower_http::cors::CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", node.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
