//! Peer membership, key exchange, liveness, and transaction fan-out (§4.5).
//!
//! Two call styles coexist on purpose: the join handshake and the periodic
//! timers run as async Tokio tasks against `Node::http_async`, matching how
//! the reference node keeps its long-lived background loops off any request
//! thread; the mining pipeline and conflict resolution are synchronous and
//! already run inside `spawn_blocking`, so their own fan-out (`broadcast_incoming_blocking`,
//! `Node::broadcast_resolve_blocking`) goes through the blocking client instead.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::model::{Asn, Transaction};
use crate::node::Node;
use crate::peer::{PeerInfo, PeerTable};

pub const ALIVE_INTERVAL_SECS: u64 = 20;
pub const ALIVE_TIMEOUT_SECS: f64 = 60.0;

/// The path segment used for `/transactions/<kind>/incoming` -- one per
/// `Transaction` variant.
pub fn incoming_kind(tx: &Transaction) -> &'static str {
    match tx {
        Transaction::Assign(_) => "assign",
        Transaction::Revoke(_) => "revoke",
        Transaction::Update(_) => "update",
        Transaction::BgpAnnounce(_) => "bgp_announce",
        Transaction::BgpWithdraw(_) => "bgp_withdraw",
    }
}

/// Builds the JSON body a peer's `/transactions/<kind>/incoming` endpoint
/// expects: the same fields as the local `.../new` submission plus
/// `signature` and `time`, read back off the already-built `Transaction`.
pub fn incoming_body(tx: &Transaction) -> Value {
    match tx {
        Transaction::Assign(t) => json!({
            "prefix": t.prefix,
            "as_source": t.as_source,
            "as_dest": t.as_dest_list,
            "source_lease": t.source_lease,
            "leaseDuration": t.lease_duration,
            "transferTag": t.transfer_tag,
            "last_assign": t.last_assign,
            "time": t.time,
            "signature": t.signature,
        }),
        Transaction::Revoke(t) => json!({
            "as_source": t.as_source,
            "assign_tran": t.assign_txid,
            "time": t.time,
            "signature": t.signature,
        }),
        Transaction::Update(t) => json!({
            "as_source": t.as_source,
            "assign_tran": t.assign_txid,
            "new_lease": t.new_lease,
            "time": t.time,
            "signature": t.signature,
        }),
        Transaction::BgpAnnounce(t) => json!({
            "prefix": t.prefix,
            "bgp_timestamp": t.meta.bgp_timestamp,
            "as_source": t.as_source,
            "as_source_list": t.as_source_list,
            "as_dest_list": t.as_dest_list,
            "project": t.meta.project,
            "collector": t.meta.collector,
            "asn_peer": t.meta.asn_peer,
            "time": t.time,
            "signature": t.signature,
        }),
        Transaction::BgpWithdraw(t) => json!({
            "prefix": t.prefix,
            "as_source": t.as_source,
            "bgp_timestamp": t.meta.bgp_timestamp,
            "project": t.meta.project,
            "collector": t.meta.collector,
            "asn_peer": t.meta.asn_peer,
            "time": t.time,
            "signature": t.signature,
        }),
    }
}

/// Fans a freshly-accepted transaction out to every known peer's `incoming`
/// mirror endpoint. Best-effort: an unreachable peer is logged and skipped,
/// never fatal to the submitting request (§5 "Cancellation and timeouts").
pub async fn broadcast_incoming(node: &Node, tx: &Transaction) {
    let kind = incoming_kind(tx);
    let body = incoming_body(tx);
    let peers = node.peers.read().urls();
    for (url, asn) in peers {
        if asn == node.identity.asn {
            continue;
        }
        let endpoint = format!("{url}/transactions/{kind}/incoming");
        if let Err(e) = node.http_async.post(&endpoint).json(&body).send().await {
            tracing::warn!(%endpoint, error = %e, "peer unreachable while broadcasting transaction");
        }
    }
}

/// Synchronous counterpart used from `Node::resolve_conflicts`'s auto-revoke
/// path, which already runs under the chain lock inside `spawn_blocking`.
pub fn broadcast_incoming_blocking(client: &reqwest::blocking::Client, peers: &PeerTable, tx: &Transaction) {
    let kind = incoming_kind(tx);
    let body = incoming_body(tx);
    for (url, _) in peers.urls() {
        let endpoint = format!("{url}/transactions/{kind}/incoming");
        if let Err(e) = client.post(&endpoint).json(&body).send() {
            tracing::warn!(%endpoint, error = %e, "peer unreachable while broadcasting auto-revoke");
        }
    }
}

#[derive(Debug, Deserialize)]
struct NeighborEntry {
    url: String,
    asn: Asn,
}

#[derive(Debug, Deserialize)]
struct PublicKeyResponse {
    asn: Asn,
    public_key_pem: String,
}

/// Join handshake (§4.5): contact every seed peer, pull and dedupe its
/// `neighbors`, register all of them, then push our own `(publicKey, ip,
/// port, asn)` to the full set and pull each peer's key in return.
pub async fn join(node: &Arc<Node>, seed_urls: &[String]) {
    let mut discovered: Vec<(String, Asn)> = node.peers.read().urls();

    for seed in seed_urls {
        let endpoint = format!("{seed}/neighbors");
        match node.http_async.get(&endpoint).send().await {
            Ok(resp) => match resp.json::<Vec<NeighborEntry>>().await {
                Ok(neighbors) => {
                    for n in neighbors {
                        if n.asn != node.identity.asn && !discovered.iter().any(|(_, a)| a == &n.asn) {
                            discovered.push((n.url.clone(), n.asn.clone()));
                        }
                    }
                }
                Err(e) => tracing::warn!(%endpoint, error = %e, "malformed neighbors response"),
            },
            Err(e) => tracing::warn!(%endpoint, error = %e, "seed peer unreachable during join"),
        }
    }

    {
        let mut peers = node.peers.write();
        for (url, asn) in &discovered {
            if !peers.is_known(asn) {
                peers.insert(PeerInfo { url: url.clone(), asn: asn.clone(), public_key_pem: None });
            }
        }
    }

    let own_pem = match node.identity.public_key_pem() {
        Ok(pem) => pem,
        Err(e) => {
            tracing::error!(error = %e, "could not encode own public key during join");
            return;
        }
    };
    let announcement = json!({
        "asn": node.identity.asn,
        "url": node.config.base_url(),
        "public_key_pem": own_pem,
    });

    let peer_urls: Vec<(String, Asn)> = node.peers.read().urls();
    for (url, asn) in peer_urls {
        if asn == node.identity.asn {
            continue;
        }
        let push_endpoint = format!("{url}/public_key/incoming");
        if let Err(e) = node.http_async.post(&push_endpoint).json(&announcement).send().await {
            tracing::warn!(%push_endpoint, error = %e, "peer unreachable while announcing public key");
        }

        let pull_endpoint = format!("{url}/public_key/send");
        match node.http_async.get(&pull_endpoint).send().await {
            Ok(resp) => match resp.json::<PublicKeyResponse>().await {
                Ok(key) => node.peers.write().set_public_key(&key.asn, key.public_key_pem),
                Err(e) => tracing::warn!(%pull_endpoint, error = %e, "malformed public key response"),
            },
            Err(e) => tracing::warn!(%pull_endpoint, error = %e, "peer unreachable while pulling public key"),
        }
    }

    tracing::info!(peer_count = node.peers.read().len(), "join handshake complete");
}

/// Periodic alive broadcast (§4.5, every 20s): tell every peer we're up.
pub async fn alive_sender_loop(node: Arc<Node>) {
    let mut interval = tokio::time::interval(Duration::from_secs(ALIVE_INTERVAL_SECS));
    loop {
        interval.tick().await;
        let peers = node.peers.read().urls();
        let (ip, port) = (node.config.ip.clone(), node.config.port);
        for (url, asn) in peers {
            if asn == node.identity.asn {
                continue;
            }
            let endpoint = format!("{url}/alive");
            if let Err(e) = node.http_async.post(&endpoint).json(&json!({ "ip": ip, "port": port })).send().await {
                tracing::warn!(%endpoint, error = %e, "peer unreachable during alive broadcast");
            }
        }
    }
}

/// Liveness reaper (§4.5, 60s timeout): drops peers we haven't heard an
/// alive probe from recently.
pub async fn alive_reaper_loop(node: Arc<Node>) {
    let mut interval = tokio::time::interval(Duration::from_secs(ALIVE_TIMEOUT_SECS as u64 / 2));
    loop {
        interval.tick().await;
        let now = crate::unix_time();
        node.reap_liveness(now, ALIVE_TIMEOUT_SECS);
    }
}
