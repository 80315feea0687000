//! The gossip/operator HTTP surface (§6). One handler per route; local `/new`
//! endpoints sign with this node's own identity and fan out via
//! `crate::gossip::broadcast_incoming`, `/incoming` endpoints accept an
//! already-signed body from a peer and only re-derive and validate it.
//! Handlers never hold a lock across an `.await` point -- mining and conflict
//! resolution run under `spawn_blocking` instead.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::error::{NodeError, NodeResult};
use crate::gossip;
use crate::model::{Asn, Transaction};
use crate::node::Node;
use crate::peer::PeerInfo;
use crate::pool::PendingPool;
use crate::transactions::{
    build_assign, build_bgp_announce, build_bgp_withdraw, build_revoke, build_update, compute_txid,
    AssignRequest, BgpAnnounceRequest, BgpWithdrawRequest, RevokeRequest, UpdateRequest,
};

pub type AppState = Arc<Node>;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(boot))
        .route("/neighbors", get(neighbors))
        .route("/public_key/send", get(public_key_send))
        .route("/public_key/incoming", post(public_key_incoming))
        .route("/alive", post(alive))
        .route("/chain", get(get_chain))
        .route("/topos", get(get_topos))
        .route("/transactions/find_by_txid", post(find_by_txid))
        .route("/transactions/assign/new", post(assign_new))
        .route("/transactions/assign/incoming", post(assign_incoming))
        .route("/transactions/revoke/new", post(revoke_new))
        .route("/transactions/revoke/incoming", post(revoke_incoming))
        .route("/transactions/update/new", post(update_new))
        .route("/transactions/update/incoming", post(update_incoming))
        .route("/transactions/bgp_announce/new", post(bgp_announce_new))
        .route("/transactions/bgp_announce/incoming", post(bgp_announce_incoming))
        .route("/transactions/bgp_withdraw/new", post(bgp_withdraw_new))
        .route("/transactions/bgp_withdraw/incoming", post(bgp_withdraw_incoming))
        .route("/mine", get(mine))
        .route("/resolve", get(resolve))
        .with_state(state)
}

fn mark_invalid(node: &Node, txid: &str) {
    node.chain_state.lock().chain.invalid_txids.insert(txid.to_string());
}

fn accepted(txid: String) -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::CREATED, Json(json!({ "message": "transaction accepted", "txid": txid })))
}

/// Runs once a transaction clears validation, regardless of local or incoming
/// origin: push to the pool and refresh the announce-dedupe/withdraw-reset
/// bookkeeping the pool can't infer from the transaction alone.
fn push_and_book(node: &Node, tx: &Transaction) {
    let mut pool = node.pool.lock();
    pool.push(tx.clone());
    match tx {
        Transaction::Assign(a) if a.as_source == node.identity.asn => {
            pool.my_assignments.insert(a.txid.clone());
        }
        Transaction::BgpAnnounce(a) => {
            let hash = PendingPool::announce_dedupe_hash(&a.as_source, &a.prefix, &a.as_source_list, &a.as_dest_list, a.meta.bgp_timestamp);
            pool.mark_announced(&a.as_source, hash);
        }
        Transaction::BgpWithdraw(w) => pool.reset_announced_for(&w.as_source),
        _ => {}
    }
}

// ---------------------------------------------------------------------
// Membership & liveness (§4.5, §6)
// ---------------------------------------------------------------------

async fn boot(State(node): State<AppState>) -> impl IntoResponse {
    let seeds: Vec<String> = node.peers.read().urls().into_iter().map(|(url, _)| url).collect();
    gossip::join(&node, &seeds).await;
    Json(json!({ "message": "boot complete", "peers": node.peers.read().len() }))
}

#[derive(serde::Serialize)]
struct NeighborView {
    url: String,
    asn: Asn,
}

async fn neighbors(State(node): State<AppState>) -> impl IntoResponse {
    let list: Vec<NeighborView> = node
        .peers
        .read()
        .urls()
        .into_iter()
        .map(|(url, asn)| NeighborView { url, asn })
        .collect();
    Json(list)
}

#[derive(serde::Serialize)]
struct PublicKeyView {
    asn: Asn,
    public_key_pem: String,
}

async fn public_key_send(State(node): State<AppState>) -> NodeResult<impl IntoResponse> {
    let pem = node.identity.public_key_pem()?;
    Ok(Json(PublicKeyView { asn: node.identity.asn.clone(), public_key_pem: pem }))
}

#[derive(Deserialize)]
struct PublicKeyIncoming {
    asn: Asn,
    url: Option<String>,
    public_key_pem: String,
}

async fn public_key_incoming(State(node): State<AppState>, Json(body): Json<PublicKeyIncoming>) -> impl IntoResponse {
    let mut peers = node.peers.write();
    if !peers.is_known(&body.asn) {
        peers.insert(PeerInfo { url: body.url.clone().unwrap_or_default(), asn: body.asn.clone(), public_key_pem: None });
    }
    peers.set_public_key(&body.asn, body.public_key_pem);
    (StatusCode::CREATED, Json(json!({ "message": "public key registered" })))
}

#[derive(Deserialize)]
struct AlivePayload {
    ip: String,
    port: u16,
}

async fn alive(State(node): State<AppState>, Json(body): Json<AlivePayload>) -> impl IntoResponse {
    let url = format!("http://{}:{}", body.ip, body.port);
    let asn = node.peers.read().urls().into_iter().find(|(u, _)| *u == url).map(|(_, a)| a);
    match asn {
        Some(asn) => {
            node.mark_alive(&asn, crate::unix_time());
            StatusCode::OK
        }
        None => StatusCode::BAD_REQUEST,
    }
}

// ---------------------------------------------------------------------
// Chain & introspection (§4.7, §6)
// ---------------------------------------------------------------------

#[derive(serde::Serialize)]
struct ChainView {
    chain: Vec<crate::model::Block>,
    length: u64,
}

async fn get_chain(State(node): State<AppState>) -> impl IntoResponse {
    let guard = node.chain_state.lock();
    Json(ChainView { chain: guard.chain.blocks.clone(), length: guard.chain.len() as u64 })
}

#[derive(Deserialize)]
struct TxidQuery {
    txid: String,
}

async fn find_by_txid(State(node): State<AppState>, Json(body): Json<TxidQuery>) -> NodeResult<impl IntoResponse> {
    let guard = node.chain_state.lock();
    match guard.chain.find_by_txid(&body.txid) {
        Some(tx) => Ok(Json(tx.clone())),
        None => Err(NodeError::SemanticInvalid(format!("no transaction with txid {}", body.txid))),
    }
}

async fn get_topos(State(node): State<AppState>) -> impl IntoResponse {
    let guard = node.chain_state.lock();
    let mut out = serde_json::Map::new();
    for (prefix, graph) in &guard.state.graphs {
        let edges: Vec<[String; 2]> = graph.edges().into_iter().map(|(u, v)| [u, v]).collect();
        out.insert(prefix.clone(), serde_json::to_value(edges).unwrap());
    }
    Json(serde_json::Value::Object(out))
}

// ---------------------------------------------------------------------
// Local-origin submission (§4.1, §6 `.../new`)
// ---------------------------------------------------------------------

fn require_self_source(node: &Node, as_source: &str) -> NodeResult<()> {
    if as_source != node.identity.asn {
        return Err(NodeError::Malformed(
            "as_source must be this node's own ASN for a locally-originated transaction".into(),
        ));
    }
    Ok(())
}

async fn assign_new(State(node): State<AppState>, Json(req): Json<AssignRequest>) -> NodeResult<impl IntoResponse> {
    require_self_source(&node, &req.as_source)?;
    let now = crate::unix_time();
    let keyfield = crate::transactions::assign::keyfield(&req);
    let txid = compute_txid(&req.as_source, &keyfield, now);
    let signature = hex::encode(node.identity.sign(txid.as_bytes())?);
    let built = {
        let guard = node.chain_state.lock();
        let peers = node.peers.read();
        build_assign(&guard.state, &peers, req, now, txid.clone(), signature)
    };
    match built {
        Ok(tx) => {
            push_and_book(&node, &tx);
            gossip::broadcast_incoming(&node, &tx).await;
            Ok(accepted(txid))
        }
        Err(e) => {
            mark_invalid(&node, &txid);
            Err(e)
        }
    }
}

async fn revoke_new(State(node): State<AppState>, Json(req): Json<RevokeRequest>) -> NodeResult<impl IntoResponse> {
    require_self_source(&node, &req.as_source)?;
    let now = crate::unix_time();
    let keyfield = crate::transactions::revoke::keyfield(&req);
    let txid = compute_txid(&req.as_source, &keyfield, now);
    let signature = hex::encode(node.identity.sign(txid.as_bytes())?);
    let built = {
        let guard = node.chain_state.lock();
        let peers = node.peers.read();
        build_revoke(&guard.state, &peers, &guard.chain, req, now, txid.clone(), signature)
    };
    match built {
        Ok(tx) => {
            push_and_book(&node, &tx);
            gossip::broadcast_incoming(&node, &tx).await;
            Ok(accepted(txid))
        }
        Err(e) => {
            mark_invalid(&node, &txid);
            Err(e)
        }
    }
}

async fn update_new(State(node): State<AppState>, Json(req): Json<UpdateRequest>) -> NodeResult<impl IntoResponse> {
    require_self_source(&node, &req.as_source)?;
    let now = crate::unix_time();
    let keyfield = crate::transactions::update::keyfield(&req);
    let txid = compute_txid(&req.as_source, &keyfield, now);
    let signature = hex::encode(node.identity.sign(txid.as_bytes())?);
    let built = {
        let guard = node.chain_state.lock();
        let peers = node.peers.read();
        build_update(&guard.state, &peers, &guard.chain, req, now, txid.clone(), signature)
    };
    match built {
        Ok(tx) => {
            push_and_book(&node, &tx);
            gossip::broadcast_incoming(&node, &tx).await;
            Ok(accepted(txid))
        }
        Err(e) => {
            mark_invalid(&node, &txid);
            Err(e)
        }
    }
}

async fn bgp_announce_new(State(node): State<AppState>, Json(req): Json<BgpAnnounceRequest>) -> NodeResult<impl IntoResponse> {
    require_self_source(&node, &req.as_source)?;
    let now = crate::unix_time();
    let keyfield = crate::transactions::bgp_announce::keyfield(&req);
    let txid = compute_txid(&req.as_source, &keyfield, now);

    let dedupe_hash =
        PendingPool::announce_dedupe_hash(&req.as_source, &req.prefix, &req.as_source_list, &req.as_dest_list, req.bgp_timestamp);
    if node.pool.lock().is_duplicate_announce(&dedupe_hash) {
        mark_invalid(&node, &txid);
        return Err(NodeError::SemanticInvalid("this announcement has already been broadcast since the last withdraw".into()));
    }

    let signature = hex::encode(node.identity.sign(txid.as_bytes())?);
    let built = {
        let guard = node.chain_state.lock();
        let peers = node.peers.read();
        build_bgp_announce(&guard.state, &peers, req, now, txid.clone(), signature)
    };
    match built {
        Ok(tx) => {
            push_and_book(&node, &tx);
            gossip::broadcast_incoming(&node, &tx).await;
            Ok(accepted(txid))
        }
        Err(e) => {
            mark_invalid(&node, &txid);
            Err(e)
        }
    }
}

async fn bgp_withdraw_new(State(node): State<AppState>, Json(req): Json<BgpWithdrawRequest>) -> NodeResult<impl IntoResponse> {
    require_self_source(&node, &req.as_source)?;
    let now = crate::unix_time();
    let keyfield = crate::transactions::bgp_withdraw::keyfield(&req);
    let txid = compute_txid(&req.as_source, &keyfield, now);
    let already_pending = node.pool.lock().has_pending_withdraw(&req.prefix, &req.as_source);
    let signature = hex::encode(node.identity.sign(txid.as_bytes())?);
    let built = {
        let guard = node.chain_state.lock();
        let peers = node.peers.read();
        build_bgp_withdraw(&guard.state, &peers, req, already_pending, now, txid.clone(), signature)
    };
    match built {
        Ok(tx) => {
            push_and_book(&node, &tx);
            gossip::broadcast_incoming(&node, &tx).await;
            Ok(accepted(txid))
        }
        Err(e) => {
            mark_invalid(&node, &txid);
            Err(e)
        }
    }
}

// ---------------------------------------------------------------------
// Gossip mirror (§4.5, §6 `.../incoming`): `signature`/`time` come from the
// originating peer, this node only re-derives the txid and validates.
// ---------------------------------------------------------------------

#[derive(Deserialize)]
struct Incoming<T> {
    #[serde(flatten)]
    req: T,
    signature: String,
    time: f64,
}

async fn assign_incoming(State(node): State<AppState>, Json(body): Json<Incoming<AssignRequest>>) -> NodeResult<impl IntoResponse> {
    let keyfield = crate::transactions::assign::keyfield(&body.req);
    let txid = compute_txid(&body.req.as_source, &keyfield, body.time);
    let built = {
        let guard = node.chain_state.lock();
        let peers = node.peers.read();
        build_assign(&guard.state, &peers, body.req, body.time, txid.clone(), body.signature)
    };
    finish_incoming(&node, built, txid)
}

async fn revoke_incoming(State(node): State<AppState>, Json(body): Json<Incoming<RevokeRequest>>) -> NodeResult<impl IntoResponse> {
    let keyfield = crate::transactions::revoke::keyfield(&body.req);
    let txid = compute_txid(&body.req.as_source, &keyfield, body.time);
    let built = {
        let guard = node.chain_state.lock();
        let peers = node.peers.read();
        build_revoke(&guard.state, &peers, &guard.chain, body.req, body.time, txid.clone(), body.signature)
    };
    finish_incoming(&node, built, txid)
}

async fn update_incoming(State(node): State<AppState>, Json(body): Json<Incoming<UpdateRequest>>) -> NodeResult<impl IntoResponse> {
    let keyfield = crate::transactions::update::keyfield(&body.req);
    let txid = compute_txid(&body.req.as_source, &keyfield, body.time);
    let built = {
        let guard = node.chain_state.lock();
        let peers = node.peers.read();
        build_update(&guard.state, &peers, &guard.chain, body.req, body.time, txid.clone(), body.signature)
    };
    finish_incoming(&node, built, txid)
}

async fn bgp_announce_incoming(
    State(node): State<AppState>,
    Json(body): Json<Incoming<BgpAnnounceRequest>>,
) -> NodeResult<impl IntoResponse> {
    let keyfield = crate::transactions::bgp_announce::keyfield(&body.req);
    let txid = compute_txid(&body.req.as_source, &keyfield, body.time);

    let dedupe_hash = PendingPool::announce_dedupe_hash(
        &body.req.as_source,
        &body.req.prefix,
        &body.req.as_source_list,
        &body.req.as_dest_list,
        body.req.bgp_timestamp,
    );
    if node.pool.lock().is_duplicate_announce(&dedupe_hash) {
        mark_invalid(&node, &txid);
        return Err(NodeError::SemanticInvalid("this announcement has already been broadcast since the last withdraw".into()));
    }

    let built = {
        let guard = node.chain_state.lock();
        let peers = node.peers.read();
        build_bgp_announce(&guard.state, &peers, body.req, body.time, txid.clone(), body.signature)
    };
    finish_incoming(&node, built, txid)
}

async fn bgp_withdraw_incoming(
    State(node): State<AppState>,
    Json(body): Json<Incoming<BgpWithdrawRequest>>,
) -> NodeResult<impl IntoResponse> {
    let keyfield = crate::transactions::bgp_withdraw::keyfield(&body.req);
    let txid = compute_txid(&body.req.as_source, &keyfield, body.time);
    let already_pending = node.pool.lock().has_pending_withdraw(&body.req.prefix, &body.req.as_source);
    let built = {
        let guard = node.chain_state.lock();
        let peers = node.peers.read();
        build_bgp_withdraw(&guard.state, &peers, body.req, already_pending, body.time, txid.clone(), body.signature)
    };
    finish_incoming(&node, built, txid)
}

fn finish_incoming(node: &Node, built: NodeResult<Transaction>, txid: String) -> NodeResult<(StatusCode, Json<serde_json::Value>)> {
    match built {
        Ok(tx) => {
            push_and_book(node, &tx);
            Ok(accepted(txid))
        }
        Err(e) => {
            mark_invalid(node, &txid);
            Err(e)
        }
    }
}

// ---------------------------------------------------------------------
// Mining & consensus (§4.4, §6)
// ---------------------------------------------------------------------

async fn mine(State(node): State<AppState>) -> NodeResult<impl IntoResponse> {
    let now = crate::unix_time();
    let n = node.clone();
    let result = tokio::task::spawn_blocking(move || n.mine(now))
        .await
        .map_err(|e| NodeError::Config(e.to_string()))??;
    let n = node.clone();
    tokio::task::spawn_blocking(move || n.broadcast_resolve_blocking())
        .await
        .map_err(|e| NodeError::Config(e.to_string()))?;
    match result {
        Some(block) => Ok(Json(json!({ "message": "new block forged", "block": block }))),
        None => Ok(Json(json!({ "message": "no transactions to mine" }))),
    }
}

async fn resolve(State(node): State<AppState>) -> NodeResult<impl IntoResponse> {
    let now = crate::unix_time();
    let n = node.clone();
    let replaced = tokio::task::spawn_blocking(move || n.resolve_conflicts(now))
        .await
        .map_err(|e| NodeError::Config(e.to_string()))??;
    let length = node.chain_state.lock().chain.len();
    Ok(Json(json!({ "replaced": replaced, "length": length })))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;

    fn router() -> Router {
        build_router(Arc::new(crate::node::test_node()))
    }

    #[tokio::test]
    async fn get_chain_reports_genesis_only() {
        let resp = router()
            .oneshot(Request::builder().uri("/chain").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["length"], 1);
    }

    #[tokio::test]
    async fn find_by_txid_rejects_unknown_txid_with_500() {
        let resp = router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/transactions/find_by_txid")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({ "txid": "nonexistent" }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn assign_new_rejects_foreign_as_source_with_400() {
        let resp = router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/transactions/assign/new")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({
                            "prefix": "139.91.0.0/16",
                            "as_source": "13335",
                            "as_dest": ["13335"],
                            "source_lease": 1000,
                            "leaseDuration": 100,
                            "transferTag": false,
                            "last_assign": "-1",
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
