use std::collections::HashMap;
use std::collections::HashSet;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::chain::{proof_of_work, Chain};
use crate::config::NodeConfig;
use crate::error::{NodeError, NodeResult};
use crate::identity::NodeIdentity;
use crate::model::{Asn, Block, Prefix, Transaction};
use crate::peer::PeerTable;
use crate::pool::PendingPool;
use crate::replay;
use crate::state::WorldState;

/// Chain and derived world state, always mutated together under the single
/// `mutex` of §5 -- `ReachabilityGraph` lives inside `WorldState` so the
/// reference design's separate `topo_mutex` is realized here as "whatever
/// mutates state also holds this lock" rather than a second lock object (see
/// DESIGN.md).
pub struct ChainState {
    pub chain: Chain,
    pub state: WorldState,
}

/// The node's full mutable surface, held behind one `Arc<Node>` and passed as
/// axum `State`. Each field is the named lock of §5; `peers` stands in for
/// both `asn_nodes_mutex` and `bc_nodes_mutex` since this crate keeps one peer
/// directory rather than two, and `pool` carries the announcement-dedupe
/// structures `bgpa_mutex` would otherwise guard separately.
pub struct Node {
    pub config: NodeConfig,
    pub identity: NodeIdentity,
    pub genesis_holdings: Vec<(Asn, Prefix)>,
    pub chain_state: Mutex<ChainState>,
    pub pool: Mutex<PendingPool>,
    pub peers: RwLock<PeerTable>,
    pub liveness: RwLock<HashMap<Asn, f64>>,
    /// Blocking client for the sync call sites (`mine`, `resolve_conflicts`)
    /// that already run inside `spawn_blocking`.
    pub http: reqwest::blocking::Client,
    /// Async client for request handlers and the background gossip tasks in
    /// `crate::gossip`.
    pub http_async: reqwest::Client,
}

#[derive(Debug, serde::Deserialize)]
struct ChainResponse {
    chain: Vec<Block>,
    #[allow(dead_code)]
    length: u64,
}

impl Node {
    pub fn new(
        config: NodeConfig,
        identity: NodeIdentity,
        peers: PeerTable,
        genesis_holdings: Vec<(Asn, Prefix)>,
        chain: Chain,
        genesis_lease_months: u32,
    ) -> NodeResult<Self> {
        let mut state = WorldState::new();
        state.seed_genesis(&genesis_holdings, genesis_lease_months);
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| NodeError::Config(e.to_string()))?;
        let http_async = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| NodeError::Config(e.to_string()))?;
        Ok(Self {
            config,
            identity,
            genesis_holdings,
            chain_state: Mutex::new(ChainState { chain, state }),
            pool: Mutex::new(PendingPool::new()),
            peers,
            liveness: RwLock::new(HashMap::new()),
            http,
            http_async,
        })
    }

    fn genesis_lease_months(&self) -> u32 {
        crate::bootstrap::GENESIS_LEASE_MONTHS
    }

    /// Consensus: fetch every known peer's chain, keep the longest one that
    /// both passes structural validation and replays cleanly, swap it in if
    /// it's longer than ours. Follows the §9 refactor: the chain lock is held
    /// only to snapshot the local length and to perform the final swap, never
    /// across the peer HTTP round-trips.
    pub fn resolve_conflicts(&self, now: f64) -> NodeResult<bool> {
        let local_len = self.chain_state.lock().chain.len();
        let peer_urls: Vec<String> = self.peers.read().urls().into_iter().map(|(url, _)| url).collect();

        let mut best: Option<(Chain, WorldState)> = None;
        let peers_snapshot = self.peers.read().clone();
        for url in peer_urls {
            let fetched = match self.http.get(format!("{url}/chain")).send() {
                Ok(resp) => resp.json::<ChainResponse>(),
                Err(e) => {
                    tracing::warn!(%url, error = %e, "peer unreachable during resolve");
                    continue;
                }
            };
            let body = match fetched {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(%url, error = %e, "malformed /chain response");
                    continue;
                }
            };
            if (body.chain.len() as usize) <= local_len {
                continue;
            }
            let mut candidate = Chain::new();
            for block in body.chain {
                candidate.push(block);
            }
            if !candidate.is_structurally_valid(|asn| peers_snapshot.public_key_pem(asn)) {
                continue;
            }
            let replayed = match replay::replay_chain(&candidate, &peers_snapshot, &self.genesis_holdings, self.genesis_lease_months()) {
                Ok(ws) => ws,
                Err(e) => {
                    tracing::warn!(%url, error = %e, "peer chain failed replay");
                    continue;
                }
            };
            let candidate_len = candidate.len();
            if best.as_ref().map(|(c, _)| candidate_len > c.len()).unwrap_or(true) {
                best = Some((candidate, replayed));
            }
        }

        let Some((new_chain, new_state)) = best else { return Ok(false) };

        // Lock order is always chain_state-then-pool, matching `mine`, so the
        // two can never deadlock against each other.
        let mut guard = self.chain_state.lock();
        if new_chain.len() <= guard.chain.len() {
            return Ok(false);
        }
        guard.chain = new_chain;
        guard.state = new_state;
        self.pool.lock().drop_already_chained(&guard.chain);

        // §4.3/§8 scenario 6: a replay that surfaces one of our own expired
        // Assigns synthesizes, signs, and gossips the Revoke immediately.
        let my_assignments = self.pool.lock().my_assignments.clone();
        let expired = replay::find_expired_own_assignments(&guard.chain, &my_assignments, &self.identity.asn, now);
        for req in expired {
            if let Err(e) = self.auto_revoke(&mut guard, &peers_snapshot, req, now) {
                tracing::warn!(error = %e, "failed to synthesize auto-revoke for an expired assignment");
            }
        }
        drop(guard);
        Ok(true)
    }

    /// Signs and applies a Revoke this node discovered it owes (an expired
    /// `myAssignments` entry surfaced by replay), then gossips it to every
    /// peer. Runs under the already-held chain lock, matching the ordering
    /// `resolve_conflicts` uses for its own swap.
    fn auto_revoke(
        &self,
        guard: &mut parking_lot::MutexGuard<'_, ChainState>,
        peers: &PeerTable,
        req: crate::transactions::RevokeRequest,
        now: f64,
    ) -> NodeResult<()> {
        let keyfield = crate::transactions::revoke::keyfield(&req);
        let txid = crate::transactions::compute_txid(&req.as_source, &keyfield, now);
        let signature = hex::encode(self.identity.sign(txid.as_bytes())?);
        let tx = crate::transactions::build_revoke(&guard.state, peers, &guard.chain, req, now, txid.clone(), signature)?;
        self.pool.lock().push(tx.clone());
        crate::gossip::broadcast_incoming_blocking(&self.http, peers, &tx);
        tracing::info!(%txid, "auto-revoke gossiped for an expired assignment");
        Ok(())
    }

    /// Mining pipeline step 7: notify every peer to re-resolve, via the
    /// blocking client since this is always called from a `spawn_blocking`
    /// context alongside `mine`'s proof-of-work.
    pub fn broadcast_resolve_blocking(&self) {
        let peers = self.peers.read();
        for (url, _) in peers.urls() {
            if let Err(e) = self.http.get(format!("{url}/resolve")).send() {
                tracing::warn!(%url, error = %e, "peer unreachable while broadcasting resolve");
            }
        }
    }

    /// The mining pipeline of §4.4. Runs `resolve_conflicts` first, prunes the
    /// pool, mines a block under the chain lock (PoW is CPU-bound; callers
    /// should run this via `tokio::task::spawn_blocking`), applies it, and
    /// returns the newly mined block (or `None` if the pool was empty).
    pub fn mine(&self, now: f64) -> NodeResult<Option<Block>> {
        self.resolve_conflicts(now)?;

        {
            let chain = &self.chain_state.lock().chain;
            self.pool.lock().drop_already_chained(chain);
        }

        let assigned_this_round: HashSet<Prefix> = self
            .pool
            .lock()
            .transactions
            .iter()
            .filter_map(|t| match t {
                Transaction::Assign(a) => Some(a.prefix.clone()),
                _ => None,
            })
            .collect();
        self.pool.lock().drop_announces_for_assigned(&assigned_this_round);

        let mut guard = self.chain_state.lock();
        self.pool.lock().lease_sum_prune(&guard.chain);

        let pending: Vec<Transaction> = {
            let mut pool = self.pool.lock();
            std::mem::take(&mut pool.transactions)
        };
        if pending.is_empty() {
            return Ok(None);
        }

        let prev = guard.chain.tip().clone();
        let (nonce, hash) = proof_of_work(now, &prev.hash, &pending);
        let signature = hex::encode(self.identity.sign(hash.as_bytes())?);
        let block = Block {
            index: prev.index + 1,
            timestamp: now,
            previous_hash: prev.hash.clone(),
            nonce,
            hash,
            miner_asn: self.identity.asn.clone(),
            signature,
            transactions: pending,
        };

        for tx in &block.transactions {
            guard.state.apply(tx);
        }
        guard.chain.push(block.clone());
        drop(guard);

        Ok(Some(block))
    }

    pub fn mark_alive(&self, asn: &str, now: f64) {
        self.liveness.write().insert(asn.to_string(), now);
    }

    /// Peers not heard from within `timeout_secs` are dropped from the
    /// liveness table (the reaper); this does not evict them from the peer
    /// directory itself, only from the "known alive" set (§4.5).
    pub fn reap_liveness(&self, now: f64, timeout_secs: f64) {
        self.liveness.write().retain(|_, last_seen| now - *last_seen <= timeout_secs);
    }

    pub fn is_alive(&self, asn: &str) -> bool {
        self.liveness.read().contains_key(asn)
    }
}

/// Builds a single-node fixture (genesis-only chain, no peers) for tests
/// elsewhere in the crate that need a real `Node` without a running server.
#[cfg(test)]
pub(crate) fn test_node() -> Node {
    let dir = tempfile::tempdir().unwrap();
    let identity = NodeIdentity::load_or_generate("8522", &dir.path().join("key.pem")).unwrap();
    let chain = crate::bootstrap::genesis_chain(&identity, 1.0).unwrap();
    let holdings = vec![("8522".to_string(), "139.91.0.0/16".to_string())];
    Node::new(NodeConfig::default(), identity, PeerTable::new(), holdings, chain, 1000).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mine_with_empty_pool_returns_none() {
        let node = test_node();
        assert!(node.mine(2.0).unwrap().is_none());
    }

    #[test]
    fn resolve_conflicts_with_no_peers_is_a_noop() {
        let node = test_node();
        assert!(!node.resolve_conflicts(0.0).unwrap());
    }

    #[test]
    fn liveness_reaper_drops_stale_entries() {
        let node = test_node();
        node.mark_alive("13335", 0.0);
        node.reap_liveness(100.0, 60.0);
        assert!(!node.is_alive("13335"));
    }
}
