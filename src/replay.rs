//! Full deterministic replay from genesis (§8 "Replay determinism" law).
//!
//! Building `WorldState` by walking a chain block-by-block must produce the
//! same state whether the chain was built locally transaction-by-transaction
//! or received whole from a peer during `/resolve`. This module is also where
//! this crate takes the §9 "MAY" on double validation: every transaction is
//! re-run through its own validator against the state snapshot immediately
//! prior to it, so a chain containing a transaction that could not have
//! legitimately applied is rejected here rather than silently accepted.

use std::collections::HashSet;

use crate::chain::Chain;
use crate::error::{NodeError, NodeResult};
use crate::model::{Asn, MONTH_SECS, Prefix, Transaction, Txid};
use crate::peer::PeerTable;
use crate::state::WorldState;
use crate::transactions::{
    build_assign, build_bgp_announce, build_bgp_withdraw, build_revoke, build_update,
    AssignRequest, BgpAnnounceRequest, BgpWithdrawRequest, RevokeRequest, UpdateRequest,
};

/// Re-validates `tx` against `ws` by reconstructing the request it was built
/// from, then returns the freshly-built (therefore re-verified) transaction.
/// The rebuilt transaction is expected to be byte-identical to `tx` for a
/// chain that was honestly produced; callers apply the rebuilt copy rather
/// than the original so a chain can never smuggle in a transaction whose
/// on-the-wire fields don't match what its own request would have produced.
fn revalidate(ws: &WorldState, peers: &PeerTable, chain: &Chain, tx: &Transaction) -> NodeResult<Transaction> {
    match tx {
        Transaction::Assign(t) => build_assign(
            ws,
            peers,
            AssignRequest {
                prefix: t.prefix.clone(),
                as_source: t.as_source.clone(),
                as_dest: t.as_dest_list.clone(),
                source_lease: t.source_lease,
                lease_duration: t.lease_duration,
                transfer_tag: t.transfer_tag,
                last_assign: t.last_assign.clone(),
            },
            t.time,
            t.txid.clone(),
            t.signature.clone(),
        ),
        Transaction::Revoke(t) => build_revoke(
            ws,
            peers,
            chain,
            RevokeRequest { as_source: t.as_source.clone(), assign_tran: t.assign_txid.clone() },
            t.time,
            t.txid.clone(),
            t.signature.clone(),
        ),
        Transaction::Update(t) => build_update(
            ws,
            peers,
            chain,
            UpdateRequest { as_source: t.as_source.clone(), assign_tran: t.assign_txid.clone(), new_lease: t.new_lease },
            t.time,
            t.txid.clone(),
            t.signature.clone(),
        ),
        Transaction::BgpAnnounce(t) => build_bgp_announce(
            ws,
            peers,
            BgpAnnounceRequest {
                prefix: t.prefix.clone(),
                bgp_timestamp: t.meta.bgp_timestamp,
                as_source: t.as_source.clone(),
                as_source_list: t.as_source_list.clone(),
                as_dest_list: t.as_dest_list.clone(),
                project: t.meta.project.clone(),
                collector: t.meta.collector.clone(),
                asn_peer: t.meta.asn_peer.clone(),
            },
            t.time,
            t.txid.clone(),
            t.signature.clone(),
        ),
        Transaction::BgpWithdraw(t) => build_bgp_withdraw(
            ws,
            peers,
            BgpWithdrawRequest {
                prefix: t.prefix.clone(),
                as_source: t.as_source.clone(),
                bgp_timestamp: t.meta.bgp_timestamp,
                project: t.meta.project.clone(),
                collector: t.meta.collector.clone(),
                asn_peer: t.meta.asn_peer.clone(),
            },
            false,
            t.time,
            t.txid.clone(),
            t.signature.clone(),
        ),
    }
}

/// Replays every non-genesis block's transactions in order, seeding genesis
/// holdings first. Rejects (`ChainInvalid`) on the first transaction that
/// fails re-validation against the snapshot immediately prior to it.
pub fn replay_chain(
    chain: &Chain,
    peers: &PeerTable,
    genesis_holdings: &[(Asn, Prefix)],
    genesis_lease_months: u32,
) -> NodeResult<WorldState> {
    let mut ws = WorldState::new();
    ws.seed_genesis(genesis_holdings, genesis_lease_months);

    for block in chain.blocks.iter().skip(1) {
        for tx in &block.transactions {
            let rebuilt = revalidate(&ws, peers, chain, tx)
                .map_err(|e| NodeError::ChainInvalid(format!("transaction {} failed replay: {e}", tx.txid())))?;
            ws.apply(&rebuilt);
        }
    }
    Ok(ws)
}

/// Finds Assigns this node issued (`my_assignments`) whose lease has expired
/// as of `now` and which have not already been revoked on `chain`, returning
/// the requests an auto-Revoke broadcaster should sign and submit (§8
/// scenario 6: a chain replacement can surface a newly-expired assignment).
pub fn find_expired_own_assignments(
    chain: &Chain,
    my_assignments: &HashSet<Txid>,
    as_source: &Asn,
    now: f64,
) -> Vec<RevokeRequest> {
    let mut out = Vec::new();
    for txid in my_assignments {
        let Some(assign) = chain.find_assign(txid) else { continue };
        if &assign.as_source != as_source {
            continue;
        }
        let expired = now >= assign.time + assign.lease_duration as f64 * MONTH_SECS;
        let already_revoked = chain
            .blocks
            .iter()
            .flat_map(|b| &b.transactions)
            .any(|t| matches!(t, Transaction::Revoke(r) if &r.assign_txid == txid));
        if expired && !already_revoked {
            out.push(RevokeRequest { as_source: as_source.clone(), assign_tran: txid.clone() });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NodeIdentity;

    #[test]
    fn replay_of_genesis_only_chain_matches_seed() {
        let dir = tempfile::tempdir().unwrap();
        let identity = NodeIdentity::load_or_generate("8522", &dir.path().join("key.pem")).unwrap();
        let chain = crate::bootstrap::genesis_chain(&identity, 1.0).unwrap();
        let peers = PeerTable::new();
        let ws = replay_chain(&chain, &peers, &[("8522".to_string(), "139.91.0.0/16".to_string())], 1000).unwrap();
        assert!(ws.holds("139.91.0.0/16", "8522"));
    }

    #[test]
    fn no_expired_assignments_when_pool_is_empty() {
        let chain = Chain::new();
        let out = find_expired_own_assignments(&chain, &HashSet::new(), &"8522".to_string(), 100.0);
        assert!(out.is_empty());
    }
}
