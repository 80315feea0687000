use serde::{Deserialize, Serialize};

use crate::error::{NodeError, NodeResult};
use crate::model::{Asn, BgpMeta, BgpWithdrawTx, Prefix, Transaction};
use crate::peer::PeerTable;
use crate::state::WorldState;

use super::verify_source_signature;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BgpWithdrawRequest {
    pub prefix: Prefix,
    pub as_source: Asn,
    #[serde(default)]
    pub bgp_timestamp: f64,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub collector: String,
    #[serde(default)]
    pub asn_peer: String,
}

pub fn keyfield(req: &BgpWithdrawRequest) -> String {
    req.prefix.clone()
}

/// Validates and builds a BGPWithdraw transaction (§4.1). `already_pending`
/// is the pool-level duplicate-withdraw guard (same `(prefix, as_source)`
/// already lodged this round); it can't be decided from world state alone so
/// the caller (the pending pool) supplies it.
pub fn build_bgp_withdraw(
    ws: &WorldState,
    peers: &PeerTable,
    req: BgpWithdrawRequest,
    already_pending: bool,
    time: f64,
    txid: String,
    signature_hex: String,
) -> NodeResult<Transaction> {
    verify_source_signature(peers, &req.as_source, &txid, &signature_hex)?;

    if already_pending {
        return Err(NodeError::SemanticInvalid("a withdraw for this prefix/as_source is already pending".into()));
    }

    let reachable = ws
        .graph_of(&req.prefix)
        .map(|g| !g.all_simple_paths(&req.as_source, &req.prefix).is_empty() || g.has_edge(&req.as_source, &req.prefix))
        .unwrap_or(false);
    if !reachable {
        return Err(NodeError::SemanticInvalid(format!("{} has no path to {}", req.as_source, req.prefix)));
    }

    Ok(Transaction::BgpWithdraw(BgpWithdrawTx {
        txid,
        as_source: req.as_source,
        time,
        signature: signature_hex,
        prefix: req.prefix,
        meta: BgpMeta {
            project: req.project,
            collector: req.collector,
            asn_peer: req.asn_peer,
            bgp_timestamp: req.bgp_timestamp,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_withdraw_with_no_path_to_prefix() {
        let ws = WorldState::new();
        let peers = PeerTable::new();
        let req = BgpWithdrawRequest {
            prefix: "1.3.33.0/24".into(),
            as_source: "13335".into(),
            bgp_timestamp: 1.0,
            project: String::new(),
            collector: String::new(),
            asn_peer: String::new(),
        };
        assert!(build_bgp_withdraw(&ws, &peers, req, false, 1.0, "t".into(), "00".into()).is_err());
    }
}
