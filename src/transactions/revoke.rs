use serde::{Deserialize, Serialize};

use crate::chain::Chain;
use crate::error::{NodeError, NodeResult};
use crate::model::{Asn, RevokeOutput, RevokeTx, Transaction, MONTH_SECS};
use crate::peer::PeerTable;
use crate::state::WorldState;

use super::verify_source_signature;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeRequest {
    pub as_source: Asn,
    pub assign_tran: String,
}

pub fn keyfield(req: &RevokeRequest) -> String {
    req.assign_tran.clone()
}

/// Validates and builds a Revoke transaction (§4.1): the referenced Assign
/// must exist, be lease-expired, share `as_source`, and every destination it
/// created must still be a current holder.
pub fn build_revoke(
    ws: &WorldState,
    peers: &PeerTable,
    chain: &Chain,
    req: RevokeRequest,
    time: f64,
    txid: String,
    signature_hex: String,
) -> NodeResult<Transaction> {
    verify_source_signature(peers, &req.as_source, &txid, &signature_hex)?;

    let assign = chain
        .find_assign(&req.assign_tran)
        .ok_or_else(|| NodeError::SemanticInvalid(format!("no Assign with txid {}", req.assign_tran)))?;

    if time < assign.time + assign.lease_duration as f64 * MONTH_SECS {
        return Err(NodeError::SemanticInvalid("lease has not expired yet".into()));
    }
    if req.as_source != assign.as_source {
        return Err(NodeError::SemanticInvalid("as_source does not match the Assign's source".into()));
    }

    let holders = ws.holders_of(&assign.prefix);
    for dest in &assign.as_dest_list {
        if !holders.iter().any(|r| &r.asn == dest) {
            return Err(NodeError::SemanticInvalid(format!("{dest} no longer holds {}", assign.prefix)));
        }
    }

    let new_lease = assign
        .source_lease
        .checked_sub(assign.lease_duration)
        .ok_or_else(|| NodeError::SemanticInvalid("lease underflow on revoke".into()))?;

    let output = RevokeOutput {
        prefix: assign.prefix.clone(),
        as_source: req.as_source.clone(),
        new_lease,
        transfer_tag: true,
        last_assign: assign.last_assign.clone(),
    };

    Ok(Transaction::Revoke(RevokeTx {
        txid,
        as_source: req.as_source,
        time,
        signature: signature_hex,
        assign_txid: req.assign_tran,
        output,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_revoke_of_unknown_assign() {
        let ws = WorldState::new();
        let peers = PeerTable::new();
        let chain = Chain::new();
        let req = RevokeRequest { as_source: "8522".into(), assign_tran: "nope".into() };
        assert!(build_revoke(&ws, &peers, &chain, req, 1.0, "t".into(), "00".into()).is_err());
    }
}
