use serde::{Deserialize, Serialize};

use crate::chain::Chain;
use crate::error::{NodeError, NodeResult};
use crate::model::{Asn, Transaction, UpdateOutputItem, UpdateTx, MONTH_SECS};
use crate::peer::PeerTable;
use crate::state::WorldState;

use super::verify_source_signature;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub as_source: Asn,
    pub assign_tran: String,
    pub new_lease: u32,
}

pub fn keyfield(req: &UpdateRequest) -> String {
    format!("{}{}", req.assign_tran, req.new_lease)
}

/// Validates and builds an Update transaction (§4.1): extends a sub-lease
/// without returning the prefix. The running-sum-of-updates ceiling is not
/// enforced here -- a single transaction can't see its pool siblings -- it is
/// enforced during pending-pool pruning (§4.4, `crate::pool`).
pub fn build_update(
    ws: &WorldState,
    peers: &PeerTable,
    chain: &Chain,
    req: UpdateRequest,
    time: f64,
    txid: String,
    signature_hex: String,
) -> NodeResult<Transaction> {
    verify_source_signature(peers, &req.as_source, &txid, &signature_hex)?;

    let assign = chain
        .find_assign(&req.assign_tran)
        .ok_or_else(|| NodeError::SemanticInvalid(format!("no Assign with txid {}", req.assign_tran)))?;

    if time >= assign.time + assign.lease_duration as f64 * MONTH_SECS {
        return Err(NodeError::SemanticInvalid("lease has already expired".into()));
    }
    if req.as_source != assign.as_source {
        return Err(NodeError::SemanticInvalid("as_source does not match the Assign's source".into()));
    }

    let holders = ws.holders_of(&assign.prefix);
    let mut current_lease = None;
    for dest in &assign.as_dest_list {
        match holders.iter().find(|r| &r.asn == dest) {
            Some(r) => current_lease = Some(r.lease_duration),
            None => return Err(NodeError::SemanticInvalid(format!("{dest} no longer holds {}", assign.prefix))),
        }
    }
    let current_lease = current_lease.unwrap_or(0);

    if current_lease >= req.new_lease || req.new_lease > assign.source_lease {
        return Err(NodeError::SemanticInvalid("new_lease must exceed the current lease and not exceed the source lease".into()));
    }

    let output = assign
        .as_dest_list
        .iter()
        .map(|dest| UpdateOutputItem {
            prefix: assign.prefix.clone(),
            as_dest: dest.clone(),
            new_lease: req.new_lease,
            transfer_tag: assign.transfer_tag,
        })
        .collect();

    Ok(Transaction::Update(UpdateTx {
        txid,
        as_source: req.as_source,
        time,
        signature: signature_hex,
        assign_txid: req.assign_tran,
        new_lease: req.new_lease,
        output,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_update_of_unknown_assign() {
        let ws = WorldState::new();
        let peers = PeerTable::new();
        let chain = Chain::new();
        let req = UpdateRequest { as_source: "13335".into(), assign_tran: "nope".into(), new_lease: 60 };
        assert!(build_update(&ws, &peers, &chain, req, 1.0, "t".into(), "00".into()).is_err());
    }
}
