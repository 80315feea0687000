use serde::{Deserialize, Serialize};

use crate::error::{NodeError, NodeResult};
use crate::model::{Asn, BgpAnnounceTx, BgpMeta, BgpPath, Prefix, Transaction, ORIGIN_SENTINEL};
use crate::peer::PeerTable;
use crate::state::{apply_announce_paths, WorldState};

use super::verify_source_signature;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BgpAnnounceRequest {
    pub prefix: Prefix,
    pub bgp_timestamp: f64,
    pub as_source: Asn,
    pub as_source_list: Vec<Asn>,
    pub as_dest_list: Vec<Asn>,
    pub project: String,
    pub collector: String,
    pub asn_peer: String,
}

pub fn keyfield(req: &BgpAnnounceRequest) -> String {
    format!("{}{:?}{:?}{}", req.prefix, req.as_source_list, req.as_dest_list, req.bgp_timestamp)
}

fn check_network(peers: &PeerTable, list: &[Asn]) -> bool {
    list.iter().all(|asn| asn == ORIGIN_SENTINEL || peers.is_known(asn))
}

fn sorted(mut v: Vec<Asn>) -> Vec<Asn> {
    v.sort();
    v
}

/// Validates and builds a BGPAnnounce transaction (§4.1). Confirms the
/// advertised upstream set against the current topology (three origin cases),
/// checks every ASN involved is known, and rejects if applying the new edges
/// would introduce a cycle reachable from `as_source`.
pub fn build_bgp_announce(
    ws: &WorldState,
    peers: &PeerTable,
    req: BgpAnnounceRequest,
    time: f64,
    txid: String,
    signature_hex: String,
) -> NodeResult<Transaction> {
    verify_source_signature(peers, &req.as_source, &txid, &signature_hex)?;

    if req.as_source_list.is_empty() || !check_network(peers, &req.as_source_list) || !check_network(peers, &req.as_dest_list) {
        return Err(NodeError::SemanticInvalid("as_source_list/as_dest_list contain unknown ASNs".into()));
    }

    let empty;
    let graph = match ws.graph_of(&req.prefix) {
        Some(g) => g,
        None => {
            empty = crate::graph::ReachabilityGraph::new();
            &empty
        }
    };

    let origin_ok = if req.as_source_list.len() == 1 && req.as_source_list[0] == ORIGIN_SENTINEL {
        graph.has_edge(&req.as_source, &req.prefix)
    } else if req.as_source_list[0] == ORIGIN_SENTINEL {
        let direct = graph.has_edge(&req.as_source, &req.prefix);
        let mut expected = req.as_source_list[1..].to_vec();
        expected.push(req.prefix.clone());
        direct && sorted(expected) == sorted(graph.successors(&req.as_source))
    } else {
        sorted(req.as_source_list.clone()) == sorted(graph.successors(&req.as_source))
    };
    if !origin_ok {
        return Err(NodeError::SemanticInvalid("announced upstream set does not match the current topology".into()));
    }

    let output: Vec<BgpPath> = req
        .as_source_list
        .iter()
        .flat_map(|as_src| {
            req.as_dest_list.iter().map(move |as_dst| BgpPath {
                prefix: req.prefix.clone(),
                as_src: as_src.clone(),
                as_source: req.as_source.clone(),
                as_dst: as_dst.clone(),
            })
        })
        .collect();

    let mut hypothetical = graph.clone();
    apply_announce_paths(&mut hypothetical, &output);
    if hypothetical.has_cycle_reachable_from(&req.as_source) {
        return Err(NodeError::SemanticInvalid("announcement would introduce a routing loop".into()));
    }

    Ok(Transaction::BgpAnnounce(BgpAnnounceTx {
        txid,
        as_source: req.as_source,
        time,
        signature: signature_hex,
        prefix: req.prefix,
        as_source_list: req.as_source_list,
        as_dest_list: req.as_dest_list,
        meta: BgpMeta {
            project: req.project,
            collector: req.collector,
            asn_peer: req.asn_peer,
            bgp_timestamp: req.bgp_timestamp,
        },
        output,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerInfo;

    fn peers_with(asns: &[&str]) -> PeerTable {
        let mut p = PeerTable::new();
        for a in asns {
            p.insert(PeerInfo { url: format!("http://{a}"), asn: a.to_string(), public_key_pem: Some("PEM".into()) });
        }
        p
    }

    #[test]
    fn rejects_unknown_asn_in_source_list() {
        let ws = WorldState::new();
        let peers = peers_with(&["133741"]);
        let req = BgpAnnounceRequest {
            prefix: "1.3.33.0/24".into(),
            bgp_timestamp: 1.0,
            as_source: "133741".into(),
            as_source_list: vec!["99999".into()],
            as_dest_list: vec!["13335".into()],
            project: "p".into(),
            collector: "c".into(),
            asn_peer: "x".into(),
        };
        assert!(build_bgp_announce(&ws, &peers, req, 1.0, "t".into(), "00".into()).is_err());
    }
}
